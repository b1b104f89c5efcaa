//! A small scheduler with cancellable timers and a single queue type,
//! covering signature broadcast delay, transaction submit delay, and
//! dividend job dispatch. Everything here runs on the same logical task as
//! the Block Interleaver; nothing spawns onto another thread.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ChainId;
use crate::signature::{PublicKeyBytes, SignatureBytes, TxId};

/// Dividend jobs travel their own bounded queue ([`crate::dividend::DividendQueue`]),
/// a single-consumer queue distinct from these one-shot timers.
#[derive(Debug, Clone)]
pub enum ScheduledTask {
    BroadcastSignature { chain: ChainId, tx_id: TxId, public_key: PublicKeyBytes, signature: SignatureBytes },
    SubmitTransaction { chain: ChainId, tx_id: TxId },
}

impl ScheduledTask {
    /// Submit and dividend tasks drain on shutdown; rebroadcast tasks may
    /// be dropped, since a later sweep will re-emit them anyway.
    pub fn drains_on_shutdown(&self) -> bool {
        !matches!(self, ScheduledTask::BroadcastSignature { .. })
    }
}

struct Entry {
    fire_at: Instant,
    seq: u64,
    task: ScheduledTask,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}
impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want soonest-first.
        other.fire_at.cmp(&self.fire_at).then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub struct Scheduler {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_after(&mut self, delay: Duration, task: ScheduledTask) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { fire_at: Instant::now() + delay, seq, task });
    }

    pub fn schedule_now(&mut self, task: ScheduledTask) {
        self.schedule_after(Duration::ZERO, task);
    }

    /// Pops every task due at or before `now`.
    pub fn drain_due(&mut self, now: Instant) -> Vec<ScheduledTask> {
        let mut due = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.fire_at > now {
                break;
            }
            due.push(self.heap.pop().unwrap().task);
        }
        due
    }

    /// How long until the next task is due, for the idle-sleep calculation.
    pub fn time_until_next(&self, now: Instant) -> Option<Duration> {
        self.heap.peek().map(|e| e.fire_at.saturating_duration_since(now))
    }

    /// Drains every task that must survive shutdown (submit, dividend),
    /// dropping the rest.
    pub fn drain_for_shutdown(&mut self) -> Vec<ScheduledTask> {
        let all: Vec<Entry> = std::mem::take(&mut self.heap).into_sorted_vec();
        all.into_iter().map(|e| e.task).filter(|t| t.drains_on_shutdown()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
