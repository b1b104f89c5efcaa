use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock monotonic milliseconds, abstracted so tests can drive time
/// deterministically instead of racing the real clock — the same role the
/// teacher's `SimClock` plays for backtest ticks, generalized here to a
/// live wall clock with a fake for tests.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as u64
    }
}
