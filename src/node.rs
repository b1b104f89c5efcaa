//! The top-level coordinator object: one explicitly-owned value wiring
//! configuration, Ledger Adapters, the Order Book Engine, the Pending
//! Transfer Registry, the Signature Coordinator, the Block Interleaver,
//! the Pipeline, the Snapshot Store, the Dividend Processor, a clock, and
//! the scheduler together — no static singletons.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::api::state::{AppState, ChainHealth};
use crate::clock::Clock;
use crate::config::{ChainId, Config};
use crate::dividend::{DividendProcessor, DividendQueue};
use crate::interleaver::{self, BlockInterleaver};
use crate::ledger::LedgerAdapter;
use crate::network::PeerNetwork;
use crate::pipeline::{self, PipelineChains, PipelineContext};
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::signature::{MultisigWalletInfo, PeerSignatureOutcome, PublicKeyBytes, SignatureBytes, SignatureCoordinator, TxId};
use crate::snapshot::{OrderBookSnapshot, SnapshotStore};

pub struct Coordinator {
    config: Config,
    chains: PipelineChains,
    interleaver: BlockInterleaver,
    signer: SignatureCoordinator,
    member_addresses: HashMap<ChainId, HashMap<PublicKeyBytes, String>>,
    network: Arc<dyn PeerNetwork>,
    scheduler: Scheduler,
    dividend_queue: DividendQueue,
    snapshot_store: SnapshotStore,
    clock: Arc<dyn Clock>,
    pub state: AppState,
    last_snapshot: Option<OrderBookSnapshot>,
    last_expiry_check_ms: u64,
}

#[allow(clippy::too_many_arguments)]
impl Coordinator {
    pub fn new(
        config: Config,
        adapters: HashMap<ChainId, Arc<dyn LedgerAdapter>>,
        wallets: HashMap<ChainId, MultisigWalletInfo>,
        member_addresses: HashMap<ChainId, HashMap<PublicKeyBytes, String>>,
        signing_key: ed25519_dalek::SigningKey,
        own_member_address: String,
        network: Arc<dyn PeerNetwork>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let base_chain = config.base_chain().clone();
        let chain_ids: Vec<ChainId> = config.chains.keys().cloned().collect();
        let mut ordered_ids = vec![base_chain.clone()];
        ordered_ids.extend(chain_ids.iter().filter(|id| **id != base_chain).cloned());

        let mut configs = Vec::new();
        let mut chain_adapters = Vec::new();
        let mut interleaver_inputs = Vec::new();
        for id in &ordered_ids {
            let chain_config = config.chain(id).clone();
            let adapter = adapters.get(id).expect("adapter provided for every configured chain").clone();
            configs.push(chain_config.clone());
            chain_adapters.push(adapter.clone());
            interleaver_inputs.push((id.clone(), adapter, chain_config));
        }

        let interleaver = BlockInterleaver::new(base_chain, interleaver_inputs, config.read_max_blocks, config.read_blocks_interval);
        let signer = SignatureCoordinator::new(signing_key, own_member_address, wallets);
        let snapshot_store = SnapshotStore::new(config.order_book_snapshot_file_path.clone(), config.order_book_snapshot_backup_dir_path.clone(), config.order_book_snapshot_backup_max_count);
        let state = AppState::new(config.clone());
        let dividend_queue = DividendQueue::new(64);

        Coordinator {
            chains: PipelineChains { ids: ordered_ids, configs, adapters: chain_adapters, base_index: 0 },
            interleaver,
            signer,
            member_addresses,
            network,
            scheduler: Scheduler::new(),
            dividend_queue,
            snapshot_store,
            clock,
            state,
            last_snapshot: None,
            last_expiry_check_ms: 0,
            config,
        }
    }

    /// Restores book state and interleaver cursors from the last persisted
    /// snapshot, if any. Call once before `run`.
    pub async fn bootstrap(&mut self) -> anyhow::Result<()> {
        let base_adapter = self.chains.adapters[self.chains.base_index].clone();
        let mut book = self.state.inner.book.write().await;
        interleaver::restore_from_snapshot(&self.snapshot_store, &mut book, &mut self.interleaver, base_adapter.as_ref()).await?;
        self.last_snapshot = self.snapshot_store.load()?;
        Ok(())
    }

    /// Runs once on the tick where both chains are observed resuming after
    /// a fork: clears the Pending Transfer Registry (its entries were
    /// authored against a chain history that may no longer be canonical)
    /// and restores the Order Book Engine and interleaver cursors from the
    /// last in-memory snapshot, if one was ever taken.
    async fn recover_from_fork(&mut self) -> anyhow::Result<()> {
        self.state.inner.registry.write().await.clear();

        let Some(snapshot) = self.last_snapshot.clone() else {
            warn!("fork resolved but no snapshot exists yet, starting from an empty book");
            return Ok(());
        };

        self.state.inner.book.write().await.set_snapshot(snapshot.order_book.clone());

        let base_adapter = self.chains.adapters[self.chains.base_index].clone();
        let base_height = snapshot.chain_heights.get(self.interleaver.base_chain_id()).copied().unwrap_or(0);
        let base_chain_timestamp = base_adapter.block_at(base_height).await?.map(|b| b.timestamp).unwrap_or(0);
        self.interleaver.recover_from_snapshot(&snapshot, base_chain_timestamp);
        Ok(())
    }

    /// Runs until a ctrl-c signal is received, then drains submit and
    /// dividend tasks before returning.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested, draining in-flight submissions");
                    self.drain_for_shutdown().await;
                    return Ok(());
                }
                result = self.step() => {
                    result?;
                }
            }
        }
    }

    async fn step(&mut self) -> anyhow::Result<()> {
        let outcome = self.interleaver.tick().await?;
        if outcome.recovered_from_fork {
            info!("chains resumed after a fork, recovering from last snapshot");
            self.recover_from_fork().await?;
        }

        if outcome.events.is_empty() {
            self.run_due_tasks().await;
            self.run_dividend_jobs().await;
            self.maybe_expire_registry().await;
            tokio::time::sleep(Duration::from_millis(self.interleaver.idle_sleep_ms())).await;
            return Ok(());
        }

        for event in outcome.events {
            let latest_heights = self.latest_chain_heights();
            let outcome = {
                let mut book = self.state.inner.book.write().await;
                let mut registry = self.state.inner.registry.write().await;
                let mut ctx = PipelineContext {
                    config: &self.config,
                    book: &mut book,
                    registry: &mut registry,
                    signer: &self.signer,
                    network: self.network.as_ref(),
                    scheduler: &mut self.scheduler,
                    dividend_queue: &mut self.dividend_queue,
                    snapshot_store: &self.snapshot_store,
                    clock: self.clock.as_ref(),
                    last_snapshot: &mut self.last_snapshot,
                };
                pipeline::process_block(&mut ctx, &self.chains, event.chain_index, event.height, event.timestamp, event.is_last_block, &latest_heights).await
            };

            match outcome {
                Ok(()) => {
                    self.interleaver.mark_processed(event.chain_index, event.height, event.timestamp);
                    self.update_health(event.chain_index, event.height).await;
                }
                Err(err) => {
                    warn!(%err, "pipeline error, block retried next tick");
                    break;
                }
            }
        }

        self.run_due_tasks().await;
        self.run_dividend_jobs().await;
        self.maybe_expire_registry().await;
        Ok(())
    }

    async fn run_due_tasks(&mut self) {
        let due = self.scheduler.drain_due(tokio::time::Instant::now());
        for task in due {
            self.run_task(task).await;
        }
    }

    async fn run_task(&mut self, task: ScheduledTask) {
        match task {
            ScheduledTask::BroadcastSignature { chain, tx_id, public_key, signature } => {
                if let Err(err) = self.network.broadcast_signature(&chain, &tx_id, public_key, signature).await {
                    warn!(%tx_id, %err, "signature broadcast failed");
                }
            }
            ScheduledTask::SubmitTransaction { chain, tx_id } => {
                self.submit_transaction(&chain, &tx_id).await;
            }
        }
    }

    async fn submit_transaction(&mut self, chain: &ChainId, tx_id: &TxId) {
        let Some(index) = self.chains.ids.iter().position(|id| id == chain) else { return };
        let transfer = {
            let registry = self.state.inner.registry.read().await;
            registry.get(tx_id).map(|entry| entry.transaction.transfer.clone())
        };
        let Some(transfer) = transfer else { return };
        if let Err(err) = self.chains.adapters[index].post_transaction(&transfer).await {
            warn!(%tx_id, %err, "transaction submission failed, will rebroadcast via sweep");
        } else if let Err(err) = self.network.post_transaction_announced(chain, tx_id).await {
            warn!(%tx_id, %err, "post-submit announcement failed");
        }
    }

    async fn run_dividend_jobs(&mut self) {
        while let Some(job) = self.dividend_queue.pop() {
            let Some(index) = self.chains.ids.iter().position(|id| *id == job.chain) else { continue };
            let chain_config = self.chains.configs[index].clone();
            let Some(wallet) = self.signer.wallet(&job.chain).cloned() else { continue };
            let addresses = self.member_addresses.get(&job.chain).cloned().unwrap_or_default();
            let lookup = |pk: &PublicKeyBytes| addresses.get(pk).cloned();
            let processor = DividendProcessor {
                ledger: self.chains.adapters[index].as_ref(),
                wallet: &wallet,
                member_address_of: &lookup,
                formula: crate::dividend::default_dividend_formula,
            };
            match processor.process(&job, &chain_config, &chain_config.wallet_address).await {
                Ok(payouts) => {
                    let from_height = job.to_height.saturating_sub(job.dividend_height_interval).max(1);
                    for payout in payouts {
                        let memo = crate::model::memo::d1_dividend(from_height, job.to_height);
                        self.author_dividend_payout(index, job.to_height, payout.member_address, payout.amount, memo).await;
                    }
                }
                Err(err) => warn!(chain = %job.chain, %err, "dividend processing failed"),
            }
        }
    }

    async fn author_dividend_payout(&mut self, chain_index: usize, height: u64, recipient: String, amount: u64, memo: String) {
        if self.config.passive_mode || amount == 0 {
            return;
        }
        let chain = self.chains.ids[chain_index].clone();
        let raw_id = uuid::Uuid::new_v4().to_string();
        let transfer = crate::model::transfer::Transfer {
            id: raw_id.clone(),
            source_chain: chain.clone(),
            sender: self.chains.configs[chain_index].wallet_address.clone(),
            recipient,
            amount,
            memo,
            height,
            timestamp: self.clock.now_ms(),
            signatures: vec![],
        };
        let signed = self.signer.author(transfer);
        let own_signature = signed.signatures[0].signature;
        let required = self.signer.wallet(&chain).map(|w| w.required_signature_count).unwrap_or(1);
        let is_ready = signed.signatures.len() >= required;
        let processed_signatures = signed.signatures.iter().map(|s| s.signature).collect();
        let tx_id = TxId::new(chain.clone(), raw_id);
        let mut registry = self.state.inner.registry.write().await;
        registry.put(crate::registry::PendingTransfer {
            id: tx_id.clone(),
            transaction: signed,
            target_chain: chain.clone(),
            processed_signatures,
            contributors: std::collections::HashSet::from([self.signer.own_member_address.clone()]),
            public_key: self.signer.own_public_key,
            creation_height: height,
            inserted_at: self.clock.now_ms(),
            is_ready,
        });
        drop(registry);
        self.scheduler.schedule_after(
            Duration::from_millis(self.config.signature_broadcast_delay),
            ScheduledTask::BroadcastSignature { chain, tx_id, public_key: self.signer.own_public_key, signature: own_signature },
        );
    }

    async fn maybe_expire_registry(&mut self) {
        let now = self.clock.now_ms();
        if now.saturating_sub(self.last_expiry_check_ms) < self.config.multisig_expiry_check_interval {
            return;
        }
        self.last_expiry_check_ms = now;
        let mut registry = self.state.inner.registry.write().await;
        let expired = registry.expire(now, self.config.multisig_expiry);
        if !expired.is_empty() {
            info!(count = expired.len(), "pending transfers expired");
        }
    }

    async fn update_health(&self, chain_index: usize, height: u64) {
        let chain = self.chains.ids[chain_index].clone();
        let mut heights = self.state.inner.chain_heights.write().await;
        heights.insert(chain, ChainHealth { height, updated_at_ms: self.clock.now_ms() });
    }

    fn latest_chain_heights(&self) -> HashMap<ChainId, u64> {
        self.chains.ids.iter().enumerate().map(|(i, id)| (id.clone(), self.interleaver.last_processed_height(i))).collect()
    }

    /// Applies a peer's signature on an outgoing transaction — the
    /// P2P-bus-consumed half of `onPeerSignature`. The transport that
    /// calls this is out of scope here.
    pub async fn handle_peer_signature(&mut self, chain: ChainId, tx_id: TxId, public_key: PublicKeyBytes, signature: SignatureBytes) -> anyhow::Result<()> {
        let required = self.signer.wallet(&chain).map(|w| w.required_signature_count).unwrap_or(1);
        let addresses = self.member_addresses.get(&chain).cloned().unwrap_or_default();

        let mut registry = self.state.inner.registry.write().await;
        let Some(entry) = registry.get_mut(&tx_id) else { return Ok(()) };

        let mut processed = entry.processed_signatures.clone();
        let mut contributors = entry.contributors.clone();
        let outcome = self.signer.apply_peer_signature(
            &chain,
            &mut entry.transaction,
            &mut processed,
            &mut contributors,
            |pk| addresses.get(pk).cloned(),
            public_key,
            signature,
            required,
        );
        entry.processed_signatures = processed;
        entry.contributors = contributors;

        let (became_ready, should_schedule_submit) = match outcome {
            PeerSignatureOutcome::Dropped => return Ok(()),
            PeerSignatureOutcome::Accepted { became_ready, should_schedule_submit, .. } => (became_ready, should_schedule_submit),
        };
        entry.is_ready = became_ready;
        drop(registry);

        self.network.broadcast_signature(&chain, &tx_id, public_key, signature).await.ok();
        if should_schedule_submit {
            self.scheduler.schedule_after(Duration::from_millis(self.config.transaction_submit_delay), ScheduledTask::SubmitTransaction { chain, tx_id });
        }
        Ok(())
    }

    async fn drain_for_shutdown(&mut self) {
        let tasks = self.scheduler.drain_for_shutdown();
        for task in tasks {
            self.run_task(task).await;
        }
    }
}
