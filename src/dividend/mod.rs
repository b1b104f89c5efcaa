use std::collections::{HashMap, VecDeque};

use tracing::warn;

use crate::config::{ChainConfig, ChainId};
use crate::ledger::LedgerAdapter;
use crate::signature::{MultisigWalletInfo, PublicKeyBytes, transaction_hash};

/// One scan job: tally trade volume over `(toHeight - dividendHeightInterval, toHeight]`.
#[derive(Debug, Clone)]
pub struct DividendJob {
    pub chain: ChainId,
    pub to_height: u64,
    pub dividend_height_interval: u64,
}

#[derive(Debug, Clone)]
pub struct DividendPayout {
    pub member_address: String,
    pub amount: u64,
}

/// `floor(contribution * dividendRate * exchangeFeeRate / memberCount)`.
pub fn default_dividend_formula(contribution: u64, dividend_rate: f64, exchange_fee_rate: f64, member_count: usize) -> u64 {
    if member_count == 0 {
        return 0;
    }
    ((contribution as f64 * dividend_rate * exchange_fee_rate) / member_count as f64).floor() as u64
}

pub type DividendFormula = fn(u64, f64, f64, usize) -> u64;

/// Scans multisig-wallet outbound trade transfers in a job's height window
/// and attributes fee-adjusted volume per verified member signature.
pub struct DividendProcessor<'a> {
    pub ledger: &'a dyn LedgerAdapter,
    pub wallet: &'a MultisigWalletInfo,
    pub member_address_of: &'a dyn Fn(&PublicKeyBytes) -> Option<String>,
    pub formula: DividendFormula,
}

impl<'a> DividendProcessor<'a> {
    pub async fn process(&self, job: &DividendJob, chain_config: &ChainConfig, wallet_address: &str) -> anyhow::Result<Vec<DividendPayout>> {
        let from_height = job.to_height.saturating_sub(job.dividend_height_interval).max(1);
        let mut contributions: HashMap<PublicKeyBytes, u64> = HashMap::new();

        for height in (from_height + 1)..=job.to_height {
            let outbound = self.ledger.outbound_transfers(height, wallet_address).await?;
            for transfer in outbound {
                if !transfer.memo.starts_with('t') {
                    continue;
                }
                let amount_before_fee = if chain_config.exchange_fee_rate >= 1.0 {
                    continue;
                } else {
                    (transfer.amount as f64 / (1.0 - chain_config.exchange_fee_rate)).floor() as u64
                };

                let hash = transaction_hash(&transfer);
                for sig in &transfer.signatures {
                    if !self.wallet.members.contains(&sig.public_key) {
                        continue;
                    }
                    let Ok(verifying_key) = ed25519_dalek::VerifyingKey::from_bytes(&sig.public_key) else { continue };
                    let signature = ed25519_dalek::Signature::from_bytes(&sig.signature);
                    if ed25519_dalek::Verifier::verify(&verifying_key, &hash, &signature).is_ok() {
                        *contributions.entry(sig.public_key).or_insert(0) += amount_before_fee;
                    }
                }
            }
        }

        let mut payouts = Vec::new();
        for (public_key, contribution) in contributions {
            let Some(member_address) = (self.member_address_of)(&public_key) else { continue };
            let amount = (self.formula)(contribution, chain_config.dividend_rate, chain_config.exchange_fee_rate, self.wallet.member_count);
            if amount > 0 {
                payouts.push(DividendPayout { member_address, amount });
            }
        }
        Ok(payouts)
    }
}

/// Bounded single-consumer queue of dividend jobs. When full, the oldest
/// job is dropped in favor of the newer one rather than growing unboundedly
/// or blocking the pipeline that enqueues it.
pub struct DividendQueue {
    jobs: VecDeque<DividendJob>,
    capacity: usize,
}

impl DividendQueue {
    pub fn new(capacity: usize) -> Self {
        DividendQueue { jobs: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, job: DividendJob) {
        if self.jobs.len() >= self.capacity {
            warn!(chain = %job.chain, "dividend queue full, dropping oldest job");
            self.jobs.pop_front();
        }
        self.jobs.push_back(job);
    }

    pub fn pop(&mut self) -> Option<DividendJob> {
        self.jobs.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Whether `chain_height` is a dividend tick for this chain's configuration.
pub fn is_dividend_tick(chain_height: u64, chain_config: &ChainConfig) -> bool {
    chain_config.dividend_height_interval != 0
        && chain_height > chain_config.dividend_start_height + chain_config.dividend_height_offset
        && (chain_height - chain_config.dividend_height_offset) % chain_config.dividend_height_interval == 0
}
