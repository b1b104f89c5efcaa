pub mod chain;
pub mod passphrase;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use chain::ChainId;
pub use passphrase::PassphraseConfig;

/// Fatal configuration problems. These abort startup; nothing short of
/// fixing the config file resolves them.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("`chains` must have exactly two entries, found {0}")]
    WrongChainCount(usize),

    #[error("`baseChain` {0:?} is not one of the configured chains")]
    UnknownBaseChain(ChainId),

    #[error("chain {0:?}: missing decryption password — {1}")]
    MissingDecryptionPassword(String),

    #[error("chain {0:?} has both a clear and an encrypted passphrase configured")]
    AmbiguousPassphrase(ChainId),

    #[error("decrypting passphrase: {0}")]
    DecryptionFailed(String),

    #[error("chain {chain:?}: {field} must be positive, got {value}")]
    NonPositive {
        chain: ChainId,
        field: &'static str,
        value: i64,
    },
}

/// Per-chain configuration — one entry in the config file's `chains` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    pub wallet_address: String,
    /// Opaque handle to the chain's account/transaction database; the
    /// Ledger Adapter interprets this, this node does not.
    pub database: String,
    pub module_alias: String,
    pub order_height_expiry: u64,
    pub required_confirmations: u64,
    pub read_max_blocks: u32,
    pub min_order_amount: u64,
    pub exchange_fee_base: u64,
    pub exchange_fee_rate: f64,
    pub dividend_rate: f64,
    pub dividend_start_height: u64,
    pub dividend_height_interval: u64,
    pub dividend_height_offset: u64,
    pub rebroadcast_after_height: u64,
    pub rebroadcast_until_height: u64,
    #[serde(default)]
    pub dex_disabled_from_height: Option<u64>,
    #[serde(default)]
    pub dex_moved_to_address: Option<String>,
    #[serde(flatten)]
    pub passphrase: PassphraseConfig,
    /// The multisig wallet's shared signing material — distinct from the
    /// member passphrase above, used to co-sign the same way every peer does.
    #[serde(flatten)]
    pub shared_passphrase: PassphraseConfigAlias,
    /// The wallet's member roster, mirroring what the Signature
    /// Coordinator would otherwise fetch from the ledger's account
    /// database at startup — pinned to config here so a node can boot
    /// without a live ledger query for it.
    pub multisig_members: Vec<MultisigMemberConfig>,
    pub required_signature_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigMemberConfig {
    pub public_key_hex: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", untagged)]
pub enum PassphraseConfigAlias {
    SharedPassphrase { shared_passphrase: String },
    EncryptedSharedPassphrase {
        encrypted_shared_passphrase: passphrase::EncryptedBlob,
    },
}

impl PassphraseConfigAlias {
    pub fn resolve(&self) -> Result<String, ConfigError> {
        match self {
            PassphraseConfigAlias::SharedPassphrase { shared_passphrase } => {
                Ok(shared_passphrase.clone())
            }
            PassphraseConfigAlias::EncryptedSharedPassphrase { encrypted_shared_passphrase } => {
                PassphraseConfig::EncryptedPassphrase {
                    encrypted_passphrase: encrypted_shared_passphrase.clone(),
                }
                .resolve()
            }
        }
    }
}

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub chains: HashMap<ChainId, ChainConfig>,
    pub base_chain: ChainId,
    #[serde(default)]
    pub passive_mode: bool,
    pub multisig_expiry: u64,
    pub multisig_expiry_check_interval: u64,
    #[serde(default = "default_signature_broadcast_delay")]
    pub signature_broadcast_delay: u64,
    #[serde(default = "default_transaction_submit_delay")]
    pub transaction_submit_delay: u64,
    pub read_blocks_interval: u64,
    #[serde(default = "default_read_max_blocks")]
    pub read_max_blocks: u32,
    pub order_book_snapshot_finality: u64,
    pub order_book_snapshot_file_path: PathBuf,
    pub order_book_snapshot_backup_dir_path: PathBuf,
    #[serde(default = "default_snapshot_backup_max_count")]
    pub order_book_snapshot_backup_max_count: usize,
    pub api_default_page_limit: usize,
    pub api_max_page_limit: usize,
    pub api_max_filter_fields: usize,
}

fn default_signature_broadcast_delay() -> u64 {
    15_000
}

fn default_transaction_submit_delay() -> u64 {
    5_000
}

fn default_snapshot_backup_max_count() -> usize {
    200
}

fn default_read_max_blocks() -> u32 {
    100
}

impl Config {
    /// Load, parse, and validate a config file. Validation failures all
    /// abort startup rather than degrade gracefully.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.len() != 2 {
            return Err(ConfigError::WrongChainCount(self.chains.len()));
        }
        if !self.chains.contains_key(&self.base_chain) {
            return Err(ConfigError::UnknownBaseChain(self.base_chain.clone()));
        }
        for (id, chain) in &self.chains {
            if chain.exchange_fee_rate < 0.0 || chain.exchange_fee_rate >= 1.0 {
                return Err(ConfigError::NonPositive {
                    chain: id.clone(),
                    field: "exchangeFeeRate",
                    value: (chain.exchange_fee_rate * 1000.0) as i64,
                });
            }
            if chain.order_height_expiry == 0 {
                return Err(ConfigError::NonPositive {
                    chain: id.clone(),
                    field: "orderHeightExpiry",
                    value: 0,
                });
            }
            if chain.required_signature_count == 0 || chain.required_signature_count > chain.multisig_members.len() {
                return Err(ConfigError::NonPositive {
                    chain: id.clone(),
                    field: "requiredSignatureCount",
                    value: chain.required_signature_count as i64,
                });
            }
            if chain.dividend_height_interval == 0 {
                return Err(ConfigError::NonPositive {
                    chain: id.clone(),
                    field: "dividendHeightInterval",
                    value: 0,
                });
            }
        }
        Ok(())
    }

    pub fn base_chain(&self) -> &ChainId {
        &self.base_chain
    }

    /// The other configured chain — every instance has exactly two.
    pub fn quote_chain(&self) -> ChainId {
        self.chains
            .keys()
            .find(|id| *id != &self.base_chain)
            .cloned()
            .expect("validated: exactly two chains")
    }

    pub fn chain(&self, id: &ChainId) -> &ChainConfig {
        self.chains.get(id).expect("chain id validated at load time")
    }
}
