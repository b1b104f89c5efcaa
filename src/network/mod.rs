use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::config::ChainId;
use crate::signature::{PublicKeyBytes, SignatureBytes, TxId};

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("peer broadcast failed: {0}")]
    Unavailable(String),
}

/// The P2P bus this node emits signature gossip on, scoped to peers
/// sharing the same (base, quote) subnet. The transport itself is a
/// black-box collaborator; this crate only depends on the contract.
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    async fn broadcast_signature(
        &self,
        chain: &ChainId,
        tx_id: &TxId,
        public_key: PublicKeyBytes,
        signature: SignatureBytes,
    ) -> Result<(), NetworkError>;

    async fn post_transaction_announced(&self, chain: &ChainId, tx_id: &TxId) -> Result<(), NetworkError>;
}

/// A no-op bus for single-node operation and tests — logs what would have
/// been emitted instead of reaching an actual P2P transport.
pub struct NullPeerNetwork;

#[async_trait]
impl PeerNetwork for NullPeerNetwork {
    async fn broadcast_signature(
        &self,
        chain: &ChainId,
        tx_id: &TxId,
        public_key: PublicKeyBytes,
        _signature: SignatureBytes,
    ) -> Result<(), NetworkError> {
        debug!(%chain, %tx_id, public_key = %hex_prefix(&public_key), "broadcast signature (no-op network)");
        Ok(())
    }

    async fn post_transaction_announced(&self, chain: &ChainId, tx_id: &TxId) -> Result<(), NetworkError> {
        debug!(%chain, %tx_id, "announced posted transaction (no-op network)");
        Ok(())
    }
}

fn hex_prefix(bytes: &[u8; 32]) -> String {
    bytes[..4].iter().map(|b| format!("{b:02x}")).collect()
}
