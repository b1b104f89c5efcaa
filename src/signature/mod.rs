use std::collections::{HashMap, HashSet};
use std::fmt;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ChainId;
use crate::model::transfer::Transfer;

pub type PublicKeyBytes = [u8; 32];
pub type SignatureBytes = [u8; 64];

/// A transaction id namespaced by the chain it settles on, so ids raised
/// independently by the two ledgers can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId {
    pub chain: ChainId,
    pub raw: String,
}

impl TxId {
    pub fn new(chain: ChainId, raw: impl Into<String>) -> Self {
        TxId { chain, raw: raw.into() }
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.raw)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSignature {
    pub public_key: PublicKeyBytes,
    pub signature: SignatureBytes,
}

/// The constructed outgoing transfer plus its accumulating member signatures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transfer: Transfer,
    pub signatures: Vec<MemberSignature>,
}

/// Per-chain multisig wallet roster, loaded once at startup and treated as
/// immutable thereafter.
#[derive(Debug, Clone)]
pub struct MultisigWalletInfo {
    pub members: HashSet<PublicKeyBytes>,
    pub member_count: usize,
    pub required_signature_count: usize,
}

/// Deterministic hash of a transaction's signable content — every member
/// signs this same digest, never the transaction-with-signatures.
pub fn transaction_hash(transfer: &Transfer) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(transfer.id.as_bytes());
    hasher.update(transfer.source_chain.as_str().as_bytes());
    hasher.update(transfer.sender.as_bytes());
    hasher.update(transfer.recipient.as_bytes());
    hasher.update(transfer.amount.to_be_bytes());
    hasher.update(transfer.memo.as_bytes());
    hasher.update(transfer.height.to_be_bytes());
    hasher.update(transfer.timestamp.to_be_bytes());
    hasher.into()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerSignatureOutcome {
    /// Unknown transaction id or a signature already in `processedSignatures`.
    Dropped,
    Accepted {
        quota: i64,
        became_ready: bool,
        /// True exactly once per pending transfer: quota crossed from
        /// negative to zero on this call.
        should_schedule_submit: bool,
    },
}

/// Produces this node's own signatures and validates peers'. Rebroadcast
/// scheduling and on-chain submission are driven by the caller (the
/// scheduler owns the delay timers) — this type only does the synchronous
/// cryptography and bookkeeping that must never suspend.
pub struct SignatureCoordinator {
    signing_key: SigningKey,
    pub own_public_key: PublicKeyBytes,
    pub own_member_address: String,
    wallets: HashMap<ChainId, MultisigWalletInfo>,
}

impl SignatureCoordinator {
    pub fn new(signing_key: SigningKey, own_member_address: String, wallets: HashMap<ChainId, MultisigWalletInfo>) -> Self {
        let own_public_key = signing_key.verifying_key().to_bytes();
        SignatureCoordinator { signing_key, own_public_key, own_member_address, wallets }
    }

    pub fn wallet(&self, chain: &ChainId) -> Option<&MultisigWalletInfo> {
        self.wallets.get(chain)
    }

    pub fn is_member(&self, chain: &ChainId, public_key: &PublicKeyBytes) -> bool {
        self.wallets.get(chain).is_some_and(|w| w.members.contains(public_key))
    }

    fn sign(&self, hash: &[u8; 32]) -> SignatureBytes {
        self.signing_key.sign(hash).to_bytes()
    }

    pub fn verify(&self, public_key: &PublicKeyBytes, hash: &[u8; 32], signature: &SignatureBytes) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else { return false };
        let sig = ed25519_dalek::Signature::from_bytes(signature);
        verifying_key.verify(hash, &sig).is_ok()
    }

    /// Build a canonical signed transaction with this node's own signature
    /// already attached, ready to hand to the Pending Transfer Registry.
    pub fn author(&self, transfer: Transfer) -> SignedTransaction {
        let hash = transaction_hash(&transfer);
        let signature = self.sign(&hash);
        SignedTransaction {
            transfer,
            signatures: vec![MemberSignature { public_key: self.own_public_key, signature }],
        }
    }

    /// Validate and (if accepted) apply a peer signature to `transaction`,
    /// mutating its signature list, `processed_signatures`, and `contributors`.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_peer_signature(
        &self,
        target_chain: &ChainId,
        transaction: &mut SignedTransaction,
        processed_signatures: &mut HashSet<SignatureBytes>,
        contributors: &mut HashSet<String>,
        member_address_of: impl Fn(&PublicKeyBytes) -> Option<String>,
        public_key: PublicKeyBytes,
        signature: SignatureBytes,
        required_signature_count: usize,
    ) -> PeerSignatureOutcome {
        if processed_signatures.contains(&signature) {
            return PeerSignatureOutcome::Dropped;
        }
        if !self.is_member(target_chain, &public_key) {
            return PeerSignatureOutcome::Dropped;
        }
        let hash = transaction_hash(&transaction.transfer);
        if !self.verify(&public_key, &hash, &signature) {
            return PeerSignatureOutcome::Dropped;
        }

        let quota_before = transaction.signatures.len() as i64 - required_signature_count as i64;
        transaction.signatures.push(MemberSignature { public_key, signature });
        processed_signatures.insert(signature);
        if let Some(address) = member_address_of(&public_key) {
            contributors.insert(address);
        }
        let quota_after = transaction.signatures.len() as i64 - required_signature_count as i64;

        PeerSignatureOutcome::Accepted {
            quota: quota_after,
            became_ready: quota_after >= 0,
            should_schedule_submit: quota_before < 0 && quota_after == 0,
        }
    }
}
