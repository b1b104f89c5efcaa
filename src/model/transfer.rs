use serde::{Deserialize, Serialize};

use crate::config::ChainId;
use crate::signature::MemberSignature;

/// One transfer observed on a chain, inbound or outbound to the multisig wallet.
///
/// Ledger Adapters hand these to the Pipeline; the Signature Coordinator
/// builds the outbound ones it authors from the same shape. `signatures` is
/// empty for ordinary inbound transfers; outbound multisig transfers carry
/// the member signatures attached when they were submitted, which the
/// Dividend Processor re-verifies to attribute trade volume per member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub source_chain: ChainId,
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    /// Comma-separated memo payload — see [`super::memo`].
    pub memo: String,
    pub height: u64,
    pub timestamp: u64,
    #[serde(default)]
    pub signatures: Vec<MemberSignature>,
}
