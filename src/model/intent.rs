use crate::config::ChainId;
use crate::model::order::OrderId;
use crate::model::price::Price;

/// The classified form of one inbound transfer — the Intent Parser's output.
///
/// Every variant implicitly carries the envelope fields on
/// [`IntentEnvelope`]; the tag itself only carries what differs per case.
#[derive(Debug, Clone)]
pub enum Intent {
    Limit {
        target_chain: ChainId,
        target_wallet_address: String,
        price: Price,
    },
    Market {
        target_chain: ChainId,
        target_wallet_address: String,
    },
    Close {
        order_id: OrderId,
    },
    Invalid {
        reason: String,
    },
    Oversized,
    Undersized,
    Moved {
        to_address: String,
    },
    Disabled,
}

impl Intent {
    /// Whether this classification is a rejection that owes the sender a
    /// refund (Pipeline phase 5) rather than an order-book mutation.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Intent::Invalid { .. }
                | Intent::Oversized
                | Intent::Undersized
                | Intent::Moved { .. }
                | Intent::Disabled
        )
    }
}

/// One inbound transfer plus its classification.
#[derive(Debug, Clone)]
pub struct IntentEnvelope {
    pub transfer_id: String,
    pub source_chain: ChainId,
    pub source_wallet_address: String,
    pub amount: u64,
    pub height: u64,
    pub timestamp: u64,
    pub kind: Intent,
}
