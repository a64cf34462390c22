//! Delivery states and outcomes.

use super::{ErrorCondition, TxnId};

/// State of a delivery as carried by Transfer and Disposition frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    Accepted,
    Rejected(Option<ErrorCondition>),
    Released,
    Modified {
        delivery_failed: bool,
        undeliverable_here: bool,
    },
    Received {
        section_number: u32,
        section_offset: u64,
    },
    /// Coordinator reply to a successful Declare.
    Declared { txn_id: TxnId },
    /// Outcome of a delivery performed under a transaction.
    Transactional {
        txn_id: TxnId,
        outcome: Option<Box<DeliveryState>>,
    },
}

impl DeliveryState {
    /// Whether the state is terminal (an outcome) rather than in-progress.
    #[must_use]
    pub const fn is_outcome(&self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::Rejected(_) | Self::Released | Self::Modified { .. }
        )
    }
}
