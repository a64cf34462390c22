//! Transaction control bodies exchanged over a coordinator link.

use std::fmt;

use bincode::{Decode, Encode};

/// Opaque transaction identifier assigned by the coordinator.
#[derive(Clone, PartialEq, Eq, Hash, Encode, Decode)]
pub struct TxnId(Vec<u8>);

impl TxnId {
    /// Wrap raw identifier bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self { Self(bytes.into()) }

    /// Borrow the identifier bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.0 }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "TxnId({self})") }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Request to start a new transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct Declare {
    /// Global transaction id for distributed transactions; unsupported
    /// coordinators ignore it.
    pub global_id: Option<Vec<u8>>,
}

/// Request to end a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Discharge {
    pub txn_id: TxnId,
    /// `true` requests a rollback, `false` a commit.
    pub fail: bool,
}

/// Body of an `amqp-value` message section.
///
/// Coordinator links only expect the two control bodies; anything else is
/// carried as [`AmqpValue::Other`] so the engine can reject it.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub enum AmqpValue {
    Declare(Declare),
    Discharge(Discharge),
    Other(String),
}

impl AmqpValue {
    /// Short description used in diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Declare(_) => "declare",
            Self::Discharge(_) => "discharge",
            Self::Other(_) => "other",
        }
    }
}
