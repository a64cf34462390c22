//! Typed AMQP performatives and the values they carry.
//!
//! These are plain data structures. Converting them to and from the wire is
//! the job of the codec collaborator; the engine only reads and writes the
//! fields.

mod delivery_state;
mod terminus;
mod transaction;
mod transport;

use std::fmt;

pub use delivery_state::DeliveryState;
pub use terminus::{Coordinator, Source, Target, TargetTerminus};
pub use transaction::{AmqpValue, Declare, Discharge, TxnId};
pub use transport::{
    Attach,
    Begin,
    Close,
    Detach,
    Disposition,
    End,
    ErrorCondition,
    Flow,
    Open,
    ReceiverSettleMode,
    Role,
    SenderSettleMode,
    Transfer,
};

/// Symbolic constant as used for capabilities, property keys and error
/// condition names.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol from any string-like value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    /// Borrow the symbol text.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Any performative the engine consumes or produces.
#[derive(Clone, Debug, PartialEq)]
pub enum Performative {
    Open(Open),
    Begin(Begin),
    Attach(Attach),
    Flow(Flow),
    Transfer(Transfer),
    Disposition(Disposition),
    Detach(Detach),
    End(End),
    Close(Close),
}

impl Performative {
    /// Short name used in logs and metrics labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Open(_) => "open",
            Self::Begin(_) => "begin",
            Self::Attach(_) => "attach",
            Self::Flow(_) => "flow",
            Self::Transfer(_) => "transfer",
            Self::Disposition(_) => "disposition",
            Self::Detach(_) => "detach",
            Self::End(_) => "end",
            Self::Close(_) => "close",
        }
    }
}

macro_rules! impl_from_performative {
    ($($variant:ident),+ $(,)?) => {
        $(
            impl From<$variant> for Performative {
                fn from(value: $variant) -> Self { Self::$variant(value) }
            }
        )+
    };
}

impl_from_performative!(
    Open,
    Begin,
    Attach,
    Flow,
    Transfer,
    Disposition,
    Detach,
    End,
    Close
);
