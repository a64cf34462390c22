//! Canonical error and result types for the crate.
//!
//! Errors fall into two tiers. [`EngineStateError`] reports a local
//! precondition failure (for example adding credit to a closed link) and
//! leaves the engine untouched. [`ProtocolViolation`] and transport failures
//! are fatal: the engine records them and every later call returns
//! [`EngineError::Failed`].

use std::{io, sync::Arc};

use thiserror::Error;

use crate::{
    endpoint::{LinkId, SessionId},
    sequence::SequenceNumber,
};

/// Misbehaviour detected while processing input from the remote peer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolViolation {
    /// The first Transfer of a delivery carried no delivery-id.
    #[error("no delivery-id specified on first transfer of new delivery")]
    MissingDeliveryId,
    /// A new delivery did not use the next delivery-id of the session.
    #[error("expected delivery-id {expected}, got {found}")]
    DeliveryIdMismatch {
        expected: SequenceNumber,
        found: SequenceNumber,
    },
    /// A second delivery started on a link before the first completed.
    #[error("illegal multiplex of deliveries on same link with delivery-id {current} and {found}")]
    IllegalMultiplex {
        current: SequenceNumber,
        found: SequenceNumber,
    },
    /// A continuation referenced a delivery the link no longer tracks.
    #[error("continuation for untracked delivery-id {delivery_id}")]
    UnknownContinuation { delivery_id: SequenceNumber },
    /// A Disposition range ended before it started.
    #[error("disposition with mismatched first and last delivery-ids: [{first}, {last}]")]
    InvalidDispositionRange {
        first: SequenceNumber,
        last: SequenceNumber,
    },
    /// The answer to a drain request left credit outstanding.
    #[error("receiver read flow with drain set but credit was {credit}")]
    DrainCreditNotZero { credit: u32 },
    /// A coordinator link received a body other than Declare or Discharge.
    #[error("transaction coordinator expects declare and discharge payloads only, got {kind}")]
    UnexpectedCoordinatorPayload { kind: &'static str },
    /// The coordinator payload could not be decoded.
    #[error("undecodable coordinator payload: {reason}")]
    UndecodablePayload { reason: String },
    /// A frame arrived on a channel that no session is mapped to.
    #[error("frame received on unmapped channel {channel}")]
    UnknownChannel { channel: u16 },
    /// A frame referenced a link handle that is not attached.
    #[error("frame received for unattached handle {handle}")]
    UnknownHandle { handle: u32 },
    /// A Transfer arrived on a link for which this end is the sender.
    #[error("transfer received on sending link with handle {handle}")]
    TransferOnSender { handle: u32 },
    /// A second Begin or Open arrived for an endpoint already open.
    #[error("{endpoint} opened twice by the remote peer")]
    DuplicateOpen { endpoint: &'static str },
    /// A performative arrived before the connection was opened.
    #[error("{performative} received before open")]
    NotOpened { performative: &'static str },
    /// A remote Begin needed a channel above channel-max.
    #[error("remote begin exceeds channel-max {channel_max}")]
    ChannelMaxExceeded { channel_max: u16 },
    /// A remote Attach needed a handle above handle-max.
    #[error("remote attach exceeds handle-max {handle_max}")]
    HandleMaxExceeded { handle_max: u32 },
    /// A remote Attach reused the name of a link playing the same role.
    #[error("remote attach reuses link name {name:?}")]
    DuplicateLinkName { name: String },
    /// A remote Begin or Attach arrived for a parent that cannot take it.
    #[error("remote {endpoint} refused: {reason}")]
    RefusedOpen { endpoint: &'static str, reason: String },
}

impl ProtocolViolation {
    /// Recast the failure to create an endpoint the peer opened.
    pub(crate) fn remote_open(endpoint: &'static str, error: EngineStateError) -> Self {
        match error {
            EngineStateError::ChannelsExhausted { channel_max } => Self::ChannelMaxExceeded { channel_max },
            EngineStateError::HandlesExhausted { handle_max } => Self::HandleMaxExceeded { handle_max },
            EngineStateError::DuplicateLinkName(name) => Self::DuplicateLinkName { name },
            other => Self::RefusedOpen {
                endpoint,
                reason: other.to_string(),
            },
        }
    }
}

/// Local precondition failures reported to the caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineStateError {
    /// The engine has not been started.
    #[error("engine not started")]
    NotStarted,
    /// The engine was shut down.
    #[error("engine is shut down")]
    Shutdown,
    /// The endpoint was already locally opened.
    #[error("{endpoint} is already open")]
    AlreadyOpen { endpoint: &'static str },
    /// The endpoint was already locally closed.
    #[error("{endpoint} is closed")]
    Closed { endpoint: &'static str },
    /// The endpoint has not been opened locally.
    #[error("{endpoint} is not open")]
    NotOpen { endpoint: &'static str },
    /// The session identifier is unknown.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    /// The link identifier is unknown.
    #[error("unknown link {0}")]
    UnknownLink(LinkId),
    /// The delivery is not tracked by the link.
    #[error("link {link} has no delivery {delivery_id}")]
    UnknownDelivery {
        link: LinkId,
        delivery_id: SequenceNumber,
    },
    /// The operation requires a different kind of link.
    #[error("link {link} is not a {expected}")]
    WrongLinkKind {
        link: LinkId,
        expected: &'static str,
    },
    /// The sender has no credit to start another delivery.
    #[error("link {0} has no credit")]
    NoCredit(LinkId),
    /// A streamed delivery is already in progress on the sender.
    #[error("link {0} already has a delivery in progress")]
    DeliveryInProgress(LinkId),
    /// No streamed delivery is in progress on the sender.
    #[error("link {0} has no delivery in progress")]
    NoCurrentDelivery(LinkId),
    /// The delivery was already settled locally.
    #[error("delivery {0} is already settled")]
    AlreadySettled(SequenceNumber),
    /// No more channels are available on the connection.
    #[error("channel-max {channel_max} exhausted")]
    ChannelsExhausted { channel_max: u16 },
    /// No more handles are available on the session.
    #[error("handle-max {handle_max} exhausted")]
    HandlesExhausted { handle_max: u32 },
    /// A link with the same name already exists on the session.
    #[error("link name {0:?} already in use")]
    DuplicateLinkName(String),
    /// The transaction is unknown to the coordinator.
    #[error("unknown transaction {0}")]
    UnknownTransaction(String),
    /// The transaction is not in a state that allows the operation.
    #[error("transaction {txn} cannot be {action} in its current state")]
    TransactionState {
        txn: String,
        action: &'static str,
    },
}

/// Configuration rejected by [`EngineConfig::validate`](crate::EngineConfig::validate).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The container id must not be empty.
    #[error("container id must not be empty")]
    EmptyContainerId,
}

/// Top-level error type exposed by the engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A local precondition failed; engine state is unchanged.
    #[error("engine state error: {0}")]
    State(#[from] EngineStateError),
    /// The remote peer violated the protocol.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
    /// The transport collaborator failed to accept a frame.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// The engine already failed; carries the original cause.
    #[error("engine failed: {0}")]
    Failed(Arc<EngineError>),
}

impl EngineError {
    /// Whether this error must move the engine into its failed state.
    #[must_use]
    pub const fn is_fatal(&self) -> bool { matches!(self, Self::Protocol(_) | Self::Transport(_)) }

    /// The protocol violation behind this error, looking through
    /// [`EngineError::Failed`].
    #[must_use]
    pub fn protocol_violation(&self) -> Option<&ProtocolViolation> {
        match self {
            Self::Protocol(violation) => Some(violation),
            Self::Failed(cause) => cause.protocol_violation(),
            _ => None,
        }
    }

    /// The local state error behind this error, if any.
    #[must_use]
    pub const fn state_error(&self) -> Option<&EngineStateError> {
        match self {
            Self::State(error) => Some(error),
            _ => None,
        }
    }
}

/// Canonical result alias used by engine APIs.
pub type Result<T> = std::result::Result<T, EngineError>;
