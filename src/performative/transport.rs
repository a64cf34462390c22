//! Transport-layer performatives.

use std::{collections::BTreeMap, time::Duration};

use bytes::Bytes;

use super::{DeliveryState, Source, Symbol, Target};
use crate::sequence::SequenceNumber;

/// Which end of a link a peer plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    /// The role the peer on the other end of the link plays.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Sender => Self::Receiver,
            Self::Receiver => Self::Sender,
        }
    }
}

/// Settlement policy of the sending end of a link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SenderSettleMode {
    Unsettled,
    Settled,
    #[default]
    Mixed,
}

/// Settlement policy of the receiving end of a link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReceiverSettleMode {
    #[default]
    First,
    Second,
}

/// Error information attached to a closing endpoint or a rejected delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorCondition {
    pub condition: Symbol,
    pub description: Option<String>,
}

impl ErrorCondition {
    /// Build a condition with a description.
    #[must_use]
    pub fn new(condition: impl Into<Symbol>, description: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            description: Some(description.into()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Open {
    pub container_id: String,
    pub hostname: Option<String>,
    pub max_frame_size: u32,
    pub channel_max: u16,
    pub idle_timeout: Option<Duration>,
    pub offered_capabilities: Vec<Symbol>,
    pub desired_capabilities: Vec<Symbol>,
    pub properties: BTreeMap<Symbol, String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Begin {
    /// Set when answering a Begin initiated by the peer.
    pub remote_channel: Option<u16>,
    pub next_outgoing_id: SequenceNumber,
    pub incoming_window: u32,
    pub outgoing_window: u32,
    pub handle_max: u32,
    pub offered_capabilities: Vec<Symbol>,
    pub desired_capabilities: Vec<Symbol>,
    pub properties: BTreeMap<Symbol, String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Attach {
    pub name: String,
    pub handle: u32,
    pub role: Role,
    pub snd_settle_mode: SenderSettleMode,
    pub rcv_settle_mode: ReceiverSettleMode,
    pub source: Option<Source>,
    pub target: Option<Target>,
    /// Required when `role` is [`Role::Sender`].
    pub initial_delivery_count: Option<SequenceNumber>,
    pub offered_capabilities: Vec<Symbol>,
    pub desired_capabilities: Vec<Symbol>,
    pub properties: BTreeMap<Symbol, String>,
}

impl Attach {
    /// Minimal Attach for `name` on `handle`.
    #[must_use]
    pub fn new(name: impl Into<String>, handle: u32, role: Role) -> Self {
        Self {
            name: name.into(),
            handle,
            role,
            snd_settle_mode: SenderSettleMode::default(),
            rcv_settle_mode: ReceiverSettleMode::default(),
            source: None,
            target: None,
            initial_delivery_count: None,
            offered_capabilities: Vec::new(),
            desired_capabilities: Vec::new(),
            properties: BTreeMap::new(),
        }
    }
}

/// Session and (optionally) link flow state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Flow {
    pub next_incoming_id: Option<SequenceNumber>,
    pub incoming_window: u32,
    pub next_outgoing_id: SequenceNumber,
    pub outgoing_window: u32,
    /// Present when the Flow carries link state.
    pub handle: Option<u32>,
    pub delivery_count: Option<SequenceNumber>,
    pub link_credit: Option<u32>,
    pub available: Option<u32>,
    pub drain: bool,
    pub echo: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transfer {
    pub handle: u32,
    /// Required on the first Transfer of a delivery.
    pub delivery_id: Option<SequenceNumber>,
    pub delivery_tag: Option<Bytes>,
    pub message_format: Option<u32>,
    pub settled: bool,
    pub more: bool,
    pub rcv_settle_mode: Option<ReceiverSettleMode>,
    pub state: Option<DeliveryState>,
    pub resume: bool,
    pub aborted: bool,
    pub batchable: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Disposition {
    pub role: Role,
    pub first: SequenceNumber,
    /// Defaults to `first` when absent.
    pub last: Option<SequenceNumber>,
    pub settled: bool,
    pub state: Option<DeliveryState>,
    pub batchable: bool,
}

impl Disposition {
    /// The inclusive upper bound of the disposition range.
    #[must_use]
    pub fn last_or_first(&self) -> SequenceNumber { self.last.unwrap_or(self.first) }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Detach {
    pub handle: u32,
    pub closed: bool,
    pub error: Option<ErrorCondition>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct End {
    pub error: Option<ErrorCondition>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Close {
    pub error: Option<ErrorCondition>,
}
