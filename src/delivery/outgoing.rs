//! Sender-side view of a delivery.

use bytes::Bytes;

use crate::{endpoint::LinkId, performative::DeliveryState, sequence::SequenceNumber};

/// A delivery produced by a sender link.
///
/// Created by [`Engine::begin_message`](crate::Engine::begin_message) or
/// [`Engine::send`](crate::Engine::send); the delivery-id comes from the
/// session's outgoing delivery counter.
#[derive(Clone, Debug)]
pub struct OutgoingDelivery {
    link: LinkId,
    delivery_id: SequenceNumber,
    tag: Bytes,
    message_format: u32,
    local_state: Option<DeliveryState>,
    remote_state: Option<DeliveryState>,
    partial: bool,
    aborted: bool,
    settled: bool,
    remotely_settled: bool,
    transfers: u32,
    bytes_written: u64,
}

impl OutgoingDelivery {
    pub(crate) fn new(link: LinkId, delivery_id: SequenceNumber, tag: Bytes) -> Self {
        Self {
            link,
            delivery_id,
            tag,
            message_format: 0,
            local_state: None,
            remote_state: None,
            partial: true,
            aborted: false,
            settled: false,
            remotely_settled: false,
            transfers: 0,
            bytes_written: 0,
        }
    }

    #[must_use]
    pub const fn link(&self) -> LinkId { self.link }

    #[must_use]
    pub const fn delivery_id(&self) -> SequenceNumber { self.delivery_id }

    #[must_use]
    pub fn tag(&self) -> &[u8] { &self.tag }

    pub(crate) fn tag_bytes(&self) -> Bytes { self.tag.clone() }

    #[must_use]
    pub const fn message_format(&self) -> u32 { self.message_format }

    #[must_use]
    pub const fn local_state(&self) -> Option<&DeliveryState> { self.local_state.as_ref() }

    #[must_use]
    pub const fn remote_state(&self) -> Option<&DeliveryState> { self.remote_state.as_ref() }

    /// `true` while more payload is expected from the application.
    #[must_use]
    pub const fn is_partial(&self) -> bool { self.partial }

    #[must_use]
    pub const fn is_aborted(&self) -> bool { self.aborted }

    #[must_use]
    pub const fn is_settled(&self) -> bool { self.settled }

    #[must_use]
    pub const fn is_remotely_settled(&self) -> bool { self.remotely_settled }

    /// Number of Transfer frames written for this delivery.
    #[must_use]
    pub const fn transfer_count(&self) -> u32 { self.transfers }

    /// Total payload bytes written for this delivery.
    #[must_use]
    pub const fn bytes_written(&self) -> u64 { self.bytes_written }

    pub(crate) fn set_message_format(&mut self, message_format: u32) {
        self.message_format = message_format;
    }

    pub(crate) fn set_local_state(&mut self, state: Option<DeliveryState>) {
        if state.is_some() {
            self.local_state = state;
        }
    }

    pub(crate) fn set_remote_state(&mut self, state: DeliveryState) { self.remote_state = Some(state); }

    pub(crate) fn mark_settled(&mut self) { self.settled = true; }

    pub(crate) fn mark_remotely_settled(&mut self) { self.remotely_settled = true; }

    pub(crate) fn mark_completed(&mut self) { self.partial = false; }

    pub(crate) fn mark_aborted(&mut self) {
        self.aborted = true;
        self.partial = false;
    }

    pub(crate) fn after_transfer_written(&mut self, len: usize) {
        self.transfers = self.transfers.saturating_add(1);
        self.bytes_written = self.bytes_written.saturating_add(len as u64);
    }
}
