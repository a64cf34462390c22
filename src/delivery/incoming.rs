//! Receiver-side view of a delivery.

use bytes::{Bytes, BytesMut};

use crate::{endpoint::LinkId, performative::DeliveryState, sequence::SequenceNumber};

/// A delivery being (or already) received on a receiver link.
///
/// The payload is an owned accumulator: each Transfer appends to it and the
/// application drains it through
/// [`Engine::read_delivery`](crate::Engine::read_delivery).
#[derive(Clone, Debug)]
pub struct IncomingDelivery {
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
    payload: BytesMut,
}

impl IncomingDelivery {
    pub(crate) fn new(
        link: LinkId,
        delivery_id: SequenceNumber,
        tag: Bytes,
        message_format: u32,
    ) -> Self {
        Self {
            link,
            delivery_id,
            tag,
            message_format,
            local_state: None,
            remote_state: None,
            partial: true,
            aborted: false,
            settled: false,
            remotely_settled: false,
            transfers: 0,
            payload: BytesMut::new(),
        }
    }

    #[must_use]
    pub const fn link(&self) -> LinkId { self.link }

    #[must_use]
    pub const fn delivery_id(&self) -> SequenceNumber { self.delivery_id }

    #[must_use]
    pub fn tag(&self) -> &[u8] { &self.tag }

    #[must_use]
    pub const fn message_format(&self) -> u32 { self.message_format }

    #[must_use]
    pub const fn local_state(&self) -> Option<&DeliveryState> { self.local_state.as_ref() }

    #[must_use]
    pub const fn remote_state(&self) -> Option<&DeliveryState> { self.remote_state.as_ref() }

    /// `true` until the final Transfer arrives. Aborted deliveries stay
    /// partial.
    #[must_use]
    pub const fn is_partial(&self) -> bool { self.partial }

    #[must_use]
    pub const fn is_aborted(&self) -> bool { self.aborted }

    /// Whether the local application settled the delivery.
    #[must_use]
    pub const fn is_settled(&self) -> bool { self.settled }

    #[must_use]
    pub const fn is_remotely_settled(&self) -> bool { self.remotely_settled }

    /// Number of Transfer frames that contributed to this delivery.
    #[must_use]
    pub const fn transfer_count(&self) -> u32 { self.transfers }

    /// Number of payload bytes buffered and not yet read.
    #[must_use]
    pub fn available(&self) -> usize { self.payload.len() }

    /// Borrow the buffered payload without consuming it.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    pub(crate) fn append_payload(&mut self, chunk: &[u8]) {
        self.transfers = self.transfers.saturating_add(1);
        self.payload.extend_from_slice(chunk);
    }

    /// Take every buffered byte, leaving the accumulator empty.
    pub(crate) fn read_all(&mut self) -> Bytes { self.payload.split().freeze() }

    pub(crate) fn mark_completed(&mut self) { self.partial = false; }

    pub(crate) fn mark_aborted(&mut self) { self.aborted = true; }

    pub(crate) fn set_remote_state(&mut self, state: DeliveryState) { self.remote_state = Some(state); }

    pub(crate) fn mark_remotely_settled(&mut self) { self.remotely_settled = true; }

    pub(crate) fn set_local_state(&mut self, state: Option<DeliveryState>) {
        if state.is_some() {
            self.local_state = state;
        }
    }

    pub(crate) fn mark_settled(&mut self) { self.settled = true; }
}
