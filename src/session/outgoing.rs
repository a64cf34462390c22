//! Outgoing half of a session: delivery-id assignment, the remote incoming
//! window and fragmentation of deliveries into Transfer frames.

use std::collections::BTreeMap;

use bytes::Bytes;
use tracing::trace;

use super::incoming::UNBOUNDED_WINDOW;
use crate::{
    delivery::OutgoingDelivery,
    endpoint::LinkHandle,
    error::{ProtocolViolation, Result},
    performative::{Begin, DeliveryState, Disposition, Flow, Role, Transfer},
    pipeline::{OutboundFrame, Pipeline, emit},
    sequence::SequenceNumber,
};

/// Outgoing window and unsettled index of outgoing deliveries.
#[derive(Clone, Debug)]
pub struct SessionOutgoingWindow {
    next_delivery_id: SequenceNumber,
    next_outgoing_id: SequenceNumber,
    outgoing_window: u32,
    outgoing_bytes: u64,
    remote_incoming_window: u32,
    remote_next_incoming_id: SequenceNumber,
    max_frame_size: u32,
    unsettled: BTreeMap<SequenceNumber, LinkHandle>,
}

impl Default for SessionOutgoingWindow {
    fn default() -> Self {
        Self {
            next_delivery_id: SequenceNumber::default(),
            next_outgoing_id: SequenceNumber::default(),
            outgoing_window: UNBOUNDED_WINDOW,
            outgoing_bytes: 0,
            remote_incoming_window: 0,
            remote_next_incoming_id: SequenceNumber::default(),
            max_frame_size: 0,
            unsettled: BTreeMap::new(),
        }
    }
}

impl SessionOutgoingWindow {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub const fn next_outgoing_id(&self) -> SequenceNumber { self.next_outgoing_id }

    /// Delivery-id the next outgoing delivery will receive.
    #[must_use]
    pub const fn next_delivery_id(&self) -> SequenceNumber { self.next_delivery_id }

    #[must_use]
    pub const fn outgoing_window(&self) -> u32 { self.outgoing_window }

    /// Payload bytes written by this session.
    #[must_use]
    pub const fn outgoing_bytes(&self) -> u64 { self.outgoing_bytes }

    #[must_use]
    pub const fn remote_incoming_window(&self) -> u32 { self.remote_incoming_window }

    #[must_use]
    pub const fn remote_next_incoming_id(&self) -> SequenceNumber { self.remote_next_incoming_id }

    /// Largest payload per Transfer; `0` disables fragmentation.
    #[must_use]
    pub const fn max_frame_size(&self) -> u32 { self.max_frame_size }

    #[must_use]
    pub fn is_tracked(&self, id: SequenceNumber) -> bool { self.unsettled.contains_key(&id) }

    #[must_use]
    pub fn unsettled_len(&self) -> usize { self.unsettled.len() }

    /// Drop every index entry that belongs to a released link.
    pub(crate) fn forget_link(&mut self, handle: LinkHandle) {
        self.unsettled.retain(|_, owner| *owner != handle);
    }

    /// Fix the frame size and stamp the outgoing Begin.
    pub(crate) fn configure_outbound(&mut self, begin: &mut Begin, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
        begin.next_outgoing_id = self.next_outgoing_id;
        begin.outgoing_window = self.outgoing_window;
    }

    pub(crate) fn get_and_increment_next_delivery_id(&mut self) -> SequenceNumber {
        self.next_delivery_id.post_increment()
    }

    pub(crate) fn handle_begin(&mut self, begin: &Begin) {
        self.remote_incoming_window = begin.incoming_window;
    }

    pub(crate) fn handle_flow(&mut self, flow: &Flow) {
        self.remote_incoming_window = match flow.next_incoming_id {
            Some(next_incoming_id) => {
                self.remote_next_incoming_id = next_incoming_id;
                next_incoming_id
                    .wrapping_add(flow.incoming_window)
                    .get()
                    .wrapping_sub(self.next_outgoing_id.get())
            }
            None => flow.incoming_window,
        };
    }

    /// Validate a Disposition and collect the tracked deliveries it covers.
    pub(crate) fn handle_disposition(
        &mut self,
        disposition: &Disposition,
    ) -> std::result::Result<Vec<(SequenceNumber, LinkHandle)>, ProtocolViolation> {
        let first = disposition.first;
        let last = disposition.last_or_first();
        if last < first {
            return Err(ProtocolViolation::InvalidDispositionRange { first, last });
        }
        let affected: Vec<_> = self
            .unsettled
            .range(first..=last)
            .map(|(id, handle)| (*id, *handle))
            .collect();
        if disposition.settled {
            for (id, _) in &affected {
                self.unsettled.remove(id);
            }
        }
        Ok(affected)
    }

    /// Write `payload` for `delivery` as one or more Transfer frames.
    ///
    /// Each frame carries at most `max_frame_size` payload bytes. `more` is
    /// set on every frame but the last, and on the last too while the
    /// delivery is still partial. At least one frame is always written.
    pub(crate) fn process_send(
        &mut self,
        channel: u16,
        handle: LinkHandle,
        delivery: &mut OutgoingDelivery,
        mut payload: Bytes,
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        let id = delivery.delivery_id();
        if !delivery.is_settled() {
            self.unsettled.insert(id, handle);
        }
        let chunk_size = match self.max_frame_size {
            0 => usize::MAX,
            size => usize::try_from(size).unwrap_or(usize::MAX),
        };
        loop {
            let chunk = payload.split_to(payload.len().min(chunk_size));
            let transfer = Transfer {
                handle: handle.0,
                delivery_id: Some(id),
                delivery_tag: Some(delivery.tag_bytes()),
                message_format: Some(delivery.message_format()),
                settled: delivery.is_settled(),
                more: !payload.is_empty() || delivery.is_partial(),
                state: delivery.local_state().cloned(),
                ..Transfer::default()
            };
            let len = chunk.len();
            let mut frame = OutboundFrame::new(channel, transfer);
            if len > 0 {
                frame = frame.with_payload(chunk);
            }
            emit(pipe, frame)?;
            delivery.after_transfer_written(len);
            self.next_outgoing_id = self.next_outgoing_id.next();
            self.remote_incoming_window = self.remote_incoming_window.saturating_sub(1);
            self.outgoing_bytes = self.outgoing_bytes.saturating_add(len as u64);
            trace!(
                channel,
                %id,
                bytes = len,
                remote_incoming_window = self.remote_incoming_window,
                "session wrote transfer"
            );
            if payload.is_empty() {
                return Ok(());
            }
        }
    }

    /// Announce the local state of an outgoing delivery.
    pub(crate) fn process_disposition(
        &mut self,
        channel: u16,
        id: SequenceNumber,
        state: Option<DeliveryState>,
        settled: bool,
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        if settled {
            self.unsettled.remove(&id);
        }
        let disposition = Disposition {
            role: Role::Sender,
            first: id,
            last: None,
            settled,
            state,
            batchable: false,
        };
        emit(pipe, OutboundFrame::new(channel, disposition))
    }

    /// Tell the peer a partly written delivery was abandoned.
    pub(crate) fn process_abort(
        &mut self,
        channel: u16,
        handle: LinkHandle,
        delivery: &OutgoingDelivery,
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        self.unsettled.remove(&delivery.delivery_id());
        let transfer = Transfer {
            handle: handle.0,
            delivery_id: Some(delivery.delivery_id()),
            delivery_tag: Some(delivery.tag_bytes()),
            settled: false,
            more: false,
            state: None,
            aborted: true,
            ..Transfer::default()
        };
        emit(pipe, OutboundFrame::new(channel, transfer))?;
        self.next_outgoing_id = self.next_outgoing_id.next();
        self.remote_incoming_window = self.remote_incoming_window.saturating_sub(1);
        Ok(())
    }
}
