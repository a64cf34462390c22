//! Incoming half of a session: window accounting and the index of
//! unsettled incoming deliveries.

use std::collections::BTreeMap;

use tracing::trace;

use crate::{
    endpoint::LinkHandle,
    error::{ProtocolViolation, Result},
    link::{Link, TransferFollowUp},
    performative::{Begin, DeliveryState, Disposition, Flow, Role, Transfer},
    pipeline::{OutboundFrame, Pipeline, emit},
    sequence::SequenceNumber,
};

/// Window size advertised when no incoming capacity bounds the session.
pub const UNBOUNDED_WINDOW: u32 = u32::MAX;

/// Incoming window, transfer-id and delivery-id tracking for one session.
#[derive(Clone, Debug, Default)]
pub struct SessionIncomingWindow {
    incoming_capacity: u32,
    max_frame_size: u32,
    incoming_window: u32,
    incoming_bytes: u64,
    next_incoming_id: SequenceNumber,
    next_delivery_id: SequenceNumber,
    remote_next_outgoing_id: SequenceNumber,
    remote_outgoing_window: u32,
    unsettled: BTreeMap<SequenceNumber, LinkHandle>,
}

impl SessionIncomingWindow {
    /// Window bound by `incoming_capacity` bytes of frames no larger than
    /// `max_frame_size`. Either value set to zero leaves the window unbounded.
    #[must_use]
    pub fn new(incoming_capacity: u32, max_frame_size: u32) -> Self {
        let mut window = Self {
            incoming_capacity,
            max_frame_size,
            ..Self::default()
        };
        window.update_incoming_window();
        window
    }

    #[must_use]
    pub const fn incoming_capacity(&self) -> u32 { self.incoming_capacity }

    pub(crate) fn set_incoming_capacity(&mut self, incoming_capacity: u32) {
        self.incoming_capacity = incoming_capacity;
        self.update_incoming_window();
    }

    /// Current window, as decremented by arriving transfers.
    #[must_use]
    pub const fn incoming_window(&self) -> u32 { self.incoming_window }

    /// Payload bytes received and not yet released by the application.
    #[must_use]
    pub const fn incoming_bytes(&self) -> u64 { self.incoming_bytes }

    #[must_use]
    pub const fn next_incoming_id(&self) -> SequenceNumber { self.next_incoming_id }

    /// Delivery-id the next new incoming delivery must carry.
    #[must_use]
    pub const fn next_delivery_id(&self) -> SequenceNumber { self.next_delivery_id }

    #[must_use]
    pub const fn remote_next_outgoing_id(&self) -> SequenceNumber { self.remote_next_outgoing_id }

    #[must_use]
    pub const fn remote_outgoing_window(&self) -> u32 { self.remote_outgoing_window }

    /// Whether delivery `id` awaits settlement.
    #[must_use]
    pub fn is_tracked(&self, id: SequenceNumber) -> bool { self.unsettled.contains_key(&id) }

    #[must_use]
    pub fn unsettled_len(&self) -> usize { self.unsettled.len() }

    /// Recompute the window from capacity and buffered bytes.
    pub fn update_incoming_window(&mut self) -> u32 {
        self.incoming_window = if self.incoming_capacity == 0 || self.max_frame_size == 0 {
            UNBOUNDED_WINDOW
        } else {
            let free = u64::from(self.incoming_capacity).saturating_sub(self.incoming_bytes);
            u32::try_from(free / u64::from(self.max_frame_size)).unwrap_or(UNBOUNDED_WINDOW)
        };
        self.incoming_window
    }

    /// Hand out the next incoming delivery-id, returning the value before the
    /// increment.
    pub(crate) fn increment_next_delivery_id(&mut self) -> SequenceNumber {
        self.next_delivery_id.post_increment()
    }

    pub(crate) fn track(&mut self, id: SequenceNumber, handle: LinkHandle) {
        self.unsettled.insert(id, handle);
    }

    pub(crate) fn untrack(&mut self, id: SequenceNumber) { self.unsettled.remove(&id); }

    /// Drop every index entry that belongs to a released link.
    pub(crate) fn forget_link(&mut self, handle: LinkHandle) {
        self.unsettled.retain(|_, owner| *owner != handle);
    }

    pub(crate) fn configure_outbound(&mut self, begin: &mut Begin) {
        begin.incoming_window = self.update_incoming_window();
    }

    pub(crate) fn handle_begin(&mut self, begin: &Begin) {
        self.remote_next_outgoing_id = begin.next_outgoing_id;
        self.remote_outgoing_window = begin.outgoing_window;
        self.next_incoming_id = begin.next_outgoing_id;
    }

    pub(crate) fn handle_flow(&mut self, flow: &Flow) {
        self.remote_next_outgoing_id = flow.next_outgoing_id;
        self.remote_outgoing_window = flow.outgoing_window;
    }

    /// Account for a Transfer and pass it to the link it addresses.
    pub(crate) fn handle_transfer(
        &mut self,
        link: &mut Link,
        transfer: &Transfer,
        payload: &[u8],
    ) -> std::result::Result<TransferFollowUp, ProtocolViolation> {
        if !transfer.aborted {
            self.incoming_bytes = self.incoming_bytes.saturating_add(payload.len() as u64);
        }
        self.incoming_window = self.incoming_window.saturating_sub(1);
        self.next_incoming_id = self.next_incoming_id.next();
        trace!(
            handle = transfer.handle,
            bytes = payload.len(),
            incoming_window = self.incoming_window,
            incoming_bytes = self.incoming_bytes,
            "session accepted transfer"
        );
        link.handle_transfer(self, transfer, payload)
    }

    /// Validate a Disposition and collect the tracked deliveries it covers.
    /// Settled entries leave the index.
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

    /// Release bytes the application consumed. Returns `true` when the
    /// release reopened a window that had closed.
    pub(crate) fn release_bytes(&mut self, released: usize) -> bool {
        if released == 0 {
            return false;
        }
        let was_closed = self.incoming_window == 0;
        self.incoming_bytes = self.incoming_bytes.saturating_sub(released as u64);
        let window = self.update_incoming_window();
        was_closed && window > 0
    }

    /// Announce the local state of an incoming delivery.
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
            role: Role::Receiver,
            first: id,
            last: None,
            settled,
            state,
            batchable: false,
        };
        emit(pipe, OutboundFrame::new(channel, disposition))
    }
}
