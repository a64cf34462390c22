//! Link credit accounting for both link roles.
//!
//! [`ReceiverCreditState`] owns the receiver's unsettled deliveries and turns
//! inbound Transfer frames into deliveries, enforcing the session-wide
//! delivery-id sequence. [`SenderCreditState`] derives usable credit from the
//! peer's Flow frames.

use std::collections::BTreeMap;

use tracing::trace;

use crate::{
    delivery::{DeliveryIdTracker, IncomingDelivery},
    endpoint::LinkId,
    error::ProtocolViolation,
    performative::{Disposition, Flow, Transfer},
    sequence::SequenceNumber,
    session::SessionIncomingWindow,
};

/// What a Transfer did to the receiver's deliveries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TransferOutcome {
    pub delivery_id: SequenceNumber,
    /// The frame started a new delivery.
    pub first: bool,
    /// The frame completed (or aborted) the delivery.
    pub done: bool,
    /// Bytes dropped because the delivery was already settled locally.
    pub released: usize,
}

/// Credit, delivery-count and unsettled deliveries of a receiver link.
#[derive(Clone, Debug, Default)]
pub struct ReceiverCreditState {
    credit: u32,
    delivery_count: SequenceNumber,
    drain: bool,
    current: DeliveryIdTracker,
    deliveries: BTreeMap<SequenceNumber, IncomingDelivery>,
}

impl ReceiverCreditState {
    #[must_use]
    pub const fn credit(&self) -> u32 { self.credit }

    #[must_use]
    pub const fn delivery_count(&self) -> SequenceNumber { self.delivery_count }

    /// Whether a drain request is outstanding.
    #[must_use]
    pub const fn is_draining(&self) -> bool { self.drain }

    /// The delivery currently being received in several frames, if any.
    #[must_use]
    pub const fn current_delivery(&self) -> Option<SequenceNumber> { self.current.get() }

    /// Number of deliveries held by the link.
    #[must_use]
    pub fn unsettled_len(&self) -> usize { self.deliveries.len() }

    /// Copy of the credit and delivery-count without deliveries or the
    /// multiplex tracker.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self {
            credit: self.credit,
            delivery_count: self.delivery_count,
            drain: self.drain,
            current: DeliveryIdTracker::new(),
            deliveries: BTreeMap::new(),
        }
    }

    pub(crate) fn delivery(&self, id: SequenceNumber) -> Option<&IncomingDelivery> {
        self.deliveries.get(&id)
    }

    pub(crate) fn delivery_mut(&mut self, id: SequenceNumber) -> Option<&mut IncomingDelivery> {
        self.deliveries.get_mut(&id)
    }

    pub(crate) fn remove_delivery(&mut self, id: SequenceNumber) -> Option<IncomingDelivery> {
        self.deliveries.remove(&id)
    }

    pub(crate) fn deliveries(&self) -> impl Iterator<Item = &IncomingDelivery> {
        self.deliveries.values()
    }

    /// Replace the credit. Returns whether the value changed.
    pub(crate) fn set_credit(&mut self, credit: u32) -> bool {
        if self.credit == credit {
            return false;
        }
        self.credit = credit;
        true
    }

    /// Grant `additional` credit. Returns whether the value changed.
    pub(crate) fn add_credit(&mut self, additional: u32) -> bool {
        let credit = self.credit.saturating_add(additional);
        self.set_credit(credit)
    }

    pub(crate) fn request_drain(&mut self) { self.drain = true; }

    pub(crate) fn set_initial_delivery_count(&mut self, delivery_count: SequenceNumber) {
        self.delivery_count = delivery_count;
    }

    /// Apply a link Flow. Returns `true` when the Flow answered a drain.
    pub(crate) fn handle_flow(&mut self, flow: &Flow) -> Result<bool, ProtocolViolation> {
        if !flow.drain {
            return Ok(false);
        }
        if let Some(delivery_count) = flow.delivery_count {
            self.delivery_count = delivery_count;
        }
        self.credit = flow.link_credit.unwrap_or(0);
        if self.credit != 0 {
            return Err(ProtocolViolation::DrainCreditNotZero {
                credit: self.credit,
            });
        }
        self.drain = false;
        Ok(true)
    }

    /// Fold a Transfer into the link's deliveries.
    ///
    /// # Errors
    ///
    /// Fails when a new delivery omits its delivery-id, starts while another
    /// delivery is still being received, or breaks the session's delivery-id
    /// sequence.
    pub(crate) fn handle_transfer(
        &mut self,
        link: LinkId,
        window: &mut SessionIncomingWindow,
        transfer: &Transfer,
        payload: &[u8],
    ) -> Result<TransferOutcome, ProtocolViolation> {
        let continuing = self
            .current
            .get()
            .filter(|_| transfer.delivery_id.is_none_or(|id| self.current.is(id)));

        let (delivery_id, first) = match continuing {
            Some(current) => (current, false),
            None => (self.start_delivery(link, window, transfer)?, true),
        };

        let delivery = self
            .deliveries
            .get_mut(&delivery_id)
            .ok_or(ProtocolViolation::UnknownContinuation { delivery_id })?;

        if let Some(state) = &transfer.state {
            delivery.set_remote_state(state.clone());
        }
        if transfer.settled || transfer.aborted {
            delivery.mark_remotely_settled();
        }
        delivery.append_payload(if transfer.aborted { &[] } else { payload });

        if delivery.is_remotely_settled() {
            window.untrack(delivery_id);
        } else if first {
            window.track(delivery_id, link.handle);
        }

        let done = transfer.aborted || !transfer.more;
        if done {
            if transfer.aborted {
                delivery.mark_aborted();
            } else {
                delivery.mark_completed();
            }
            self.credit = self.credit.saturating_sub(1);
            self.delivery_count = self.delivery_count.next();
            self.current.reset();
        } else {
            self.current.set(delivery_id);
        }
        trace!(
            %link,
            %delivery_id,
            first,
            done,
            credit = self.credit,
            "receiver applied transfer"
        );
        Ok(TransferOutcome {
            delivery_id,
            first,
            done,
            released: 0,
        })
    }

    fn start_delivery(
        &mut self,
        link: LinkId,
        window: &mut SessionIncomingWindow,
        transfer: &Transfer,
    ) -> Result<SequenceNumber, ProtocolViolation> {
        let found = transfer
            .delivery_id
            .ok_or(ProtocolViolation::MissingDeliveryId)?;
        if let Some(current) = self.current.get() {
            return Err(ProtocolViolation::IllegalMultiplex { current, found });
        }
        let expected = window.increment_next_delivery_id();
        if expected != found {
            return Err(ProtocolViolation::DeliveryIdMismatch { expected, found });
        }
        let delivery = IncomingDelivery::new(
            link,
            found,
            transfer.delivery_tag.clone().unwrap_or_default(),
            transfer.message_format.unwrap_or(0),
        );
        self.deliveries.insert(found, delivery);
        Ok(found)
    }

    /// Apply a remote Disposition to one delivery. Returns whether anything
    /// about the delivery changed.
    pub(crate) fn handle_disposition(&mut self, disposition: &Disposition, id: SequenceNumber) -> bool {
        let Some(delivery) = self.deliveries.get_mut(&id) else {
            return false;
        };
        let mut updated = false;
        if let Some(state) = disposition
            .state
            .as_ref()
            .filter(|state| delivery.remote_state() != Some(*state))
        {
            delivery.set_remote_state(state.clone());
            updated = true;
        }
        if disposition.settled && !delivery.is_remotely_settled() {
            delivery.mark_remotely_settled();
            updated = true;
        }
        updated
    }
}

/// Credit and delivery-count of a sender link.
#[derive(Clone, Debug, Default)]
pub struct SenderCreditState {
    credit: u32,
    delivery_count: SequenceNumber,
    initial_delivery_count: SequenceNumber,
    drain: bool,
    available: u32,
}

impl SenderCreditState {
    #[must_use]
    pub const fn credit(&self) -> u32 { self.credit }

    #[must_use]
    pub const fn delivery_count(&self) -> SequenceNumber { self.delivery_count }

    /// Delivery-count announced in the sender's Attach.
    #[must_use]
    pub const fn initial_delivery_count(&self) -> SequenceNumber { self.initial_delivery_count }

    /// Whether the receiver asked the sender to drain.
    #[must_use]
    pub const fn is_draining(&self) -> bool { self.drain }

    /// Number of deliveries the application reported as ready to send.
    #[must_use]
    pub const fn available(&self) -> u32 { self.available }

    pub(crate) fn set_available(&mut self, available: u32) { self.available = available; }

    /// Recompute credit from a link Flow. Returns whether a drain was
    /// requested.
    ///
    /// Credit is `remote delivery-count + link-credit - local delivery-count`
    /// in serial arithmetic, floored at zero when deliveries in flight have
    /// already used everything the peer granted.
    pub(crate) fn handle_flow(&mut self, flow: &Flow) -> bool {
        let remote_count = flow.delivery_count.unwrap_or(self.initial_delivery_count);
        let limit = remote_count.wrapping_add(flow.link_credit.unwrap_or(0));
        self.credit = if self.delivery_count.precedes(limit) {
            self.delivery_count.distance_to(limit)
        } else {
            0
        };
        self.drain = flow.drain;
        flow.drain
    }

    /// Consume one credit for a delivery put on the wire.
    pub(crate) fn consume(&mut self) {
        self.credit = self.credit.saturating_sub(1);
        self.delivery_count = self.delivery_count.next();
    }

    /// Use up all remaining credit in answer to a drain request.
    pub(crate) fn drained(&mut self) {
        self.delivery_count = self.delivery_count.wrapping_add(self.credit);
        self.credit = 0;
        self.drain = false;
    }
}
