//! Receiving end of a link.

use bytes::Bytes;
use tracing::debug;

use super::{CreditEvent, LinkEndpoint, ReceiverCreditState, TransferOutcome};
use crate::{
    delivery::{DeliveryEvent, IncomingDelivery},
    endpoint::LinkId,
    error::{EngineStateError, ProtocolViolation},
    event::EventTable,
    metrics,
    performative::{Attach, DeliveryState, Disposition, Flow, Role, Transfer},
    sequence::SequenceNumber,
    session::SessionIncomingWindow,
};

/// Outcome of a local disposition the session must put on the wire.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct LocalDisposition {
    pub state: Option<DeliveryState>,
    pub settled: bool,
    /// Buffered bytes dropped because the delivery was settled.
    pub released: usize,
}

/// A link on which this end receives deliveries.
#[derive(Debug)]
pub struct Receiver {
    endpoint: LinkEndpoint,
    credit: ReceiverCreditState,
    delivery_events: EventTable<DeliveryEvent, IncomingDelivery>,
    credit_events: EventTable<CreditEvent, ReceiverCreditState>,
}

impl Receiver {
    pub(crate) fn new(id: LinkId, name: impl Into<String>) -> Self {
        Self {
            endpoint: LinkEndpoint::new(id, name, Role::Receiver),
            credit: ReceiverCreditState::default(),
            delivery_events: EventTable::new(),
            credit_events: EventTable::new(),
        }
    }

    #[must_use]
    pub const fn endpoint(&self) -> &LinkEndpoint { &self.endpoint }

    pub fn endpoint_mut(&mut self) -> &mut LinkEndpoint { &mut self.endpoint }

    #[must_use]
    pub const fn credit_state(&self) -> &ReceiverCreditState { &self.credit }

    #[must_use]
    pub const fn credit(&self) -> u32 { self.credit.credit() }

    /// Look up a delivery still held by the link.
    #[must_use]
    pub fn delivery(&self, id: SequenceNumber) -> Option<&IncomingDelivery> { self.credit.delivery(id) }

    /// Deliveries held by the link in delivery-id order.
    pub fn deliveries(&self) -> impl Iterator<Item = &IncomingDelivery> { self.credit.deliveries() }

    /// Register a handler for delivery arrivals or updates.
    pub fn on_delivery<F>(&mut self, kind: DeliveryEvent, handler: F)
    where
        F: FnMut(&IncomingDelivery) + Send + 'static,
    {
        self.delivery_events.register(kind, handler);
    }

    /// Register a handler fired when the sender answers a drain request.
    pub fn on_drained<F>(&mut self, handler: F)
    where
        F: FnMut(&ReceiverCreditState) + Send + 'static,
    {
        self.credit_events.register(CreditEvent::Drained, handler);
    }

    /// Whether a credit change must be announced to the peer right away.
    pub(crate) fn announces_credit(&self) -> bool {
        self.endpoint.state().is_locally_open() && self.endpoint.state().is_remotely_open()
    }

    pub(crate) fn set_credit(&mut self, credit: u32) -> bool { self.credit.set_credit(credit) }

    pub(crate) fn add_credit(&mut self, additional: u32) -> bool {
        self.credit.add_credit(additional)
    }

    pub(crate) fn request_drain(&mut self) -> Result<(), EngineStateError> {
        self.endpoint.ensure_locally_open()?;
        self.credit.request_drain();
        Ok(())
    }

    /// Apply the peer's Attach. Returns `true` when credit is waiting to be
    /// announced.
    pub(crate) fn handle_attach(&mut self, attach: &Attach) -> Result<bool, ProtocolViolation> {
        self.endpoint.remote_attach(attach)?;
        if let Some(count) = attach.initial_delivery_count {
            self.credit.set_initial_delivery_count(count);
        }
        Ok(self.credit.credit() > 0 && self.endpoint.state().is_locally_open())
    }

    pub(crate) fn handle_flow(&mut self, flow: &Flow) -> Result<(), ProtocolViolation> {
        if self.credit.handle_flow(flow)? {
            debug!(link = %self.endpoint.id(), "receiver drained");
            let snapshot = self.credit.snapshot();
            self.credit_events.fire(CreditEvent::Drained, &snapshot);
        }
        Ok(())
    }

    pub(crate) fn handle_transfer(
        &mut self,
        window: &mut SessionIncomingWindow,
        transfer: &Transfer,
        payload: &[u8],
    ) -> Result<TransferOutcome, ProtocolViolation> {
        let mut outcome = self
            .credit
            .handle_transfer(self.endpoint.id(), window, transfer, payload)?;
        let kind = if outcome.first {
            DeliveryEvent::Received
        } else {
            DeliveryEvent::Updated
        };
        if let Some(delivery) = self.credit.delivery(outcome.delivery_id) {
            self.delivery_events.fire(kind, delivery);
        }
        // Settled while still partial: frames that follow are never read.
        if let Some(delivery) = self
            .credit
            .delivery_mut(outcome.delivery_id)
            .filter(|delivery| delivery.is_settled())
        {
            outcome.released = delivery.read_all().len();
            if outcome.done {
                self.credit.remove_delivery(outcome.delivery_id);
            }
        }
        if outcome.done {
            metrics::inc_deliveries(metrics::Direction::Inbound);
        }
        Ok(outcome)
    }

    pub(crate) fn handle_disposition(&mut self, disposition: &Disposition, id: SequenceNumber) {
        if self.credit.handle_disposition(disposition, id) {
            if let Some(delivery) = self.credit.delivery(id) {
                self.delivery_events.fire(DeliveryEvent::Updated, delivery);
            }
        }
    }

    /// Take every buffered byte of delivery `id`.
    pub(crate) fn read(&mut self, id: SequenceNumber) -> Result<Bytes, EngineStateError> {
        let link = self.endpoint.id();
        let delivery = self
            .credit
            .delivery_mut(id)
            .ok_or(EngineStateError::UnknownDelivery {
                link,
                delivery_id: id,
            })?;
        Ok(delivery.read_all())
    }

    /// Update the local state of delivery `id` and optionally settle it.
    ///
    /// A settled delivery that is complete or aborted is dropped from the
    /// link; one that is still arriving is dropped when its last frame lands.
    pub(crate) fn apply_local_disposition(
        &mut self,
        id: SequenceNumber,
        state: Option<DeliveryState>,
        settle: bool,
    ) -> Result<LocalDisposition, EngineStateError> {
        let link = self.endpoint.id();
        let delivery = self
            .credit
            .delivery_mut(id)
            .ok_or(EngineStateError::UnknownDelivery {
                link,
                delivery_id: id,
            })?;
        if delivery.is_settled() {
            return Err(EngineStateError::AlreadySettled(id));
        }
        delivery.set_local_state(state);
        let mut released = 0;
        if settle {
            delivery.mark_settled();
            released = delivery.read_all().len();
        }
        let result = LocalDisposition {
            state: delivery.local_state().cloned(),
            settled: delivery.is_settled(),
            released,
        };
        if settle && (!delivery.is_partial() || delivery.is_aborted()) {
            self.credit.remove_delivery(id);
        }
        Ok(result)
    }

    /// Drop delivery `id` without telling the peer.
    pub(crate) fn discard(&mut self, id: SequenceNumber) -> Option<IncomingDelivery> {
        self.credit.remove_delivery(id)
    }

    pub(crate) fn delivery_mut(&mut self, id: SequenceNumber) -> Option<&mut IncomingDelivery> {
        self.credit.delivery_mut(id)
    }
}
