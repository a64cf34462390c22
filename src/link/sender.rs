//! Sending end of a link.

use std::collections::BTreeMap;

use bytes::Bytes;
use tracing::debug;

use super::{CreditEvent, LinkEndpoint, SenderCreditState};
use crate::{
    delivery::{DeliveryEvent, OutgoingDelivery},
    endpoint::LinkId,
    error::EngineStateError,
    event::EventTable,
    metrics,
    performative::{DeliveryState, Disposition, Flow, Role},
    sequence::SequenceNumber,
};

/// A message announced by `begin_message` that has not written a frame yet.
#[derive(Clone, Debug)]
struct PendingMessage {
    tag: Bytes,
    settled: bool,
    message_format: u32,
}

#[derive(Clone, Debug, Default)]
enum Streaming {
    #[default]
    Idle,
    Pending(PendingMessage),
    Writing(SequenceNumber),
}

/// A link on which this end sends deliveries.
#[derive(Debug)]
pub struct Sender {
    endpoint: LinkEndpoint,
    credit: SenderCreditState,
    deliveries: BTreeMap<SequenceNumber, OutgoingDelivery>,
    streaming: Streaming,
    delivery_events: EventTable<DeliveryEvent, OutgoingDelivery>,
    credit_events: EventTable<CreditEvent, SenderCreditState>,
}

impl Sender {
    pub(crate) fn new(id: LinkId, name: impl Into<String>) -> Self {
        Self {
            endpoint: LinkEndpoint::new(id, name, Role::Sender),
            credit: SenderCreditState::default(),
            deliveries: BTreeMap::new(),
            streaming: Streaming::Idle,
            delivery_events: EventTable::new(),
            credit_events: EventTable::new(),
        }
    }

    #[must_use]
    pub const fn endpoint(&self) -> &LinkEndpoint { &self.endpoint }

    pub fn endpoint_mut(&mut self) -> &mut LinkEndpoint { &mut self.endpoint }

    #[must_use]
    pub const fn credit_state(&self) -> &SenderCreditState { &self.credit }

    #[must_use]
    pub const fn credit(&self) -> u32 { self.credit.credit() }

    /// Whether a new delivery may be started now.
    #[must_use]
    pub fn is_sendable(&self) -> bool {
        self.endpoint.state().is_locally_open()
            && self.endpoint.state().is_remotely_open()
            && self.credit.credit() > 0
    }

    /// Delivery-id of the message being streamed, once it wrote a frame.
    #[must_use]
    pub const fn current_delivery(&self) -> Option<SequenceNumber> {
        match self.streaming {
            Streaming::Writing(id) => Some(id),
            _ => None,
        }
    }

    /// Look up an unsettled or in-progress delivery.
    #[must_use]
    pub fn delivery(&self, id: SequenceNumber) -> Option<&OutgoingDelivery> { self.deliveries.get(&id) }

    /// Deliveries held by the link in delivery-id order.
    pub fn deliveries(&self) -> impl Iterator<Item = &OutgoingDelivery> { self.deliveries.values() }

    /// Register a handler fired when the peer updates a delivery.
    pub fn on_delivery<F>(&mut self, kind: DeliveryEvent, handler: F)
    where
        F: FnMut(&OutgoingDelivery) + Send + 'static,
    {
        self.delivery_events.register(kind, handler);
    }

    /// Register a handler for [`CreditEvent::CreditUpdated`] or
    /// [`CreditEvent::DrainRequested`].
    pub fn on_credit<F>(&mut self, kind: CreditEvent, handler: F)
    where
        F: FnMut(&SenderCreditState) + Send + 'static,
    {
        self.credit_events.register(kind, handler);
    }

    pub(crate) fn set_available(&mut self, available: u32) { self.credit.set_available(available); }

    pub(crate) fn handle_flow(&mut self, flow: &Flow) {
        let drain = self.credit.handle_flow(flow);
        debug!(
            link = %self.endpoint.id(),
            credit = self.credit.credit(),
            drain,
            "sender credit updated"
        );
        self.credit_events
            .fire(CreditEvent::CreditUpdated, &self.credit);
        if drain {
            self.credit_events
                .fire(CreditEvent::DrainRequested, &self.credit);
        }
    }

    pub(crate) fn handle_disposition(&mut self, disposition: &Disposition, id: SequenceNumber) {
        let Some(delivery) = self.deliveries.get_mut(&id) else {
            return;
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
        if updated {
            self.delivery_events.fire(DeliveryEvent::Updated, delivery);
        }
    }

    /// Announce a new message to be streamed with `stream_bytes`.
    pub(crate) fn begin(&mut self, tag: Bytes, settled: bool) -> Result<(), EngineStateError> {
        self.endpoint.ensure_locally_open()?;
        if !matches!(self.streaming, Streaming::Idle) {
            return Err(EngineStateError::DeliveryInProgress(self.endpoint.id()));
        }
        if !self.is_sendable() {
            return Err(EngineStateError::NoCredit(self.endpoint.id()));
        }
        self.streaming = Streaming::Pending(PendingMessage {
            tag,
            settled,
            message_format: 0,
        });
        Ok(())
    }

    /// Set the message-format of the announced message.
    pub(crate) fn set_message_format(&mut self, message_format: u32) -> Result<(), EngineStateError> {
        match &mut self.streaming {
            Streaming::Pending(pending) => {
                pending.message_format = message_format;
                Ok(())
            }
            Streaming::Writing(_) => Err(EngineStateError::DeliveryInProgress(self.endpoint.id())),
            Streaming::Idle => Err(EngineStateError::NoCurrentDelivery(self.endpoint.id())),
        }
    }

    /// The delivery the next frames belong to. The first call after
    /// [`Sender::begin`] draws a delivery-id from `next_id`.
    pub(crate) fn delivery_for_write(
        &mut self,
        next_id: impl FnOnce() -> SequenceNumber,
    ) -> Result<&mut OutgoingDelivery, EngineStateError> {
        let link = self.endpoint.id();
        let id = match std::mem::take(&mut self.streaming) {
            Streaming::Idle => return Err(EngineStateError::NoCurrentDelivery(link)),
            Streaming::Writing(id) => id,
            Streaming::Pending(pending) => {
                let id = next_id();
                let mut delivery = OutgoingDelivery::new(link, id, pending.tag);
                delivery.set_message_format(pending.message_format);
                if pending.settled {
                    delivery.mark_settled();
                }
                self.deliveries.insert(id, delivery);
                id
            }
        };
        self.streaming = Streaming::Writing(id);
        self.deliveries
            .get_mut(&id)
            .ok_or(EngineStateError::NoCurrentDelivery(link))
    }

    /// Close out the streamed delivery after its final frame was written.
    pub(crate) fn complete_current(&mut self) {
        let Streaming::Writing(id) = std::mem::take(&mut self.streaming) else {
            return;
        };
        self.credit.consume();
        metrics::inc_deliveries(metrics::Direction::Outbound);
        if self
            .deliveries
            .get(&id)
            .is_some_and(OutgoingDelivery::is_settled)
        {
            self.deliveries.remove(&id);
        }
    }

    /// Stop the current message. Returns the delivery to abort on the wire
    /// when frames were already written for it.
    pub(crate) fn take_for_abort(&mut self) -> Result<Option<OutgoingDelivery>, EngineStateError> {
        match std::mem::take(&mut self.streaming) {
            Streaming::Idle => Err(EngineStateError::NoCurrentDelivery(self.endpoint.id())),
            Streaming::Pending(_) => Ok(None),
            Streaming::Writing(id) => {
                self.credit.consume();
                let mut delivery = self.deliveries.remove(&id);
                if let Some(delivery) = delivery.as_mut() {
                    delivery.mark_aborted();
                }
                Ok(delivery)
            }
        }
    }

    /// Update the local state of delivery `id` and optionally settle it.
    /// Returns the state and settlement the session must announce.
    pub(crate) fn apply_local_disposition(
        &mut self,
        id: SequenceNumber,
        state: Option<DeliveryState>,
        settle: bool,
    ) -> Result<(Option<DeliveryState>, bool), EngineStateError> {
        let link = self.endpoint.id();
        let delivery = self
            .deliveries
            .get_mut(&id)
            .ok_or(EngineStateError::UnknownDelivery {
                link,
                delivery_id: id,
            })?;
        if delivery.is_settled() {
            return Err(EngineStateError::AlreadySettled(id));
        }
        delivery.set_local_state(state);
        if settle {
            delivery.mark_settled();
        }
        let result = (delivery.local_state().cloned(), delivery.is_settled());
        if settle && !delivery.is_partial() {
            self.deliveries.remove(&id);
        }
        Ok(result)
    }

    /// Give up remaining credit in answer to a drain request.
    pub(crate) fn drained(&mut self) -> Result<(), EngineStateError> {
        self.endpoint.ensure_locally_open()?;
        self.credit.drained();
        Ok(())
    }
}
