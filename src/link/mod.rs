//! Links: the unidirectional message routes inside a session.
//!
//! A session owns its links in a map keyed by local handle. The [`Link`]
//! enum selects behaviour per role instead of overriding methods: senders
//! and receivers share the [`LinkEndpoint`] record, and the transaction
//! coordinator is a receiver wrapped by a
//! [`TransactionManager`](crate::transaction::TransactionManager).

mod credit;
mod receiver;
mod sender;

use std::collections::BTreeMap;

pub(crate) use credit::TransferOutcome;
pub use credit::{ReceiverCreditState, SenderCreditState};
pub use receiver::Receiver;
pub use sender::Sender;

use crate::{
    endpoint::{EndpointEvent, EndpointState, LinkId, RemoteOpening},
    error::{EngineStateError, ProtocolViolation},
    event::EventTable,
    performative::{
        Attach,
        DeliveryState,
        Disposition,
        ErrorCondition,
        Flow,
        ReceiverSettleMode,
        Role,
        SenderSettleMode,
        Source,
        Symbol,
        Target,
        Transfer,
    },
    sequence::SequenceNumber,
    session::SessionIncomingWindow,
    transaction::TransactionManager,
};

const LINK: &str = "link";

/// Credit notifications fired by links.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CreditEvent {
    /// The sender answered a receiver's drain request.
    Drained,
    /// The receiver granted new credit to a sender.
    CreditUpdated,
    /// The receiver asked a sender to use up or give back its credit.
    DrainRequested,
}

/// Work the session must finish after a link consumed a Transfer.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct TransferFollowUp {
    /// Payload bytes the link consumed and the session may release.
    pub released: usize,
    /// A delivery the link wants settled with the given outcome.
    pub settle: Option<(SequenceNumber, DeliveryState)>,
}

/// Identity, terminus and lifecycle state shared by every link role.
#[derive(Debug)]
pub struct LinkEndpoint {
    id: LinkId,
    name: String,
    role: Role,
    state: EndpointState,
    source: Option<Source>,
    target: Option<Target>,
    snd_settle_mode: SenderSettleMode,
    rcv_settle_mode: ReceiverSettleMode,
    remote_handle: Option<u32>,
    remote_source: Option<Source>,
    remote_target: Option<Target>,
    events: EventTable<EndpointEvent, EndpointState>,
}

impl LinkEndpoint {
    pub(crate) fn new(id: LinkId, name: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            name: name.into(),
            role,
            state: EndpointState::default(),
            source: None,
            target: None,
            snd_settle_mode: SenderSettleMode::default(),
            rcv_settle_mode: ReceiverSettleMode::default(),
            remote_handle: None,
            remote_source: None,
            remote_target: None,
            events: EventTable::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> LinkId { self.id }

    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    #[must_use]
    pub const fn role(&self) -> Role { self.role }

    #[must_use]
    pub const fn state(&self) -> &EndpointState { &self.state }

    #[must_use]
    pub const fn source(&self) -> Option<&Source> { self.source.as_ref() }

    #[must_use]
    pub const fn target(&self) -> Option<&Target> { self.target.as_ref() }

    #[must_use]
    pub const fn remote_source(&self) -> Option<&Source> { self.remote_source.as_ref() }

    #[must_use]
    pub const fn remote_target(&self) -> Option<&Target> { self.remote_target.as_ref() }

    /// Handle the peer chose for this link, once it attached.
    #[must_use]
    pub const fn remote_handle(&self) -> Option<u32> { self.remote_handle }

    #[must_use]
    pub const fn sender_settle_mode(&self) -> SenderSettleMode { self.snd_settle_mode }

    #[must_use]
    pub const fn receiver_settle_mode(&self) -> ReceiverSettleMode { self.rcv_settle_mode }

    /// Set the source terminus announced in Attach.
    ///
    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] once the link is attached.
    pub fn set_source(&mut self, source: Source) -> Result<(), EngineStateError> {
        self.ensure_idle()?;
        self.source = Some(source);
        Ok(())
    }

    /// Set the target terminus announced in Attach.
    ///
    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] once the link is attached.
    pub fn set_target(&mut self, target: Target) -> Result<(), EngineStateError> {
        self.ensure_idle()?;
        self.target = Some(target);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] once the link is attached.
    pub fn set_settle_modes(
        &mut self,
        snd_settle_mode: SenderSettleMode,
        rcv_settle_mode: ReceiverSettleMode,
    ) -> Result<(), EngineStateError> {
        self.ensure_idle()?;
        self.snd_settle_mode = snd_settle_mode;
        self.rcv_settle_mode = rcv_settle_mode;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] once the link is attached.
    pub fn set_offered_capabilities(
        &mut self,
        capabilities: Vec<Symbol>,
    ) -> Result<(), EngineStateError> {
        self.state.set_offered_capabilities(LINK, capabilities)
    }

    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] once the link is attached.
    pub fn set_desired_capabilities(
        &mut self,
        capabilities: Vec<Symbol>,
    ) -> Result<(), EngineStateError> {
        self.state.set_desired_capabilities(LINK, capabilities)
    }

    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] once the link is attached.
    pub fn set_properties(
        &mut self,
        properties: BTreeMap<Symbol, String>,
    ) -> Result<(), EngineStateError> {
        self.state.set_properties(LINK, properties)
    }

    /// Register a lifecycle handler, replacing any earlier one for `kind`.
    pub fn on_event<F>(&mut self, kind: EndpointEvent, handler: F)
    where
        F: FnMut(&EndpointState) + Send + 'static,
    {
        self.events.register(kind, handler);
    }

    fn ensure_idle(&self) -> Result<(), EngineStateError> {
        if self.state.is_locally_open() || self.state.is_locally_closed() {
            return Err(EngineStateError::AlreadyOpen { endpoint: LINK });
        }
        Ok(())
    }

    pub(crate) fn fire(&mut self, kind: EndpointEvent) { self.events.fire(kind, &self.state); }

    pub(crate) fn open_locally(&mut self) -> Result<(), EngineStateError> {
        self.state.open_locally(LINK)?;
        self.fire(EndpointEvent::LocalOpen);
        Ok(())
    }

    pub(crate) fn close_locally(&mut self) -> Result<(), EngineStateError> {
        self.state.close_locally(LINK)?;
        self.fire(EndpointEvent::LocalClose);
        Ok(())
    }

    pub(crate) fn set_condition(&mut self, condition: Option<ErrorCondition>) {
        self.state.set_condition(condition);
    }

    pub(crate) fn ensure_locally_open(&self) -> Result<(), EngineStateError> {
        self.state.ensure_locally_open(LINK)
    }

    /// Local Attach describing this link.
    pub(crate) fn attach(&self, initial_delivery_count: Option<SequenceNumber>) -> Attach {
        Attach {
            snd_settle_mode: self.snd_settle_mode,
            rcv_settle_mode: self.rcv_settle_mode,
            source: self.source.clone(),
            target: self.target.clone(),
            initial_delivery_count,
            offered_capabilities: self.state.offered_capabilities().to_vec(),
            desired_capabilities: self.state.desired_capabilities().to_vec(),
            properties: self.state.properties().clone(),
            ..Attach::new(self.name.clone(), self.id.handle.0, self.role)
        }
    }

    /// Record the peer's Attach and fire `RemoteOpen`.
    pub(crate) fn remote_attach(&mut self, attach: &Attach) -> Result<(), ProtocolViolation> {
        let opening = RemoteOpening {
            offered_capabilities: attach.offered_capabilities.clone(),
            desired_capabilities: attach.desired_capabilities.clone(),
            properties: attach.properties.clone(),
        };
        if !self.state.remote_opened(opening) {
            return Err(ProtocolViolation::DuplicateOpen { endpoint: LINK });
        }
        self.remote_handle = Some(attach.handle);
        self.remote_source.clone_from(&attach.source);
        self.remote_target.clone_from(&attach.target);
        self.fire(EndpointEvent::RemoteOpen);
        Ok(())
    }

    pub(crate) fn remote_detach(&mut self, condition: Option<ErrorCondition>) {
        self.state.remote_closed(condition);
        self.remote_handle = None;
        self.fire(EndpointEvent::RemoteClose);
    }

    pub(crate) fn fire_parent_closed(&mut self) {
        if self.state.is_locally_open() {
            self.fire(EndpointEvent::ParentEndpointClosed);
        }
    }
}

/// A link of any role owned by a session.
#[derive(Debug)]
pub enum Link {
    Sender(Sender),
    Receiver(Receiver),
    Coordinator(TransactionManager),
}

impl Link {
    #[must_use]
    pub fn endpoint(&self) -> &LinkEndpoint {
        match self {
            Self::Sender(sender) => sender.endpoint(),
            Self::Receiver(receiver) => receiver.endpoint(),
            Self::Coordinator(manager) => manager.receiver().endpoint(),
        }
    }

    pub fn endpoint_mut(&mut self) -> &mut LinkEndpoint {
        match self {
            Self::Sender(sender) => sender.endpoint_mut(),
            Self::Receiver(receiver) => receiver.endpoint_mut(),
            Self::Coordinator(manager) => manager.receiver_mut().endpoint_mut(),
        }
    }

    /// Short description of the link kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Sender(_) => "sender",
            Self::Receiver(_) => "receiver",
            Self::Coordinator(_) => "coordinator",
        }
    }

    #[must_use]
    pub const fn as_sender(&self) -> Option<&Sender> {
        match self {
            Self::Sender(sender) => Some(sender),
            _ => None,
        }
    }

    pub fn as_sender_mut(&mut self) -> Option<&mut Sender> {
        match self {
            Self::Sender(sender) => Some(sender),
            _ => None,
        }
    }

    /// The receiving side of the link, including a coordinator's receiver.
    #[must_use]
    pub const fn as_receiver(&self) -> Option<&Receiver> {
        match self {
            Self::Receiver(receiver) => Some(receiver),
            Self::Coordinator(manager) => Some(manager.receiver()),
            Self::Sender(_) => None,
        }
    }

    pub fn as_receiver_mut(&mut self) -> Option<&mut Receiver> {
        match self {
            Self::Receiver(receiver) => Some(receiver),
            Self::Coordinator(manager) => Some(manager.receiver_mut()),
            Self::Sender(_) => None,
        }
    }

    #[must_use]
    pub const fn as_coordinator(&self) -> Option<&TransactionManager> {
        match self {
            Self::Coordinator(manager) => Some(manager),
            _ => None,
        }
    }

    pub fn as_coordinator_mut(&mut self) -> Option<&mut TransactionManager> {
        match self {
            Self::Coordinator(manager) => Some(manager),
            _ => None,
        }
    }

    /// The Attach announcing this link.
    pub(crate) fn local_attach(&self) -> Attach {
        match self {
            Self::Sender(sender) => sender
                .endpoint()
                .attach(Some(sender.credit_state().initial_delivery_count())),
            other => other.endpoint().attach(None),
        }
    }

    /// Apply the peer's Attach. Returns `true` when the session must follow
    /// up with a link Flow.
    pub(crate) fn handle_attach(&mut self, attach: &Attach) -> Result<bool, ProtocolViolation> {
        match self {
            Self::Sender(sender) => {
                sender.endpoint_mut().remote_attach(attach)?;
                Ok(false)
            }
            Self::Receiver(receiver) => receiver.handle_attach(attach),
            Self::Coordinator(manager) => manager.receiver_mut().handle_attach(attach),
        }
    }

    /// Apply a link Flow. Returns `true` when the peer asked for an echo.
    pub(crate) fn handle_flow(&mut self, flow: &Flow) -> Result<bool, ProtocolViolation> {
        match self {
            Self::Sender(sender) => sender.handle_flow(flow),
            Self::Receiver(receiver) => receiver.handle_flow(flow)?,
            Self::Coordinator(manager) => manager.receiver_mut().handle_flow(flow)?,
        }
        Ok(flow.echo)
    }

    pub(crate) fn handle_transfer(
        &mut self,
        window: &mut SessionIncomingWindow,
        transfer: &Transfer,
        payload: &[u8],
    ) -> Result<TransferFollowUp, ProtocolViolation> {
        match self {
            Self::Sender(_) => Err(ProtocolViolation::TransferOnSender {
                handle: transfer.handle,
            }),
            Self::Receiver(receiver) => {
                let outcome = receiver.handle_transfer(window, transfer, payload)?;
                Ok(TransferFollowUp {
                    released: outcome.released,
                    settle: None,
                })
            }
            Self::Coordinator(manager) => manager.handle_transfer(window, transfer, payload),
        }
    }

    /// Apply a remote Disposition to the delivery `id`.
    pub(crate) fn handle_disposition(&mut self, disposition: &Disposition, id: SequenceNumber) {
        match self {
            Self::Sender(sender) => sender.handle_disposition(disposition, id),
            Self::Receiver(receiver) => receiver.handle_disposition(disposition, id),
            Self::Coordinator(manager) => {
                manager.receiver_mut().handle_disposition(disposition, id);
            }
        }
    }

    /// Copy the link's credit state into an outgoing Flow.
    pub(crate) fn stamp_flow(&self, flow: &mut Flow) {
        flow.handle = Some(self.endpoint().id().handle.0);
        if let Some(sender) = self.as_sender() {
            let credit = sender.credit_state();
            flow.delivery_count = Some(credit.delivery_count());
            flow.link_credit = Some(credit.credit());
            flow.available = Some(credit.available());
            flow.drain = credit.is_draining();
        } else if let Some(receiver) = self.as_receiver() {
            let credit = receiver.credit_state();
            flow.delivery_count = Some(credit.delivery_count());
            flow.link_credit = Some(credit.credit());
            flow.drain = credit.is_draining();
        }
    }

    pub(crate) fn fire(&mut self, kind: EndpointEvent) { self.endpoint_mut().fire(kind); }

    pub(crate) fn fire_parent_closed(&mut self) { self.endpoint_mut().fire_parent_closed(); }
}

#[cfg(test)]
mod tests;
