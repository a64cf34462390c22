//! Sessions: the sequenced conversations multiplexed over a connection.
//!
//! A [`Session`] owns its incoming and outgoing windows and the links
//! attached to it. Inbound performatives addressed to the session are
//! accounted against the windows and then forwarded to the link named by the
//! peer's handle; application operations on links are routed through the
//! session so the windows see every frame written.

mod incoming;
mod outgoing;

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
pub use incoming::{SessionIncomingWindow, UNBOUNDED_WINDOW};
pub use outgoing::SessionOutgoingWindow;
use tracing::debug;

use crate::{
    endpoint::{
        EndpointEvent,
        EndpointState,
        LinkHandle,
        LinkId,
        RemoteOpening,
        SessionId,
        SessionState,
    },
    error::{EngineStateError, ProtocolViolation, Result},
    event::EventTable,
    link::{Link, Receiver, Sender},
    performative::{
        Attach,
        Begin,
        DeliveryState,
        Detach,
        Disposition,
        End,
        ErrorCondition,
        Flow,
        Role,
        Symbol,
        Target,
        Transfer,
        TxnId,
    },
    pipeline::{OutboundFrame, Pipeline, emit},
    sequence::SequenceNumber,
    transaction::TransactionManager,
};

const SESSION: &str = "session";

/// Notifications about endpoints the peer initiated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    /// The peer began a session this end did not request. Fired on the
    /// connection.
    RemoteBegin,
    /// The peer attached a receiver, creating a local sender.
    SenderOpened,
    /// The peer attached a sender, creating a local receiver.
    ReceiverOpened,
    /// The peer attached a transaction controller, creating a local
    /// coordinator.
    CoordinatorOpened,
}

/// Kinds of link an application can create.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LinkKind {
    Sender,
    Receiver,
    Coordinator,
}

impl LinkKind {
    const fn role(self) -> Role {
        match self {
            Self::Sender => Role::Sender,
            Self::Receiver | Self::Coordinator => Role::Receiver,
        }
    }
}

/// One session of a connection.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    remote_channel: Option<u16>,
    state: EndpointState,
    handle_max: u32,
    remote_handle_max: Option<u32>,
    incoming: SessionIncomingWindow,
    outgoing: SessionOutgoingWindow,
    links: BTreeMap<LinkHandle, Link>,
    remote_handles: HashMap<u32, LinkHandle>,
    events: EventTable<EndpointEvent, EndpointState>,
    link_events: EventTable<SessionEvent, LinkId>,
}

fn find_link(links: &mut BTreeMap<LinkHandle, Link>, id: LinkId) -> Result<&mut Link> {
    Ok(links
        .get_mut(&id.handle)
        .ok_or(EngineStateError::UnknownLink(id))?)
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        incoming_capacity: u32,
        max_frame_size: u32,
        handle_max: u32,
    ) -> Self {
        Self {
            id,
            remote_channel: None,
            state: EndpointState::default(),
            handle_max,
            remote_handle_max: None,
            incoming: SessionIncomingWindow::new(incoming_capacity, max_frame_size),
            outgoing: SessionOutgoingWindow::new(),
            links: BTreeMap::new(),
            remote_handles: HashMap::new(),
            events: EventTable::new(),
            link_events: EventTable::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> SessionId { self.id }

    /// Channel the peer uses for this session, once it began.
    #[must_use]
    pub const fn remote_channel(&self) -> Option<u16> { self.remote_channel }

    #[must_use]
    pub const fn state(&self) -> &EndpointState { &self.state }

    #[must_use]
    pub fn local_state(&self) -> SessionState { self.state.local().into() }

    #[must_use]
    pub fn remote_state(&self) -> SessionState { self.state.remote().into() }

    #[must_use]
    pub const fn incoming_window(&self) -> &SessionIncomingWindow { &self.incoming }

    #[must_use]
    pub const fn outgoing_window(&self) -> &SessionOutgoingWindow { &self.outgoing }

    /// Highest handle usable on this session, combining both ends' limits.
    #[must_use]
    pub fn handle_max(&self) -> u32 {
        self.remote_handle_max
            .map_or(self.handle_max, |remote| remote.min(self.handle_max))
    }

    #[must_use]
    pub fn link(&self, handle: LinkHandle) -> Option<&Link> { self.links.get(&handle) }

    pub fn link_mut(&mut self, handle: LinkHandle) -> Option<&mut Link> { self.links.get_mut(&handle) }

    /// Links in handle order.
    pub fn links(&self) -> impl Iterator<Item = &Link> { self.links.values() }

    /// Set the byte capacity used to compute the incoming window.
    pub fn set_incoming_capacity(&mut self, incoming_capacity: u32) {
        self.incoming.set_incoming_capacity(incoming_capacity);
    }

    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] once the session has begun.
    pub fn set_handle_max(&mut self, handle_max: u32) -> std::result::Result<(), EngineStateError> {
        if self.state.is_locally_open() || self.state.is_locally_closed() {
            return Err(EngineStateError::AlreadyOpen { endpoint: SESSION });
        }
        self.handle_max = handle_max;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] once the session has begun.
    pub fn set_offered_capabilities(
        &mut self,
        capabilities: Vec<Symbol>,
    ) -> std::result::Result<(), EngineStateError> {
        self.state.set_offered_capabilities(SESSION, capabilities)
    }

    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] once the session has begun.
    pub fn set_desired_capabilities(
        &mut self,
        capabilities: Vec<Symbol>,
    ) -> std::result::Result<(), EngineStateError> {
        self.state.set_desired_capabilities(SESSION, capabilities)
    }

    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] once the session has begun.
    pub fn set_properties(
        &mut self,
        properties: BTreeMap<Symbol, String>,
    ) -> std::result::Result<(), EngineStateError> {
        self.state.set_properties(SESSION, properties)
    }

    /// Register a lifecycle handler, replacing any earlier one for `kind`.
    pub fn on_event<F>(&mut self, kind: EndpointEvent, handler: F)
    where
        F: FnMut(&EndpointState) + Send + 'static,
    {
        self.events.register(kind, handler);
    }

    /// Register a handler for links the peer attaches.
    pub fn on_link_opened<F>(&mut self, kind: SessionEvent, handler: F)
    where
        F: FnMut(&LinkId) + Send + 'static,
    {
        self.link_events.register(kind, handler);
    }

    fn fire(&mut self, kind: EndpointEvent) { self.events.fire(kind, &self.state); }

    pub(crate) fn set_remote_channel(&mut self, channel: u16) { self.remote_channel = Some(channel); }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.is_locally_closed() && self.state.is_remotely_closed()
    }

    pub(crate) fn fire_parent_closed(&mut self) {
        if self.state.is_locally_open() {
            self.fire(EndpointEvent::ParentEndpointClosed);
        }
    }

    pub(crate) fn fire_engine_shutdown(&mut self) {
        self.fire(EndpointEvent::EngineShutdown);
        for link in self.links.values_mut() {
            link.fire(EndpointEvent::EngineShutdown);
        }
    }

    // ----- lifecycle

    /// Write Begin. `max_frame_size` is the frame limit agreed on the
    /// connection and is fixed for the session from here on.
    pub(crate) fn begin(&mut self, max_frame_size: u32, pipe: &mut dyn Pipeline) -> Result<()> {
        self.state.open_locally(SESSION)?;
        let mut begin = Begin {
            remote_channel: self.remote_channel,
            handle_max: self.handle_max,
            offered_capabilities: self.state.offered_capabilities().to_vec(),
            desired_capabilities: self.state.desired_capabilities().to_vec(),
            properties: self.state.properties().clone(),
            ..Begin::default()
        };
        self.incoming.configure_outbound(&mut begin);
        self.outgoing.configure_outbound(&mut begin, max_frame_size);
        debug!(
            channel = self.id.0,
            incoming_window = begin.incoming_window,
            "session begin"
        );
        emit(pipe, OutboundFrame::new(self.id.0, begin))?;
        self.fire(EndpointEvent::LocalOpen);
        Ok(())
    }

    pub(crate) fn end(
        &mut self,
        condition: Option<ErrorCondition>,
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        self.state.ensure_locally_open(SESSION)?;
        self.state.close_locally(SESSION)?;
        self.state.set_condition(condition.clone());
        debug!(channel = self.id.0, "session end");
        emit(pipe, OutboundFrame::new(self.id.0, End { error: condition }))?;
        for link in self.links.values_mut() {
            link.fire_parent_closed();
        }
        self.fire(EndpointEvent::LocalClose);
        Ok(())
    }

    pub(crate) fn handle_begin(&mut self, begin: &Begin) -> std::result::Result<(), ProtocolViolation> {
        let opening = RemoteOpening {
            offered_capabilities: begin.offered_capabilities.clone(),
            desired_capabilities: begin.desired_capabilities.clone(),
            properties: begin.properties.clone(),
        };
        if !self.state.remote_opened(opening) {
            return Err(ProtocolViolation::DuplicateOpen { endpoint: SESSION });
        }
        self.remote_handle_max = Some(begin.handle_max);
        self.incoming.handle_begin(begin);
        self.outgoing.handle_begin(begin);
        debug!(
            channel = self.id.0,
            remote_channel = self.remote_channel,
            "remote begin"
        );
        self.fire(EndpointEvent::RemoteOpen);
        Ok(())
    }

    pub(crate) fn handle_end(&mut self, end: End) {
        debug!(channel = self.id.0, "remote end");
        self.state.remote_closed(end.error);
        self.fire(EndpointEvent::RemoteClose);
    }

    // ----- links

    fn next_free_handle(&self) -> std::result::Result<LinkHandle, EngineStateError> {
        let handle_max = self.handle_max();
        let exhausted = EngineStateError::HandlesExhausted { handle_max };
        let mut next = 0_u32;
        for handle in self.links.keys() {
            if handle.0 != next {
                break;
            }
            next = next.checked_add(1).ok_or(exhausted.clone())?;
        }
        if next > handle_max {
            return Err(exhausted);
        }
        Ok(LinkHandle(next))
    }

    pub(crate) fn create_link(
        &mut self,
        kind: LinkKind,
        name: &str,
    ) -> std::result::Result<LinkId, EngineStateError> {
        if self.state.is_locally_closed() {
            return Err(EngineStateError::Closed { endpoint: SESSION });
        }
        let role = kind.role();
        if self
            .links
            .values()
            .any(|link| link.endpoint().name() == name && link.endpoint().role() == role)
        {
            return Err(EngineStateError::DuplicateLinkName(name.to_owned()));
        }
        let handle = self.next_free_handle()?;
        let id = LinkId::new(self.id, handle);
        let link = match kind {
            LinkKind::Sender => Link::Sender(Sender::new(id, name)),
            LinkKind::Receiver => Link::Receiver(Receiver::new(id, name)),
            LinkKind::Coordinator => Link::Coordinator(TransactionManager::new(id, name)),
        };
        debug!(link = %id, kind = link.kind(), name, "link created");
        self.links.insert(handle, link);
        Ok(id)
    }

    pub(crate) fn open_link(&mut self, handle: LinkHandle, pipe: &mut dyn Pipeline) -> Result<()> {
        self.state.ensure_locally_open(SESSION)?;
        let link = find_link(&mut self.links, LinkId::new(self.id, handle))?;
        link.endpoint_mut().open_locally()?;
        let attach = link.local_attach();
        let announce_credit = link.as_receiver().is_some_and(|receiver| {
            receiver.credit() > 0 && receiver.endpoint().state().is_remotely_open()
        });
        emit(pipe, OutboundFrame::new(self.id.0, attach))?;
        if announce_credit {
            self.write_flow(Some(handle), pipe)?;
        }
        Ok(())
    }

    pub(crate) fn close_link(
        &mut self,
        handle: LinkHandle,
        closed: bool,
        condition: Option<ErrorCondition>,
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        let link = find_link(&mut self.links, LinkId::new(self.id, handle))?;
        link.endpoint().ensure_locally_open()?;
        link.endpoint_mut().set_condition(condition.clone());
        link.endpoint_mut().close_locally()?;
        let remotely_closed = link.endpoint().state().is_remotely_closed();
        let detach = Detach {
            handle: handle.0,
            closed,
            error: condition,
        };
        emit(pipe, OutboundFrame::new(self.id.0, detach))?;
        if remotely_closed {
            self.forget_link(handle);
        }
        Ok(())
    }

    fn forget_link(&mut self, handle: LinkHandle) {
        self.links.remove(&handle);
        self.incoming.forget_link(handle);
        self.outgoing.forget_link(handle);
        debug!(link = %LinkId::new(self.id, handle), "link released");
    }

    pub(crate) fn handle_attach(&mut self, attach: &Attach, pipe: &mut dyn Pipeline) -> Result<()> {
        if self.remote_handles.contains_key(&attach.handle) {
            return Err(ProtocolViolation::DuplicateOpen { endpoint: "link" }.into());
        }
        let local_role = attach.role.inverse();
        let paired = self
            .links
            .iter()
            .find(|(_, link)| {
                let endpoint = link.endpoint();
                endpoint.name() == attach.name
                    && endpoint.role() == local_role
                    && endpoint.remote_handle().is_none()
                    && !endpoint.state().is_remotely_closed()
            })
            .map(|(handle, _)| *handle);
        let (handle, created) = match paired {
            Some(handle) => (handle, None),
            None => {
                let (kind, event) = match attach.role {
                    Role::Receiver => (LinkKind::Sender, SessionEvent::SenderOpened),
                    Role::Sender if attach.target.as_ref().is_some_and(Target::is_coordinator) => {
                        (LinkKind::Coordinator, SessionEvent::CoordinatorOpened)
                    }
                    Role::Sender => (LinkKind::Receiver, SessionEvent::ReceiverOpened),
                };
                let id = self
                    .create_link(kind, &attach.name)
                    .map_err(|err| ProtocolViolation::remote_open("link", err))?;
                (id.handle, Some(event))
            }
        };
        self.remote_handles.insert(attach.handle, handle);
        let id = LinkId::new(self.id, handle);
        let announce_credit = find_link(&mut self.links, id)?.handle_attach(attach)?;
        debug!(link = %id, remote_handle = attach.handle, "remote attach");
        if let Some(event) = created {
            self.link_events.fire(event, &id);
        }
        if announce_credit {
            self.write_flow(Some(handle), pipe)?;
        }
        Ok(())
    }

    pub(crate) fn handle_detach(&mut self, detach: Detach) -> Result<()> {
        let handle = self
            .remote_handles
            .remove(&detach.handle)
            .ok_or(ProtocolViolation::UnknownHandle {
                handle: detach.handle,
            })?;
        let link = find_link(&mut self.links, LinkId::new(self.id, handle))?;
        debug!(link = %link.endpoint().id(), closed = detach.closed, "remote detach");
        link.endpoint_mut().remote_detach(detach.error);
        if link.endpoint().state().is_locally_closed() {
            self.forget_link(handle);
        }
        Ok(())
    }

    // ----- flow control

    fn local_handle(&self, remote: u32) -> std::result::Result<LinkHandle, ProtocolViolation> {
        self.remote_handles
            .get(&remote)
            .copied()
            .ok_or(ProtocolViolation::UnknownHandle { handle: remote })
    }

    /// Session-level Flow, optionally carrying the state of one link.
    fn build_flow(&mut self, handle: Option<LinkHandle>) -> Flow {
        let mut flow = Flow {
            next_incoming_id: self
                .state
                .is_remotely_open()
                .then(|| self.incoming.next_incoming_id()),
            incoming_window: self.incoming.update_incoming_window(),
            next_outgoing_id: self.outgoing.next_outgoing_id(),
            outgoing_window: self.outgoing.outgoing_window(),
            ..Flow::default()
        };
        if let Some(link) = handle.and_then(|handle| self.links.get(&handle)) {
            link.stamp_flow(&mut flow);
        }
        flow
    }

    fn write_flow(&mut self, handle: Option<LinkHandle>, pipe: &mut dyn Pipeline) -> Result<()> {
        if !self.state.is_locally_open() {
            return Ok(());
        }
        let flow = self.build_flow(handle);
        emit(pipe, OutboundFrame::new(self.id.0, flow))
    }

    pub(crate) fn handle_flow(&mut self, flow: &Flow, pipe: &mut dyn Pipeline) -> Result<()> {
        self.incoming.handle_flow(flow);
        self.outgoing.handle_flow(flow);
        match flow.handle {
            Some(remote) => {
                let handle = self.local_handle(remote)?;
                let echo = find_link(&mut self.links, LinkId::new(self.id, handle))?.handle_flow(flow)?;
                if echo {
                    self.write_flow(Some(handle), pipe)?;
                }
            }
            None if flow.echo => self.write_flow(None, pipe)?,
            None => {}
        }
        Ok(())
    }

    fn receiver_mut(&mut self, handle: LinkHandle) -> Result<&mut Receiver> {
        let id = LinkId::new(self.id, handle);
        Ok(find_link(&mut self.links, id)?
            .as_receiver_mut()
            .ok_or(EngineStateError::WrongLinkKind {
                link: id,
                expected: "receiver",
            })?)
    }

    fn sender_mut(&mut self, handle: LinkHandle) -> Result<&mut Sender> {
        let id = LinkId::new(self.id, handle);
        Ok(find_link(&mut self.links, id)?
            .as_sender_mut()
            .ok_or(EngineStateError::WrongLinkKind {
                link: id,
                expected: "sender",
            })?)
    }

    fn coordinator_mut(&mut self, handle: LinkHandle) -> Result<&mut TransactionManager> {
        let id = LinkId::new(self.id, handle);
        Ok(find_link(&mut self.links, id)?
            .as_coordinator_mut()
            .ok_or(EngineStateError::WrongLinkKind {
                link: id,
                expected: "coordinator",
            })?)
    }

    fn update_credit(
        &mut self,
        handle: LinkHandle,
        update: impl FnOnce(&mut Receiver) -> bool,
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        let receiver = self.receiver_mut(handle)?;
        if receiver.endpoint().state().is_locally_closed() {
            return Err(EngineStateError::Closed { endpoint: "link" }.into());
        }
        let changed = update(receiver);
        debug!(link = %receiver.endpoint().id(), credit = receiver.credit(), changed, "credit set");
        if changed && receiver.announces_credit() {
            self.write_flow(Some(handle), pipe)?;
        }
        Ok(())
    }

    pub(crate) fn set_credit(
        &mut self,
        handle: LinkHandle,
        credit: u32,
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        self.update_credit(handle, |receiver| receiver.set_credit(credit), pipe)
    }

    pub(crate) fn add_credit(
        &mut self,
        handle: LinkHandle,
        additional: u32,
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        self.update_credit(handle, |receiver| receiver.add_credit(additional), pipe)
    }

    pub(crate) fn drain(&mut self, handle: LinkHandle, pipe: &mut dyn Pipeline) -> Result<()> {
        let receiver = self.receiver_mut(handle)?;
        receiver.request_drain()?;
        if receiver.announces_credit() {
            self.write_flow(Some(handle), pipe)?;
        }
        Ok(())
    }

    pub(crate) fn drained(&mut self, handle: LinkHandle, pipe: &mut dyn Pipeline) -> Result<()> {
        self.sender_mut(handle)?.drained()?;
        if !self.state.is_locally_open() {
            return Ok(());
        }
        let mut flow = self.build_flow(Some(handle));
        flow.drain = true;
        emit(pipe, OutboundFrame::new(self.id.0, flow))
    }

    pub(crate) fn set_available(&mut self, handle: LinkHandle, available: u32) -> Result<()> {
        self.sender_mut(handle)?.set_available(available);
        Ok(())
    }

    // ----- transfers

    pub(crate) fn handle_transfer(
        &mut self,
        transfer: &Transfer,
        payload: &[u8],
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        let handle = self.local_handle(transfer.handle)?;
        let link = find_link(&mut self.links, LinkId::new(self.id, handle))?;
        let follow_up = self.incoming.handle_transfer(link, transfer, payload)?;
        if self.incoming.release_bytes(follow_up.released) {
            self.write_flow(None, pipe)?;
        }
        if let Some((id, state)) = follow_up.settle {
            self.disposition(handle, id, Some(state), true, pipe)?;
        }
        Ok(())
    }

    pub(crate) fn handle_disposition(&mut self, disposition: &Disposition) -> Result<()> {
        // The role names the peer's end: a receiver settles what we sent.
        let affected = match disposition.role {
            Role::Receiver => self.outgoing.handle_disposition(disposition)?,
            Role::Sender => self.incoming.handle_disposition(disposition)?,
        };
        if affected.is_empty() {
            debug!(
                channel = self.id.0,
                first = %disposition.first,
                "disposition matched no unsettled delivery"
            );
        }
        for (id, handle) in affected {
            if let Some(link) = self.links.get_mut(&handle) {
                link.handle_disposition(disposition, id);
            }
        }
        Ok(())
    }

    pub(crate) fn begin_message(
        &mut self,
        handle: LinkHandle,
        tag: Bytes,
        settled: bool,
    ) -> Result<()> {
        self.state.ensure_locally_open(SESSION)?;
        self.sender_mut(handle)?.begin(tag, settled)?;
        Ok(())
    }

    pub(crate) fn set_message_format(&mut self, handle: LinkHandle, message_format: u32) -> Result<()> {
        self.sender_mut(handle)?.set_message_format(message_format)?;
        Ok(())
    }

    /// Write `bytes` for the sender's current message. Returns its
    /// delivery-id.
    pub(crate) fn stream_bytes(
        &mut self,
        handle: LinkHandle,
        bytes: Bytes,
        complete: bool,
        pipe: &mut dyn Pipeline,
    ) -> Result<SequenceNumber> {
        let channel = self.id.0;
        let id = LinkId::new(self.id, handle);
        let sender = find_link(&mut self.links, id)?
            .as_sender_mut()
            .ok_or(EngineStateError::WrongLinkKind {
                link: id,
                expected: "sender",
            })?;
        let outgoing = &mut self.outgoing;
        let delivery = sender.delivery_for_write(|| outgoing.get_and_increment_next_delivery_id())?;
        if complete {
            delivery.mark_completed();
        }
        let delivery_id = delivery.delivery_id();
        outgoing.process_send(channel, handle, delivery, bytes, pipe)?;
        if complete {
            sender.complete_current();
        }
        Ok(delivery_id)
    }

    pub(crate) fn send(
        &mut self,
        handle: LinkHandle,
        tag: Bytes,
        payload: Bytes,
        settled: bool,
        pipe: &mut dyn Pipeline,
    ) -> Result<SequenceNumber> {
        self.begin_message(handle, tag, settled)?;
        self.stream_bytes(handle, payload, true, pipe)
    }

    pub(crate) fn abort(&mut self, handle: LinkHandle, pipe: &mut dyn Pipeline) -> Result<()> {
        let channel = self.id.0;
        if let Some(delivery) = self.sender_mut(handle)?.take_for_abort()? {
            debug!(channel, delivery_id = %delivery.delivery_id(), "abort delivery");
            self.outgoing
                .process_abort(channel, handle, &delivery, pipe)?;
        }
        Ok(())
    }

    /// Apply a local state change to a delivery of either direction.
    pub(crate) fn disposition(
        &mut self,
        handle: LinkHandle,
        id: SequenceNumber,
        state: Option<DeliveryState>,
        settle: bool,
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        let channel = self.id.0;
        let receiver = match find_link(&mut self.links, LinkId::new(self.id, handle))? {
            Link::Sender(sender) => {
                let (state, settled) = sender.apply_local_disposition(id, state, settle)?;
                return self
                    .outgoing
                    .process_disposition(channel, id, state, settled, pipe);
            }
            Link::Receiver(receiver) => receiver,
            Link::Coordinator(manager) => manager.receiver_mut(),
        };
        let result = receiver.apply_local_disposition(id, state, settle)?;
        self.incoming
            .process_disposition(channel, id, result.state, result.settled, pipe)?;
        if self.incoming.release_bytes(result.released) {
            self.write_flow(None, pipe)?;
        }
        Ok(())
    }

    /// Take the buffered payload of an incoming delivery.
    pub(crate) fn read_delivery(
        &mut self,
        handle: LinkHandle,
        id: SequenceNumber,
        pipe: &mut dyn Pipeline,
    ) -> Result<Bytes> {
        let bytes = self.receiver_mut(handle)?.read(id)?;
        if self.incoming.release_bytes(bytes.len()) {
            self.write_flow(None, pipe)?;
        }
        Ok(bytes)
    }

    // ----- transactions

    pub(crate) fn declared(
        &mut self,
        handle: LinkHandle,
        declare_id: SequenceNumber,
        txn_id: TxnId,
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        let (id, state) = self.coordinator_mut(handle)?.declared(declare_id, txn_id)?;
        self.disposition(handle, id, Some(state), true, pipe)
    }

    pub(crate) fn declare_failed(
        &mut self,
        handle: LinkHandle,
        declare_id: SequenceNumber,
        condition: ErrorCondition,
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        let (id, state) = self
            .coordinator_mut(handle)?
            .declare_failed(declare_id, condition)?;
        self.disposition(handle, id, Some(state), true, pipe)
    }

    pub(crate) fn discharged(
        &mut self,
        handle: LinkHandle,
        txn_id: &TxnId,
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        let (id, state) = self.coordinator_mut(handle)?.discharged(txn_id)?;
        self.disposition(handle, id, Some(state), true, pipe)
    }

    pub(crate) fn discharge_failed(
        &mut self,
        handle: LinkHandle,
        txn_id: &TxnId,
        condition: ErrorCondition,
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        let (id, state) = self
            .coordinator_mut(handle)?
            .discharge_failed(txn_id, condition)?;
        self.disposition(handle, id, Some(state), true, pipe)
    }
}

#[cfg(test)]
mod tests;
