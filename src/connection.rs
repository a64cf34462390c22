//! The AMQP connection and its session table.
//!
//! A [`Connection`] owns every session of the engine, keyed by local
//! channel. Inbound performatives are routed here first: Open and Close are
//! handled by the connection itself, Begin and End map remote channels onto
//! sessions, and everything else is forwarded to the session the remote
//! channel maps to.

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use tracing::debug;

use crate::{
    config::EngineConfig,
    endpoint::{EndpointEvent, EndpointState, LinkId, RemoteOpening, SessionId},
    error::{EngineStateError, ProtocolViolation, Result},
    event::EventTable,
    link::Link,
    performative::{Begin, Close, End, ErrorCondition, Open, Performative, Symbol},
    pipeline::{OutboundFrame, Pipeline, emit},
    session::{LinkKind, Session, SessionEvent},
};

const CONNECTION: &str = "connection";

/// Smaller of two frame limits where `0` means unbounded.
const fn min_frame_size(local: u32, remote: u32) -> u32 {
    match (local, remote) {
        (0, other) | (other, 0) => other,
        (local, remote) if local < remote => local,
        (_, remote) => remote,
    }
}

/// Connection-level state: negotiated limits, sessions and lifecycle.
#[derive(Debug)]
pub struct Connection {
    container_id: String,
    hostname: Option<String>,
    max_frame_size: u32,
    channel_max: u16,
    idle_timeout: Option<Duration>,
    handle_max: u32,
    incoming_capacity: u32,
    state: EndpointState,
    remote_container_id: Option<String>,
    remote_max_frame_size: u32,
    remote_channel_max: Option<u16>,
    remote_idle_timeout: Option<Duration>,
    sessions: BTreeMap<SessionId, Session>,
    remote_channels: HashMap<u16, SessionId>,
    events: EventTable<EndpointEvent, EndpointState>,
    session_events: EventTable<SessionEvent, SessionId>,
}

impl Connection {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        Self {
            container_id: config.container_id.clone(),
            hostname: config.hostname.clone(),
            max_frame_size: config.max_frame_size,
            channel_max: config.channel_max,
            idle_timeout: config.idle_timeout,
            handle_max: config.handle_max,
            incoming_capacity: config.incoming_capacity,
            state: EndpointState::default(),
            remote_container_id: None,
            remote_max_frame_size: 0,
            remote_channel_max: None,
            remote_idle_timeout: None,
            sessions: BTreeMap::new(),
            remote_channels: HashMap::new(),
            events: EventTable::new(),
            session_events: EventTable::new(),
        }
    }

    #[must_use]
    pub fn container_id(&self) -> &str { &self.container_id }

    #[must_use]
    pub fn hostname(&self) -> Option<&str> { self.hostname.as_deref() }

    #[must_use]
    pub const fn state(&self) -> &EndpointState { &self.state }

    /// Local frame limit announced in Open; `0` means unbounded.
    #[must_use]
    pub const fn max_frame_size(&self) -> u32 { self.max_frame_size }

    #[must_use]
    pub const fn channel_max(&self) -> u16 { self.channel_max }

    #[must_use]
    pub const fn idle_timeout(&self) -> Option<Duration> { self.idle_timeout }

    #[must_use]
    pub fn remote_container_id(&self) -> Option<&str> { self.remote_container_id.as_deref() }

    #[must_use]
    pub const fn remote_max_frame_size(&self) -> u32 { self.remote_max_frame_size }

    #[must_use]
    pub const fn remote_channel_max(&self) -> Option<u16> { self.remote_channel_max }

    #[must_use]
    pub const fn remote_idle_timeout(&self) -> Option<Duration> { self.remote_idle_timeout }

    /// Frame limit for outgoing transfers: the smaller of both ends' limits.
    #[must_use]
    pub const fn effective_max_frame_size(&self) -> u32 {
        min_frame_size(self.max_frame_size, self.remote_max_frame_size)
    }

    /// Highest channel a session may use, combining both ends' limits.
    #[must_use]
    pub fn effective_channel_max(&self) -> u16 {
        self.remote_channel_max
            .map_or(self.channel_max, |remote| remote.min(self.channel_max))
    }

    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<&Session> { self.sessions.get(&id) }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> { self.sessions.get_mut(&id) }

    /// Sessions in channel order.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> { self.sessions.values() }

    #[must_use]
    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.sessions
            .get(&id.session)
            .and_then(|session| session.link(id.handle))
    }

    pub fn link_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.sessions
            .get_mut(&id.session)
            .and_then(|session| session.link_mut(id.handle))
    }

    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] once the connection is open.
    pub fn set_offered_capabilities(
        &mut self,
        capabilities: Vec<Symbol>,
    ) -> std::result::Result<(), EngineStateError> {
        self.state.set_offered_capabilities(CONNECTION, capabilities)
    }

    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] once the connection is open.
    pub fn set_desired_capabilities(
        &mut self,
        capabilities: Vec<Symbol>,
    ) -> std::result::Result<(), EngineStateError> {
        self.state.set_desired_capabilities(CONNECTION, capabilities)
    }

    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] once the connection is open.
    pub fn set_properties(
        &mut self,
        properties: BTreeMap<Symbol, String>,
    ) -> std::result::Result<(), EngineStateError> {
        self.state.set_properties(CONNECTION, properties)
    }

    /// Register a lifecycle handler, replacing any earlier one for `kind`.
    pub fn on_event<F>(&mut self, kind: EndpointEvent, handler: F)
    where
        F: FnMut(&EndpointState) + Send + 'static,
    {
        self.events.register(kind, handler);
    }

    /// Register a handler fired when the peer begins a session this end did
    /// not request.
    pub fn on_remote_begin<F>(&mut self, handler: F)
    where
        F: FnMut(&SessionId) + Send + 'static,
    {
        self.session_events.register(SessionEvent::RemoteBegin, handler);
    }

    fn fire(&mut self, kind: EndpointEvent) { self.events.fire(kind, &self.state); }

    pub(crate) fn fire_engine_shutdown(&mut self) {
        self.fire(EndpointEvent::EngineShutdown);
        for session in self.sessions.values_mut() {
            session.fire_engine_shutdown();
        }
    }

    // ----- lifecycle

    pub(crate) fn open(&mut self, pipe: &mut dyn Pipeline) -> Result<()> {
        self.state.open_locally(CONNECTION)?;
        let open = Open {
            container_id: self.container_id.clone(),
            hostname: self.hostname.clone(),
            max_frame_size: self.max_frame_size,
            channel_max: self.channel_max,
            idle_timeout: self.idle_timeout,
            offered_capabilities: self.state.offered_capabilities().to_vec(),
            desired_capabilities: self.state.desired_capabilities().to_vec(),
            properties: self.state.properties().clone(),
        };
        debug!(container_id = %self.container_id, "connection open");
        emit(pipe, OutboundFrame::new(0, open))?;
        self.fire(EndpointEvent::LocalOpen);
        Ok(())
    }

    pub(crate) fn close(
        &mut self,
        condition: Option<ErrorCondition>,
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        self.state.ensure_locally_open(CONNECTION)?;
        self.state.close_locally(CONNECTION)?;
        self.state.set_condition(condition.clone());
        debug!(container_id = %self.container_id, "connection close");
        emit(pipe, OutboundFrame::new(0, Close { error: condition }))?;
        for session in self.sessions.values_mut() {
            session.fire_parent_closed();
        }
        self.fire(EndpointEvent::LocalClose);
        Ok(())
    }

    fn handle_open(&mut self, open: Open) -> std::result::Result<(), ProtocolViolation> {
        let opening = RemoteOpening {
            offered_capabilities: open.offered_capabilities,
            desired_capabilities: open.desired_capabilities,
            properties: open.properties,
        };
        if !self.state.remote_opened(opening) {
            return Err(ProtocolViolation::DuplicateOpen {
                endpoint: CONNECTION,
            });
        }
        debug!(
            remote_container_id = %open.container_id,
            max_frame_size = open.max_frame_size,
            channel_max = open.channel_max,
            "remote open"
        );
        self.remote_container_id = Some(open.container_id);
        self.remote_max_frame_size = open.max_frame_size;
        self.remote_channel_max = Some(open.channel_max);
        self.remote_idle_timeout = open.idle_timeout;
        self.fire(EndpointEvent::RemoteOpen);
        Ok(())
    }

    fn handle_close(&mut self, close: Close) {
        debug!("remote close");
        self.state.remote_closed(close.error);
        self.fire(EndpointEvent::RemoteClose);
    }

    // ----- sessions

    fn next_free_channel(&self) -> std::result::Result<SessionId, EngineStateError> {
        let channel_max = self.effective_channel_max();
        let mut next = 0_u16;
        for id in self.sessions.keys() {
            if id.0 != next {
                break;
            }
            next = next
                .checked_add(1)
                .ok_or(EngineStateError::ChannelsExhausted { channel_max })?;
        }
        if next > channel_max {
            return Err(EngineStateError::ChannelsExhausted { channel_max });
        }
        Ok(SessionId(next))
    }

    /// Create an unbegun session on the lowest free channel.
    pub(crate) fn create_session(&mut self) -> std::result::Result<SessionId, EngineStateError> {
        if self.state.is_locally_closed() {
            return Err(EngineStateError::Closed {
                endpoint: CONNECTION,
            });
        }
        let id = self.next_free_channel()?;
        let session = Session::new(
            id,
            self.incoming_capacity,
            self.max_frame_size,
            self.handle_max,
        );
        self.sessions.insert(id, session);
        debug!(session = %id, "session created");
        Ok(id)
    }

    pub(crate) fn session_entry(
        &mut self,
        id: SessionId,
    ) -> std::result::Result<&mut Session, EngineStateError> {
        self.sessions
            .get_mut(&id)
            .ok_or(EngineStateError::UnknownSession(id))
    }

    pub(crate) fn open_session(&mut self, id: SessionId, pipe: &mut dyn Pipeline) -> Result<()> {
        self.state.ensure_locally_open(CONNECTION)?;
        let max_frame_size = self.effective_max_frame_size();
        self.session_entry(id)?.begin(max_frame_size, pipe)
    }

    pub(crate) fn end_session(
        &mut self,
        id: SessionId,
        condition: Option<ErrorCondition>,
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        let session = self.session_entry(id)?;
        session.end(condition, pipe)?;
        if session.is_closed() {
            self.sessions.remove(&id);
        }
        Ok(())
    }

    pub(crate) fn create_link(
        &mut self,
        session: SessionId,
        kind: LinkKind,
        name: &str,
    ) -> std::result::Result<LinkId, EngineStateError> {
        self.session_entry(session)?.create_link(kind, name)
    }

    fn handle_begin(&mut self, channel: u16, begin: &Begin) -> Result<()> {
        if self.remote_channels.contains_key(&channel) {
            return Err(ProtocolViolation::DuplicateOpen { endpoint: "session" }.into());
        }
        let (id, remotely_initiated) = match begin.remote_channel {
            Some(local) => {
                let id = SessionId(local);
                let answers_local = self
                    .sessions
                    .get(&id)
                    .is_some_and(|session| session.state().is_locally_open());
                if !answers_local {
                    return Err(ProtocolViolation::UnknownChannel { channel: local }.into());
                }
                (id, false)
            }
            None => {
                let id = self
                    .create_session()
                    .map_err(|err| ProtocolViolation::remote_open("session", err))?;
                (id, true)
            }
        };
        let session = self.session_entry(id)?;
        session.set_remote_channel(channel);
        session.handle_begin(begin)?;
        self.remote_channels.insert(channel, id);
        if remotely_initiated {
            self.session_events.fire(SessionEvent::RemoteBegin, &id);
        }
        Ok(())
    }

    fn handle_end(&mut self, channel: u16, end: End) -> Result<()> {
        let id = self
            .remote_channels
            .remove(&channel)
            .ok_or(ProtocolViolation::UnknownChannel { channel })?;
        let session = self.session_entry(id)?;
        session.handle_end(end);
        if session.is_closed() {
            self.sessions.remove(&id);
        }
        Ok(())
    }

    fn route(&mut self, channel: u16, performative: &'static str) -> Result<&mut Session> {
        if !self.state.is_remotely_open() {
            return Err(ProtocolViolation::NotOpened { performative }.into());
        }
        let id = self
            .remote_channels
            .get(&channel)
            .copied()
            .ok_or(ProtocolViolation::UnknownChannel { channel })?;
        Ok(self.session_entry(id)?)
    }

    /// Apply one inbound performative.
    pub(crate) fn dispatch(
        &mut self,
        channel: u16,
        performative: Performative,
        payload: &[u8],
        pipe: &mut dyn Pipeline,
    ) -> Result<()> {
        let name = performative.name();
        match performative {
            Performative::Open(open) => Ok(self.handle_open(open)?),
            Performative::Close(close) => {
                self.handle_close(close);
                Ok(())
            }
            Performative::Begin(begin) => {
                if !self.state.is_remotely_open() {
                    return Err(ProtocolViolation::NotOpened { performative: name }.into());
                }
                self.handle_begin(channel, &begin)
            }
            Performative::End(end) => self.handle_end(channel, end),
            Performative::Attach(attach) => self.route(channel, name)?.handle_attach(&attach, pipe),
            Performative::Flow(flow) => self.route(channel, name)?.handle_flow(&flow, pipe),
            Performative::Transfer(transfer) => self
                .route(channel, name)?
                .handle_transfer(&transfer, payload, pipe),
            Performative::Disposition(disposition) => {
                self.route(channel, name)?.handle_disposition(&disposition)
            }
            Performative::Detach(detach) => self.route(channel, name)?.handle_detach(detach),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::pipeline::FrameQueue;

    fn opened(config: &EngineConfig) -> (Connection, FrameQueue) {
        let mut connection = Connection::new(config);
        let mut queue = FrameQueue::new();
        connection.open(&mut queue).expect("open");
        connection
            .dispatch(
                0,
                Performative::Open(Open {
                    container_id: String::from("peer"),
                    max_frame_size: 512,
                    channel_max: 1,
                    ..Open::default()
                }),
                &[],
                &mut queue,
            )
            .expect("remote open");
        queue.drain();
        (connection, queue)
    }

    #[rstest]
    #[case(0, 0, 0)]
    #[case(0, 512, 512)]
    #[case(1024, 0, 1024)]
    #[case(1024, 512, 512)]
    #[case(256, 512, 256)]
    fn frame_limit_takes_the_smaller_bound(
        #[case] local: u32,
        #[case] remote: u32,
        #[case] expected: u32,
    ) {
        assert_eq!(min_frame_size(local, remote), expected);
    }

    #[test]
    fn remote_open_sets_negotiated_limits() {
        let (connection, _) = opened(&EngineConfig::new("me").with_max_frame_size(1024));
        assert_eq!(connection.remote_container_id(), Some("peer"));
        assert_eq!(connection.effective_max_frame_size(), 512);
        assert_eq!(connection.effective_channel_max(), 1);
    }

    #[test]
    fn channels_are_bounded_by_the_peer() {
        let (mut connection, _) = opened(&EngineConfig::new("me"));
        assert_eq!(connection.create_session(), Ok(SessionId(0)));
        assert_eq!(connection.create_session(), Ok(SessionId(1)));
        assert_eq!(
            connection.create_session(),
            Err(EngineStateError::ChannelsExhausted { channel_max: 1 })
        );
    }

    #[test]
    fn begin_before_open_is_a_violation() {
        let mut connection = Connection::new(&EngineConfig::default());
        let mut queue = FrameQueue::new();
        let err = connection
            .dispatch(3, Performative::Begin(Begin::default()), &[], &mut queue)
            .expect_err("no open yet");
        assert_eq!(
            err.protocol_violation(),
            Some(&ProtocolViolation::NotOpened { performative: "begin" })
        );
    }

    #[test]
    fn remote_begin_creates_session_and_notifies() {
        let (mut connection, mut queue) = opened(&EngineConfig::new("me"));
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&seen);
        connection.on_remote_begin(move |id| sink.lock().expect("lock").push(*id));

        connection
            .dispatch(
                7,
                Performative::Begin(Begin {
                    incoming_window: 10,
                    ..Begin::default()
                }),
                &[],
                &mut queue,
            )
            .expect("remote begin");

        assert_eq!(*seen.lock().expect("lock"), vec![SessionId(0)]);
        let session = connection.session(SessionId(0)).expect("session");
        assert_eq!(session.remote_channel(), Some(7));
        assert!(session.state().is_remotely_open());
        assert!(queue.is_empty());
    }

    #[test]
    fn begin_answering_unknown_channel_is_a_violation() {
        let (mut connection, mut queue) = opened(&EngineConfig::new("me"));
        let err = connection
            .dispatch(
                0,
                Performative::Begin(Begin {
                    remote_channel: Some(4),
                    ..Begin::default()
                }),
                &[],
                &mut queue,
            )
            .expect_err("nothing began on channel 4");
        assert_eq!(
            err.protocol_violation(),
            Some(&ProtocolViolation::UnknownChannel { channel: 4 })
        );
    }

    #[test]
    fn session_is_released_after_both_ends() {
        let (mut connection, mut queue) = opened(&EngineConfig::new("me"));
        let id = connection.create_session().expect("session");
        connection.open_session(id, &mut queue).expect("begin");
        connection
            .dispatch(
                2,
                Performative::Begin(Begin {
                    remote_channel: Some(id.0),
                    ..Begin::default()
                }),
                &[],
                &mut queue,
            )
            .expect("answer");
        connection
            .end_session(id, None, &mut queue)
            .expect("end");
        assert!(connection.session(id).is_some());
        connection
            .dispatch(2, Performative::End(End::default()), &[], &mut queue)
            .expect("remote end");
        assert!(connection.session(id).is_none());
    }
}
