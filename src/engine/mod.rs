//! The engine facade.
//!
//! [`Engine`] owns the [`Connection`] and the outbound [`Pipeline`]. Inbound
//! performatives enter through [`Engine::ingest`]; the application drives the
//! local side through the methods below, addressing sessions by
//! [`SessionId`] and links by [`LinkId`]. Any protocol violation or transport
//! error moves the engine into [`EngineState::Failed`], after which every
//! call reports [`EngineError::Failed`] with the original cause.

mod state;

use std::{fmt, sync::Arc};

use bytes::Bytes;
pub use state::EngineState;
use tracing::{debug, error, trace};

use crate::{
    config::EngineConfig,
    connection::Connection,
    endpoint::{LinkId, SessionId},
    error::{EngineError, EngineStateError, Result},
    event::EventHandler,
    link::Link,
    metrics,
    performative::{DeliveryState, ErrorCondition, Performative, TxnId},
    pipeline::{FrameQueue, Pipeline},
    sequence::SequenceNumber,
    session::{LinkKind, Session},
};

/// Sans-I/O AMQP 1.0 protocol engine.
pub struct Engine<P: Pipeline = FrameQueue> {
    config: EngineConfig,
    state: EngineState,
    connection: Connection,
    pipeline: P,
    on_failure: Option<EventHandler<EngineError>>,
}

impl<P: Pipeline> fmt::Debug for Engine<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl Engine<FrameQueue> {
    /// Create an engine that buffers outbound frames in a [`FrameQueue`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if `config` is invalid.
    pub fn new(config: EngineConfig) -> Result<Self> { Self::with_pipeline(config, FrameQueue::new()) }
}

impl<P: Pipeline> Engine<P> {
    /// Create an engine writing to `pipeline`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if `config` is invalid.
    pub fn with_pipeline(config: EngineConfig, pipeline: P) -> Result<Self> {
        config.validate()?;
        let connection = Connection::new(&config);
        Ok(Self {
            config,
            state: EngineState::Idle,
            connection,
            pipeline,
            on_failure: None,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig { &self.config }

    #[must_use]
    pub const fn state(&self) -> &EngineState { &self.state }

    #[must_use]
    pub const fn pipeline(&self) -> &P { &self.pipeline }

    pub fn pipeline_mut(&mut self) -> &mut P { &mut self.pipeline }

    #[must_use]
    pub const fn connection(&self) -> &Connection { &self.connection }

    /// Mutable access for handler registration and pre-open settings.
    pub fn connection_mut(&mut self) -> &mut Connection { &mut self.connection }

    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<&Session> { self.connection.session(id) }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> { self.connection.session_mut(id) }

    #[must_use]
    pub fn link(&self, id: LinkId) -> Option<&Link> { self.connection.link(id) }

    pub fn link_mut(&mut self, id: LinkId) -> Option<&mut Link> { self.connection.link_mut(id) }

    /// Register the handler fired once when the engine fails.
    pub fn on_failure<F>(&mut self, handler: F)
    where
        F: FnMut(&EngineError) + Send + 'static,
    {
        self.on_failure = Some(Box::new(handler));
    }

    /// Move the engine from idle to running.
    ///
    /// # Errors
    ///
    /// Returns [`EngineStateError::AlreadyOpen`] when already running, or the
    /// terminal error once the engine stopped.
    pub fn start(&mut self) -> Result<()> {
        if self.state.is_running() {
            return Err(EngineStateError::AlreadyOpen { endpoint: "engine" }.into());
        }
        if self.state.is_terminal() {
            return self.state.ensure_running();
        }
        debug!(container_id = %self.config.container_id, "engine started");
        self.state = EngineState::Running;
        Ok(())
    }

    /// Stop the engine and notify every endpoint with `EngineShutdown`.
    ///
    /// # Errors
    ///
    /// Returns the terminal error if the engine already stopped.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return self.state.ensure_running();
        }
        debug!(container_id = %self.config.container_id, "engine shutdown");
        self.state = EngineState::Shutdown;
        self.connection.fire_engine_shutdown();
        Ok(())
    }

    /// Fail the engine with `cause`. Returns the error every later call
    /// reports.
    pub fn engine_failed(&mut self, cause: EngineError) -> EngineError {
        if let EngineState::Failed(existing) = &self.state {
            return EngineError::Failed(Arc::clone(existing));
        }
        error!(error = %cause, "engine failed");
        metrics::inc_engine_failures();
        let cause = Arc::new(cause);
        self.state = EngineState::Failed(Arc::clone(&cause));
        if let Some(handler) = self.on_failure.as_mut() {
            handler(&cause);
        }
        self.connection.fire_engine_shutdown();
        EngineError::Failed(cause)
    }

    fn guarded<T>(&mut self, op: impl FnOnce(&mut Connection, &mut dyn Pipeline) -> Result<T>) -> Result<T> {
        self.state.ensure_running()?;
        let pipe: &mut dyn Pipeline = &mut self.pipeline;
        match op(&mut self.connection, pipe) {
            Err(err) if err.is_fatal() => Err(self.engine_failed(err)),
            other => other,
        }
    }

    fn on_session<T>(
        &mut self,
        id: SessionId,
        op: impl FnOnce(&mut Session, &mut dyn Pipeline) -> Result<T>,
    ) -> Result<T> {
        self.guarded(|connection, pipe| op(connection.session_entry(id)?, pipe))
    }

    /// Apply one performative received on `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Failed`] when the performative violates the
    /// protocol or the engine already failed.
    pub fn ingest(
        &mut self,
        channel: u16,
        performative: Performative,
        payload: Option<Bytes>,
    ) -> Result<()> {
        trace!(
            channel,
            performative = performative.name(),
            payload = payload.as_ref().map_or(0, Bytes::len),
            "frame in"
        );
        self.guarded(|connection, pipe| {
            metrics::inc_frames(metrics::Direction::Inbound);
            connection.dispatch(channel, performative, payload.as_deref().unwrap_or_default(), pipe)
        })
    }

    // ----- connection

    /// Write Open.
    ///
    /// # Errors
    ///
    /// Returns a state error if the connection was already opened.
    pub fn open(&mut self) -> Result<()> { self.guarded(|connection, pipe| connection.open(pipe)) }

    /// Write Close carrying `condition`.
    ///
    /// # Errors
    ///
    /// Returns a state error unless the connection is locally open.
    pub fn close(&mut self, condition: Option<ErrorCondition>) -> Result<()> {
        self.guarded(|connection, pipe| connection.close(condition, pipe))
    }

    // ----- sessions

    /// Create a session on the lowest free channel.
    ///
    /// # Errors
    ///
    /// Returns [`EngineStateError::ChannelsExhausted`] when every channel up to channel-max is taken.
    pub fn create_session(&mut self) -> Result<SessionId> {
        self.guarded(|connection, _| Ok(connection.create_session()?))
    }

    /// Write Begin for `session`.
    ///
    /// # Errors
    ///
    /// Returns a state error unless the connection is open and the session
    /// idle.
    pub fn open_session(&mut self, session: SessionId) -> Result<()> {
        self.guarded(|connection, pipe| connection.open_session(session, pipe))
    }

    /// Write End for `session`.
    ///
    /// # Errors
    ///
    /// Returns a state error unless the session is locally open.
    pub fn end_session(&mut self, session: SessionId, condition: Option<ErrorCondition>) -> Result<()> {
        self.guarded(|connection, pipe| connection.end_session(session, condition, pipe))
    }

    // ----- links

    fn create_link(&mut self, session: SessionId, kind: LinkKind, name: &str) -> Result<LinkId> {
        self.guarded(|connection, _| Ok(connection.create_link(session, kind, name)?))
    }

    /// Create a sending link named `name` on `session`.
    ///
    /// # Errors
    ///
    /// Returns a state error if the name is taken or handles are exhausted.
    pub fn sender(&mut self, session: SessionId, name: &str) -> Result<LinkId> {
        self.create_link(session, LinkKind::Sender, name)
    }

    /// Create a receiving link named `name` on `session`.
    ///
    /// # Errors
    ///
    /// Returns a state error if the name is taken or handles are exhausted.
    pub fn receiver(&mut self, session: SessionId, name: &str) -> Result<LinkId> {
        self.create_link(session, LinkKind::Receiver, name)
    }

    /// Create a transaction coordinator link named `name` on `session`.
    ///
    /// # Errors
    ///
    /// Returns a state error if the name is taken or handles are exhausted.
    pub fn coordinator(&mut self, session: SessionId, name: &str) -> Result<LinkId> {
        self.create_link(session, LinkKind::Coordinator, name)
    }

    /// Write Attach for `link`.
    ///
    /// # Errors
    ///
    /// Returns a state error unless the session is open and the link idle.
    pub fn open_link(&mut self, link: LinkId) -> Result<()> {
        self.on_session(link.session, |session, pipe| session.open_link(link.handle, pipe))
    }

    /// Write Detach with `closed=true`.
    ///
    /// # Errors
    ///
    /// Returns a state error unless the link is locally open.
    pub fn close_link(&mut self, link: LinkId, condition: Option<ErrorCondition>) -> Result<()> {
        self.on_session(link.session, |session, pipe| {
            session.close_link(link.handle, true, condition, pipe)
        })
    }

    /// Write Detach with `closed=false`.
    ///
    /// # Errors
    ///
    /// Returns a state error unless the link is locally open.
    pub fn detach_link(&mut self, link: LinkId, condition: Option<ErrorCondition>) -> Result<()> {
        self.on_session(link.session, |session, pipe| {
            session.close_link(link.handle, false, condition, pipe)
        })
    }

    // ----- credit

    /// Set the receiver's credit to `credit`.
    ///
    /// # Errors
    ///
    /// Returns a state error if `link` is not a receiver.
    pub fn set_credit(&mut self, link: LinkId, credit: u32) -> Result<()> {
        self.on_session(link.session, |session, pipe| session.set_credit(link.handle, credit, pipe))
    }

    /// Grant `additional` credit to the receiver.
    ///
    /// # Errors
    ///
    /// Returns a state error if `link` is not a receiver.
    pub fn add_credit(&mut self, link: LinkId, additional: u32) -> Result<()> {
        self.on_session(link.session, |session, pipe| {
            session.add_credit(link.handle, additional, pipe)
        })
    }

    /// Ask the remote sender to use up or return the receiver's credit.
    ///
    /// # Errors
    ///
    /// Returns a state error if `link` is not a receiver.
    pub fn drain(&mut self, link: LinkId) -> Result<()> {
        self.on_session(link.session, |session, pipe| session.drain(link.handle, pipe))
    }

    /// Report that the sender consumed the credit a drain asked for.
    ///
    /// # Errors
    ///
    /// Returns a state error if `link` is not a sender.
    pub fn drained(&mut self, link: LinkId) -> Result<()> {
        self.on_session(link.session, |session, pipe| session.drained(link.handle, pipe))
    }

    /// Record how many messages the sender could send.
    ///
    /// # Errors
    ///
    /// Returns a state error if `link` is not a sender.
    pub fn set_available(&mut self, link: LinkId, available: u32) -> Result<()> {
        self.on_session(link.session, |session, _| session.set_available(link.handle, available))
    }

    // ----- sending

    /// Send a whole message. Returns its delivery-id.
    ///
    /// # Errors
    ///
    /// Returns a state error if the sender has no credit or another message
    /// is in progress.
    pub fn send(&mut self, link: LinkId, tag: Bytes, payload: Bytes, settled: bool) -> Result<SequenceNumber> {
        self.on_session(link.session, |session, pipe| {
            session.send(link.handle, tag, payload, settled, pipe)
        })
    }

    /// Start a streamed message tagged `tag`.
    ///
    /// # Errors
    ///
    /// Returns a state error if the sender has no credit or another message
    /// is in progress.
    pub fn begin_message(&mut self, link: LinkId, tag: Bytes, settled: bool) -> Result<()> {
        self.on_session(link.session, |session, _| session.begin_message(link.handle, tag, settled))
    }

    /// Set the message-format of the current message before its first frame.
    ///
    /// # Errors
    ///
    /// Returns a state error if no message is pending.
    pub fn set_message_format(&mut self, link: LinkId, message_format: u32) -> Result<()> {
        self.on_session(link.session, |session, _| {
            session.set_message_format(link.handle, message_format)
        })
    }

    /// Write `bytes` of the current message; `complete` ends it. Returns the
    /// delivery-id.
    ///
    /// # Errors
    ///
    /// Returns a state error if no message is in progress.
    pub fn stream_bytes(&mut self, link: LinkId, bytes: Bytes, complete: bool) -> Result<SequenceNumber> {
        self.on_session(link.session, |session, pipe| {
            session.stream_bytes(link.handle, bytes, complete, pipe)
        })
    }

    /// Abort the current message.
    ///
    /// # Errors
    ///
    /// Returns a state error if no message is in progress.
    pub fn abort(&mut self, link: LinkId) -> Result<()> {
        self.on_session(link.session, |session, pipe| session.abort(link.handle, pipe))
    }

    // ----- settlement

    /// Update the local state of delivery `id`, optionally settling it.
    ///
    /// # Errors
    ///
    /// Returns a state error if the link holds no such delivery.
    pub fn disposition(
        &mut self,
        link: LinkId,
        id: SequenceNumber,
        state: Option<DeliveryState>,
        settle: bool,
    ) -> Result<()> {
        self.on_session(link.session, |session, pipe| {
            session.disposition(link.handle, id, state, settle, pipe)
        })
    }

    /// Take the buffered payload of delivery `id`, releasing window space.
    ///
    /// # Errors
    ///
    /// Returns a state error if the receiver holds no such delivery.
    pub fn read_delivery(&mut self, link: LinkId, id: SequenceNumber) -> Result<Bytes> {
        self.on_session(link.session, |session, pipe| session.read_delivery(link.handle, id, pipe))
    }

    // ----- transactions

    /// Accept the Declare `declare_id` as transaction `txn_id`.
    ///
    /// # Errors
    ///
    /// Returns a state error if no such Declare is pending.
    pub fn declared(&mut self, link: LinkId, declare_id: SequenceNumber, txn_id: TxnId) -> Result<()> {
        self.on_session(link.session, |session, pipe| {
            session.declared(link.handle, declare_id, txn_id, pipe)
        })
    }

    /// Refuse the Declare `declare_id`.
    ///
    /// # Errors
    ///
    /// Returns a state error if no such Declare is pending.
    pub fn declare_failed(
        &mut self,
        link: LinkId,
        declare_id: SequenceNumber,
        condition: ErrorCondition,
    ) -> Result<()> {
        self.on_session(link.session, |session, pipe| {
            session.declare_failed(link.handle, declare_id, condition, pipe)
        })
    }

    /// Confirm the pending Discharge of `txn_id`.
    ///
    /// # Errors
    ///
    /// Returns a state error unless `txn_id` is being discharged.
    pub fn discharged(&mut self, link: LinkId, txn_id: &TxnId) -> Result<()> {
        self.on_session(link.session, |session, pipe| session.discharged(link.handle, txn_id, pipe))
    }

    /// Refuse the pending Discharge of `txn_id`.
    ///
    /// # Errors
    ///
    /// Returns a state error unless `txn_id` is being discharged.
    pub fn discharge_failed(&mut self, link: LinkId, txn_id: &TxnId, condition: ErrorCondition) -> Result<()> {
        self.on_session(link.session, |session, pipe| {
            session.discharge_failed(link.handle, txn_id, condition, pipe)
        })
    }
}
