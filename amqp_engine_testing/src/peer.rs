//! A scripted remote peer that drives an engine from the wire side.
//!
//! The peer keeps just enough bookkeeping to produce well-formed frames:
//! its own link handles, the next delivery-id it will assign and which
//! handles have a delivery in progress. Tests read the engine's replies
//! straight from its [`FrameQueue`].

use std::collections::HashSet;

use amqp_engine::{
    Engine,
    EngineConfig,
    Result,
    SessionId,
    performative::{DeliveryState, Performative, Role},
    pipeline::{FrameQueue, OutboundFrame},
};
use bytes::Bytes;

use crate::builders;

/// Channel the scripted peer uses for its half of every session.
pub const PEER_CHANNEL: u16 = 0;

/// Remote end of a connection, scripted by the test.
#[derive(Debug, Default)]
pub struct ScriptedPeer {
    next_handle: u32,
    next_delivery_id: u32,
    in_progress: HashSet<u32>,
}

impl ScriptedPeer {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Delivery-id the peer will give its next delivery.
    #[must_use]
    pub const fn next_delivery_id(&self) -> u32 { self.next_delivery_id }

    /// Deliver `performative` to `engine` without payload.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub fn send(&self, engine: &mut Engine, performative: Performative) -> Result<()> {
        engine.ingest(PEER_CHANNEL, performative, None)
    }

    /// Open the connection from the peer's side.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub fn open(&self, engine: &mut Engine) -> Result<()> { self.send(engine, builders::open("peer")) }

    /// Answer the Begin the engine wrote for `session`.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub fn answer_begin(&self, engine: &mut Engine, session: SessionId, incoming_window: u32) -> Result<()> {
        self.send(engine, builders::begin(Some(session.0), incoming_window))
    }

    /// Attach a link named `name` playing `role`. Returns the peer's handle.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub fn attach(&mut self, engine: &mut Engine, name: &str, role: Role) -> Result<u32> {
        let handle = self.next_handle;
        self.send(engine, builders::attach(name, handle, role))?;
        self.next_handle += 1;
        Ok(handle)
    }

    /// Attach a transaction controller link. Returns the peer's handle.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub fn attach_controller(&mut self, engine: &mut Engine, name: &str) -> Result<u32> {
        let handle = self.next_handle;
        self.send(engine, builders::controller_attach(name, handle))?;
        self.next_handle += 1;
        Ok(handle)
    }

    /// Grant `credit` to the engine's sender attached to `handle`.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub fn grant(&self, engine: &mut Engine, handle: u32, delivery_count: u32, credit: u32) -> Result<()> {
        self.send(engine, builders::credit(handle, delivery_count, credit))
    }

    /// Write one Transfer frame carrying `payload` on `handle`.
    ///
    /// The first frame of a delivery draws a fresh delivery-id. Returns the
    /// delivery-id the frame belongs to.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub fn transfer(&mut self, engine: &mut Engine, handle: u32, payload: &[u8], more: bool) -> Result<u32> {
        let starting = !self.in_progress.contains(&handle);
        let id = if starting {
            self.next_delivery_id
        } else {
            self.next_delivery_id - 1
        };
        let frame = builders::transfer(handle, starting.then_some(id), more);
        engine.ingest(PEER_CHANNEL, frame, Some(Bytes::copy_from_slice(payload)))?;
        if starting {
            self.next_delivery_id += 1;
        }
        if more {
            self.in_progress.insert(handle);
        } else {
            self.in_progress.remove(&handle);
        }
        Ok(id)
    }

    /// Settle `id` as the receiving peer with `state`.
    ///
    /// # Errors
    ///
    /// Propagates the engine's error.
    pub fn settle(&self, engine: &mut Engine, id: u32, state: DeliveryState) -> Result<()> {
        self.send(engine, builders::disposition(Role::Receiver, id, None, true, Some(state)))
    }
}

/// An engine connected to a [`ScriptedPeer`] with session 0 begun on both
/// ends and every handshake frame drained.
///
/// # Errors
///
/// Propagates any engine error raised during the handshake.
pub fn connected(config: EngineConfig) -> Result<(Engine, ScriptedPeer, SessionId)> {
    let mut engine = Engine::new(config)?;
    let peer = ScriptedPeer::new();
    engine.start()?;
    engine.open()?;
    peer.open(&mut engine)?;
    let session = engine.create_session()?;
    engine.open_session(session)?;
    peer.answer_begin(&mut engine, session, u32::MAX)?;
    engine.pipeline_mut().drain();
    Ok((engine, peer, session))
}

/// Frames the engine wrote since the last drain.
pub fn written(engine: &mut Engine) -> Vec<OutboundFrame> { engine.pipeline_mut().drain() }

/// Whether `queue` holds a frame matching `pred`.
pub fn contains(queue: &FrameQueue, pred: impl Fn(&Performative) -> bool) -> bool {
    queue.iter().any(|frame| pred(&frame.performative))
}
