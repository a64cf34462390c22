//! Outbound seam between the engine and the transport collaborator.
//!
//! The engine never touches sockets. Every performative it must send is
//! handed to a [`Pipeline`] as an [`OutboundFrame`]; the transport is
//! responsible for encoding and writing it. [`FrameQueue`] is the in-memory
//! pipeline used when the caller prefers to drain frames explicitly.

use std::{collections::VecDeque, io};

use bytes::Bytes;
use tracing::trace;

use crate::{metrics, performative::Performative};

/// A performative addressed to a channel, with an optional payload.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundFrame {
    pub channel: u16,
    pub performative: Performative,
    pub payload: Option<Bytes>,
}

impl OutboundFrame {
    /// Build a frame without payload.
    #[must_use]
    pub fn new(channel: u16, performative: impl Into<Performative>) -> Self {
        Self {
            channel,
            performative: performative.into(),
            payload: None,
        }
    }

    /// Attach `payload` to the frame.
    #[must_use]
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Sink for performatives produced by the engine.
pub trait Pipeline {
    /// Accept one outbound frame.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` when the transport cannot accept the frame. The
    /// engine treats any such error as fatal.
    fn fire_write(&mut self, frame: OutboundFrame) -> io::Result<()>;
}

impl<P: Pipeline + ?Sized> Pipeline for &mut P {
    fn fire_write(&mut self, frame: OutboundFrame) -> io::Result<()> { (**self).fire_write(frame) }
}

impl<P: Pipeline + ?Sized> Pipeline for Box<P> {
    fn fire_write(&mut self, frame: OutboundFrame) -> io::Result<()> { (**self).fire_write(frame) }
}

/// Hand `frame` to `pipe`, counting it as outbound.
pub(crate) fn emit(pipe: &mut dyn Pipeline, frame: OutboundFrame) -> crate::Result<()> {
    trace!(
        channel = frame.channel,
        performative = frame.performative.name(),
        payload = frame.payload.as_ref().map_or(0, Bytes::len),
        "frame out"
    );
    pipe.fire_write(frame)?;
    metrics::inc_frames(metrics::Direction::Outbound);
    Ok(())
}

/// FIFO buffer of outbound frames awaiting collection by the caller.
#[derive(Debug, Default)]
pub struct FrameQueue {
    frames: VecDeque<OutboundFrame>,
}

impl FrameQueue {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Number of queued frames.
    #[must_use]
    pub fn len(&self) -> usize { self.frames.len() }

    /// Whether no frames are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.frames.is_empty() }

    /// Take the oldest queued frame.
    pub fn pop(&mut self) -> Option<OutboundFrame> { self.frames.pop_front() }

    /// Remove and return every queued frame in write order.
    pub fn drain(&mut self) -> Vec<OutboundFrame> { self.frames.drain(..).collect() }

    /// Borrow the queued frames without removing them.
    pub fn iter(&self) -> impl Iterator<Item = &OutboundFrame> { self.frames.iter() }
}

impl Pipeline for FrameQueue {
    fn fire_write(&mut self, frame: OutboundFrame) -> io::Result<()> {
        self.frames.push_back(frame);
        Ok(())
    }
}
