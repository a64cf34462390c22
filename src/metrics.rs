//! Metric helpers for `amqp_engine`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::counter;

/// Name of the counter tracking performatives processed.
pub const FRAMES_PROCESSED: &str = "amqp_engine_frames_processed_total";
/// Name of the counter tracking completed deliveries.
pub const DELIVERIES_COMPLETED: &str = "amqp_engine_deliveries_completed_total";
/// Name of the counter tracking engines moved into the failed state.
pub const ENGINE_FAILURES: &str = "amqp_engine_failures_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Performatives received from the peer.
    Inbound,
    /// Performatives written to the pipeline.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    const fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Record a processed performative for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a delivery whose final frame was written or received.
pub fn inc_deliveries(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(DELIVERIES_COMPLETED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record an engine entering its terminal failed state.
pub fn inc_engine_failures() {
    #[cfg(feature = "metrics")]
    counter!(ENGINE_FAILURES).increment(1);
}
