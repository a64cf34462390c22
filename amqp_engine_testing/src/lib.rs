//! Utilities for driving an [`Engine`](amqp_engine::Engine) in tests.
//!
//! A [`ScriptedPeer`] plays the remote end of a connection by feeding
//! hand-built performatives into an engine, and [`exchange`] connects two
//! engines back to back so both ends run real engine code.
//!
//! ```rust
//! use amqp_engine::EngineConfig;
//! use amqp_engine_testing::connected;
//!
//! let (engine, _peer, session) = connected(EngineConfig::new("local")).unwrap();
//! assert!(engine.session(session).is_some());
//! ```

pub mod builders;
pub mod logging;
pub mod metrics;
pub mod peer;
pub mod shuttle;

pub use logging::{LoggerHandle, logger};
pub use metrics::{counter_value, debugging_recorder_setup};
pub use peer::{PEER_CHANNEL, ScriptedPeer, connected, contains, written};
pub use shuttle::{exchange, pump};
