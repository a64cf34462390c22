#![doc(html_root_url = "https://docs.rs/amqp_engine/latest")]
//! Public API for the `amqp_engine` library.
//!
//! A sans-I/O protocol engine for the AMQP 1.0 transport model. The engine
//! tracks connections, sessions, links and deliveries, enforces session and
//! link flow control and settlement, and coordinates transactions. Decoded
//! performatives go in through [`Engine::ingest`]; outbound performatives
//! leave through a [`Pipeline`].

pub mod config;
pub mod connection;
pub mod delivery;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod event;
pub mod link;
pub mod metrics;
pub mod performative;
pub mod pipeline;
pub mod sequence;
pub mod session;
pub mod transaction;

pub use config::EngineConfig;
pub use connection::Connection;
pub use delivery::{DeliveryEvent, IncomingDelivery, OutgoingDelivery};
pub use endpoint::{EndpointEvent, EndpointState, LinkHandle, LinkId, SessionId, SessionState};
pub use engine::{Engine, EngineState};
pub use error::{ConfigError, EngineError, EngineStateError, ProtocolViolation, Result};
pub use link::{CreditEvent, Link, Receiver, Sender};
pub use metrics::{DELIVERIES_COMPLETED, Direction, ENGINE_FAILURES, FRAMES_PROCESSED};
pub use pipeline::{FrameQueue, OutboundFrame, Pipeline};
pub use sequence::SequenceNumber;
pub use session::{Session, SessionEvent};
pub use transaction::{Transaction, TransactionEvent, TransactionManager, TransactionState};
