//! Delivery tracking for both directions of a link.
//!
//! A delivery is one message transfer. [`IncomingDelivery`] accumulates the
//! payload of Transfer frames received on a receiver link;
//! [`OutgoingDelivery`] tracks what a sender has put on the wire. Both are
//! owned by their link and addressed by their session-scoped delivery-id.

mod incoming;
mod outgoing;
mod tracker;

pub use incoming::IncomingDelivery;
pub use outgoing::OutgoingDelivery;
pub use tracker::DeliveryIdTracker;

/// Kinds of delivery notifications fired by links.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeliveryEvent {
    /// First Transfer of a new incoming delivery.
    Received,
    /// A later Transfer, a Disposition, or completion changed the delivery.
    Updated,
}
