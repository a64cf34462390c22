//! Tracks the delivery currently being multiplexed on a receiver link.

use crate::sequence::SequenceNumber;

/// Holds the delivery-id of the partially received delivery on a link.
///
/// Empty when no delivery is in flight. A link may only have one partial
/// delivery at a time, so a single slot is enough.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryIdTracker {
    current: Option<SequenceNumber>,
}

impl DeliveryIdTracker {
    #[must_use]
    pub const fn new() -> Self { Self { current: None } }

    /// The delivery-id in flight, if any.
    #[must_use]
    pub const fn get(&self) -> Option<SequenceNumber> { self.current }

    /// Whether `id` is the delivery in flight.
    #[must_use]
    pub fn is(&self, id: SequenceNumber) -> bool { self.current == Some(id) }

    pub fn set(&mut self, id: SequenceNumber) { self.current = Some(id); }

    pub fn reset(&mut self) { self.current = None; }
}
