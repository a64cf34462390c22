//! 32-bit serial numbers used for delivery-ids, transfer-ids and
//! delivery-counts.
//!
//! AMQP sequence numbers wrap modulo 2^32. [`SequenceNumber`] keeps the raw
//! value ordered by its unsigned magnitude (so it can key a `BTreeMap`) and
//! exposes [`SequenceNumber::serial_cmp`] for comparisons that must respect
//! wraparound.

use std::cmp::Ordering;

use derive_more::{Display, From, Into};

/// Wrapping 32-bit sequence value.
///
/// # Examples
///
/// ```
/// use amqp_engine::SequenceNumber;
/// let mut id = SequenceNumber::new(u32::MAX);
/// assert_eq!(id.post_increment(), SequenceNumber::new(u32::MAX));
/// assert_eq!(id, SequenceNumber::new(0));
/// assert!(SequenceNumber::new(u32::MAX).precedes(id));
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Into,
)]
#[display("{_0}")]
pub struct SequenceNumber(u32);

impl SequenceNumber {
    /// Construct a sequence number from its raw value.
    #[must_use]
    pub const fn new(value: u32) -> Self { Self(value) }

    /// Return the raw value.
    #[must_use]
    pub const fn get(self) -> u32 { self.0 }

    /// Add `n`, wrapping at 2^32.
    #[must_use]
    pub const fn wrapping_add(self, n: u32) -> Self { Self(self.0.wrapping_add(n)) }

    /// Return the successor of this value.
    #[must_use]
    pub const fn next(self) -> Self { self.wrapping_add(1) }

    /// Advance in place and return the value held before the increment.
    pub fn post_increment(&mut self) -> Self {
        let current = *self;
        *self = current.next();
        current
    }

    /// Number of steps from `self` forward to `later`, modulo 2^32.
    #[must_use]
    pub const fn distance_to(self, later: Self) -> u32 { later.0.wrapping_sub(self.0) }

    /// Compare two values using RFC 1982 serial number arithmetic.
    ///
    /// Values exactly half the number space apart are undefined under the
    /// RFC; they are reported as [`Ordering::Greater`] here so the result is
    /// total.
    #[must_use]
    pub const fn serial_cmp(self, other: Self) -> Ordering {
        if self.0 == other.0 {
            return Ordering::Equal;
        }
        let forward = other.0.wrapping_sub(self.0);
        if forward < (1 << 31) {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }

    /// Whether `self` comes strictly before `other` in serial order.
    #[must_use]
    pub const fn precedes(self, other: Self) -> bool {
        matches!(self.serial_cmp(other), Ordering::Less)
    }
}
