//! Event identifiers.

/// 64-bit identifier assigned monotonically by a partition.
pub type EventId = u64;

/// Sentinel value meaning "no more events" (all bits set).
pub const NO_MORE_EVENTS: EventId = u64::MAX;

/// Returns whether an [`EventId`] is the "no more events" sentinel.
pub fn is_sentinel(id: EventId) -> bool {
    id == NO_MORE_EVENTS
}
