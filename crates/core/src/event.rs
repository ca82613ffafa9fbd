//! The unit of publication (§3).

use crate::data::Data;
use crate::descriptor::DataDescriptor;
use crate::event_id::{EventId, NO_MORE_EVENTS};
use crate::metadata::Metadata;

/// Maximum length, in bytes, of a topic name.
pub const MAX_TOPIC_NAME_LEN: usize = 256;

/// An event delivered to a consumer: an assigned id, user metadata, and
/// either the raw data or (before a selective fetch) a descriptor of
/// where it lives.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: EventId,
    pub partition: PartitionInfo,
    pub metadata: Metadata,
    pub data: Data,
}

impl Event {
    pub fn is_sentinel(&self) -> bool {
        self.id == NO_MORE_EVENTS
    }

    /// Builds the "no more events" sentinel event for a given partition.
    pub fn sentinel(partition: PartitionInfo) -> Self {
        Self {
            id: NO_MORE_EVENTS,
            partition,
            metadata: Metadata::empty(),
            data: Data::empty(),
        }
    }
}

/// Describes where an event's data lives before it has been fetched.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub id: EventId,
    pub partition: PartitionInfo,
    pub metadata: Metadata,
    pub descriptor: DataDescriptor,
}

/// Information about the Mofka provider hosting a partition: a stable
/// UUID plus its current address and provider id (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionInfo {
    pub uuid: uuid::Uuid,
    pub address: String,
    pub provider_id: u16,
}

impl PartitionInfo {
    pub fn new(uuid: uuid::Uuid, address: impl Into<String>, provider_id: u16) -> Self {
        Self {
            uuid,
            address: address.into(),
            provider_id,
        }
    }
}
