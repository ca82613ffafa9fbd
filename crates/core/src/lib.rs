//! Data model and capability interfaces shared by every Mofka crate:
//! events, metadata, the zero-copy [`descriptor::DataDescriptor`], bulk
//! transfer handles, and the pluggable validator/selector/serializer
//! traits plus their factory registry.

pub mod archive;
pub mod batch;
pub mod bulk;
pub mod capability;
pub mod data;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod event_id;
pub mod metadata;
pub mod registry;

pub use archive::{ArchiveReader, ArchiveWriter, BufferArchive, SliceArchive};
pub use batch::{decode_sized_bulk, encode_sized_bulk, running_offsets};
pub use bulk::BulkRef;
pub use capability::{DefaultSerializer, DefaultValidator, PartitionSelector, RoundRobinSelector, Serializer, Validator};
pub use data::Data;
pub use descriptor::{DataDescriptor, Segment};
pub use error::{Error, Result};
pub use event::{Event, PartitionInfo, PendingEvent, MAX_TOPIC_NAME_LEN};
pub use event_id::{is_sentinel, EventId, NO_MORE_EVENTS};
pub use metadata::Metadata;
pub use registry::Registry;
