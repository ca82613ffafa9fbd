//! The server-side partition core (§4.4): the ingest log, consumer
//! dispatch loop, and the data-store front-end.

pub mod datastore;
pub mod manager;

pub use datastore::{DataStore, InMemoryDataStore};
pub use manager::{
    ConsumerHandle, ConsumerSink, DispatchBatch, PartitionManager, DEFAULT_ADAPTIVE_BATCH_CAP,
};
