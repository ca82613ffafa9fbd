//! Client-side core (§4.5, §4.6): the producer batcher and the
//! consumer engine sitting on top of a topic's partition services.

pub mod consumer;
pub mod producer;

pub use consumer::{
    ConsumerConfig, ConsumerEngine, DataAllocator, DataSelector, NoopDataAllocator,
    NullDataSelector, DEFAULT_MAX_IN_FLIGHT_FETCHES,
};
pub use producer::{Ordering as ProducerOrdering, Producer, ProducerConfig, PushFuture};
