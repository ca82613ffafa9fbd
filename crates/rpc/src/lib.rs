//! Transport-facing traits standing in for the external RPC/RDMA
//! collaborator, plus an in-process implementation used by tests and
//! the demo binary.

pub mod in_process;
pub mod service;

pub use in_process::InProcessPartition;
pub use service::{PartitionService, RecvBatchSink, SubscriptionToken};
