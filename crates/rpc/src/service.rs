//! The wire messages of §6.2, as traits: the narrow surface the
//! producer batcher and consumer engine need from the external
//! RPC/RDMA transport, which is otherwise out of scope (§1).

use std::sync::Arc;

use async_trait::async_trait;
use mofka_core::bulk::BulkRef;
use mofka_core::descriptor::DataDescriptor;
use mofka_core::error::Result;
use mofka_core::event_id::EventId;

/// A handle returned by [`PartitionService::request_events`], used only
/// to unsubscribe. Transport implementations may wrap whatever context
/// they need; the client never inspects it, but `remove_consumer`
/// implementations need to downcast back to their own concrete type.
pub trait SubscriptionToken: Send + Sync {
    fn as_any(&self) -> &dyn std::any::Any;
}

/// The consumer-side push target for `recv_batch` (§6.2): whatever
/// receives batches dispatched by a partition's `feed_consumer` loop.
/// `meta_bulk`/`desc_bulk` describe the two bulk regions carrying
/// `meta_bytes`/`desc_bytes` over the real RDMA transport; an in-process
/// transport has no remote memory to address, so it resolves them
/// immediately into the accompanying byte vectors instead.
#[async_trait]
pub trait RecvBatchSink: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn recv_batch(
        &self,
        partition_index: usize,
        count: u64,
        first_id: EventId,
        meta_sizes: Vec<u64>,
        meta_bulk: BulkRef,
        meta_bytes: Vec<u8>,
        desc_sizes: Vec<u64>,
        desc_bulk: BulkRef,
        desc_bytes: Vec<u8>,
    ) -> Result<()>;
}

/// One partition's RPC surface (§6.2): `send_batch`, `request_events`,
/// `acknowledge`, `remove_consumer`, `request_data`, `mark_as_complete`.
/// `BulkRef` arguments describe the bulk-transfer regions the real RDMA
/// transport would register and pull from; the in-process transport
/// carries the same payload directly in the accompanying byte vectors.
#[async_trait]
pub trait PartitionService: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn send_batch(
        &self,
        producer_name: &str,
        count: u64,
        metadata_sizes: Vec<u64>,
        metadata_bulk: BulkRef,
        metadata_bytes: Vec<u8>,
        data_sizes: Vec<u64>,
        data_bulk: BulkRef,
        data_bytes: Vec<u8>,
    ) -> Result<EventId>;

    async fn request_events(
        &self,
        partition_index: usize,
        consumer_name: &str,
        batch_size: u64,
        sink: Arc<dyn RecvBatchSink>,
    ) -> Result<Arc<dyn SubscriptionToken>>;

    async fn acknowledge(&self, consumer_name: &str, event_id: EventId) -> Result<()>;

    async fn remove_consumer(&self, token: Arc<dyn SubscriptionToken>) -> Result<()>;

    /// `targets[i]` is the bulk region `descriptors[i]`'s data would be
    /// written into over the real transport; the in-process transport
    /// ignores it and returns the bytes directly.
    async fn request_data(&self, descriptors: Vec<DataDescriptor>, targets: Vec<BulkRef>) -> Vec<Result<Vec<u8>>>;

    async fn mark_as_complete(&self) -> Result<()>;
}
