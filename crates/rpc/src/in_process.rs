//! An in-process [`PartitionService`] implementation backing tests and
//! the demo binary, standing in for the real RDMA transport that a
//! deployed broker would use to reach a partition's server process.

use std::sync::Arc;

use async_trait::async_trait;
use mofka_core::bulk::BulkRef;
use mofka_core::descriptor::DataDescriptor;
use mofka_core::error::Result;
use mofka_core::event_id::EventId;
use mofka_partition::{ConsumerHandle, ConsumerSink, DispatchBatch, InMemoryDataStore, PartitionManager};
use tracing::debug;

use crate::service::{PartitionService, RecvBatchSink, SubscriptionToken};

/// Forwards a partition's dispatched [`DispatchBatch`]s to a consumer's
/// [`RecvBatchSink`], tagging them with the partition's local index so a
/// consumer subscribed to several partitions can tell them apart.
struct SinkAdapter {
    partition_index: usize,
    sink: Arc<dyn RecvBatchSink>,
}

#[async_trait]
impl ConsumerSink for SinkAdapter {
    async fn feed(&self, batch: DispatchBatch) -> Result<()> {
        let meta_bulk = BulkRef::new("in-process", 0, batch.metadata_bytes.len() as u64, "local");
        let desc_bulk = BulkRef::new("in-process", 0, batch.desc_bytes.len() as u64, "local");
        self.sink
            .recv_batch(
                self.partition_index,
                batch.count,
                batch.first_id,
                batch.metadata_sizes,
                meta_bulk,
                batch.metadata_bytes,
                batch.desc_sizes,
                desc_bulk,
                batch.desc_bytes,
            )
            .await
    }
}

struct InProcessSubscription(Arc<ConsumerHandle>);
impl SubscriptionToken for InProcessSubscription {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// A [`PartitionService`] wired directly to an in-memory [`PartitionManager`],
/// with no serialization or network hop: RPC calls become direct async
/// method calls.
pub struct InProcessPartition {
    manager: Arc<PartitionManager<InMemoryDataStore>>,
}

impl InProcessPartition {
    pub fn new() -> Self {
        Self {
            manager: Arc::new(PartitionManager::new(Arc::new(InMemoryDataStore::new()))),
        }
    }

    pub fn manager(&self) -> &Arc<PartitionManager<InMemoryDataStore>> {
        &self.manager
    }
}

impl Default for InProcessPartition {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PartitionService for InProcessPartition {
    async fn send_batch(
        &self,
        producer_name: &str,
        count: u64,
        metadata_sizes: Vec<u64>,
        _metadata_bulk: BulkRef,
        metadata_bytes: Vec<u8>,
        data_sizes: Vec<u64>,
        _data_bulk: BulkRef,
        data_bytes: Vec<u8>,
    ) -> Result<EventId> {
        debug!(producer_name, count, "dispatching send_batch to in-process partition");
        self.manager
            .receive_batch(count as usize, &metadata_sizes, &metadata_bytes, &data_sizes, &data_bytes)
            .await
    }

    async fn request_events(
        &self,
        partition_index: usize,
        consumer_name: &str,
        batch_size: u64,
        sink: Arc<dyn RecvBatchSink>,
    ) -> Result<Arc<dyn SubscriptionToken>> {
        let adapter = Arc::new(SinkAdapter { partition_index, sink });
        let handle = Arc::new(ConsumerHandle::new(consumer_name, adapter));

        let manager = self.manager.clone();
        let dispatch_handle = handle.clone();
        tokio::spawn(async move {
            if let Err(err) = manager.feed_consumer(&dispatch_handle, batch_size).await {
                tracing::error!(%err, "consumer dispatch loop exited with an error");
            }
        });

        Ok(Arc::new(InProcessSubscription(handle)))
    }

    async fn acknowledge(&self, consumer_name: &str, event_id: EventId) -> Result<()> {
        self.manager.acknowledge(consumer_name, event_id);
        Ok(())
    }

    async fn remove_consumer(&self, token: Arc<dyn SubscriptionToken>) -> Result<()> {
        if let Some(subscription) = token.as_any().downcast_ref::<InProcessSubscription>() {
            subscription.0.stop();
        }
        Ok(())
    }

    async fn request_data(&self, descriptors: Vec<DataDescriptor>, _targets: Vec<BulkRef>) -> Vec<Result<Vec<u8>>> {
        self.manager.get_data(&descriptors).await
    }

    async fn mark_as_complete(&self) -> Result<()> {
        self.manager.mark_as_complete().await;
        Ok(())
    }
}
