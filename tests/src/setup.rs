//! Common test setup: wires a directory-created topic to in-process
//! partition services and builds producers/consumers over it.

use std::sync::Arc;

use mofka_core::capability::{DefaultSerializer, DefaultValidator, RoundRobinSelector};
use mofka_core::error::Result;
use mofka_core::event::PartitionInfo;
use mofka_client::{ConsumerConfig, ConsumerEngine, DataAllocator, DataSelector, NoopDataAllocator, NullDataSelector, Producer, ProducerConfig};
use mofka_directory::{Directory, InMemoryStore, Registries};
use mofka_rpc::{InProcessPartition, PartitionService};
use mofka_threadpool::ThreadPool;
use uuid::Uuid;

/// A topic backed by `n` in-process partitions, wired through the same
/// directory create/open path a real deployment uses.
pub struct TestTopic {
    name: String,
    directory: Directory<InMemoryStore>,
    services: Vec<Arc<InProcessPartition>>,
    thread_pool: Arc<ThreadPool>,
}

impl TestTopic {
    /// Creates a topic with `num_partitions` partitions, all defaults
    /// (accept-all validator, round-robin selector, text serializer).
    pub async fn create(name: &str, num_partitions: usize) -> Self {
        let directory = Directory::new(Arc::new(InMemoryStore::new()), Registries::with_defaults());
        directory
            .create_topic(name, &DefaultValidator, &RoundRobinSelector::default(), &DefaultSerializer)
            .await
            .expect("create_topic should succeed for a fresh topic name");

        let mut services = Vec::with_capacity(num_partitions);
        for i in 0..num_partitions {
            let service = Arc::new(InProcessPartition::new());
            let info = PartitionInfo::new(Uuid::new_v4(), format!("na+sm://partition{i}"), 0);
            directory
                .add_custom_partition(name, &info)
                .await
                .expect("adding a partition to a freshly created topic should succeed");
            services.push(service);
        }

        Self {
            name: name.to_string(),
            directory,
            services,
            thread_pool: Arc::new(ThreadPool::new(2, 10)),
        }
    }

    pub fn directory(&self) -> &Directory<InMemoryStore> {
        &self.directory
    }

    fn service_handles(&self) -> Vec<Arc<dyn PartitionService>> {
        self.services.iter().map(|s| s.clone() as Arc<dyn PartitionService>).collect()
    }

    /// Builds a producer bound to every partition of this topic.
    pub async fn producer(&self, name: &str, config: ProducerConfig) -> Producer {
        let topic = self.directory.open_topic(&self.name).await.expect("topic should already exist");
        Producer::new(
            name,
            topic.validator,
            topic.selector,
            topic.serializer,
            self.service_handles(),
            self.thread_pool.clone(),
            config,
        )
    }

    /// Builds a consumer bound to every partition of this topic, using
    /// the given data selector/allocator.
    pub async fn consumer_with(
        &self,
        name: &str,
        config: ConsumerConfig,
        data_selector: Arc<dyn DataSelector>,
        data_allocator: Arc<dyn DataAllocator>,
    ) -> Arc<ConsumerEngine> {
        let topic = self.directory.open_topic(&self.name).await.expect("topic should already exist");
        ConsumerEngine::new(
            name,
            topic.serializer,
            data_selector,
            data_allocator,
            self.service_handles(),
            topic.partitions,
            self.thread_pool.clone(),
            config,
        )
    }

    /// Builds a consumer that never fetches data (§4.6's default).
    pub async fn consumer(&self, name: &str, config: ConsumerConfig) -> Arc<ConsumerEngine> {
        self.consumer_with(name, config, Arc::new(NullDataSelector), Arc::new(NoopDataAllocator))
            .await
    }

    /// Marks every partition complete (§4.4.5), triggering the sentinel
    /// fan-out on subscribed consumers once they catch up.
    pub async fn mark_as_complete(&self) -> Result<()> {
        for service in &self.services {
            service.mark_as_complete().await?;
        }
        Ok(())
    }
}
