//! Mofka broker core demo
//!
//! Wires a directory-backed topic to a handful of in-process partitions
//! and runs one producer/consumer round trip end to end, entirely
//! in-process (no RDMA/RPC transport, no persistent storage backend).

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use uuid::Uuid;

use mofka_client::{ConsumerConfig, ConsumerEngine, NoopDataAllocator, NullDataSelector, Producer, ProducerConfig};
use mofka_core::capability::{DefaultSerializer, DefaultValidator, RoundRobinSelector};
use mofka_core::data::Data;
use mofka_core::event::PartitionInfo;
use mofka_core::metadata::Metadata;
use mofka_directory::{Directory, InMemoryStore, Registries};
use mofka_rpc::{InProcessPartition, PartitionService};
use mofka_threadpool::ThreadPool;

/// Demo run configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default = "default_topic")]
    topic: String,
    #[serde(default = "default_num_partitions")]
    num_partitions: usize,
    #[serde(default = "default_num_events")]
    num_events: u64,
}

fn default_topic() -> String {
    "demo-topic".to_string()
}

fn default_num_partitions() -> usize {
    4
}

fn default_num_events() -> u64 {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            num_partitions: default_num_partitions(),
            num_events: default_num_events(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    mofka_telemetry::init_tracing_from_env();

    info!("starting mofka-demo v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    info!(topic = %config.topic, partitions = config.num_partitions, events = config.num_events, "loaded config");

    let directory = Directory::new(Arc::new(InMemoryStore::new()), Registries::with_defaults());
    directory
        .create_topic(&config.topic, &DefaultValidator, &RoundRobinSelector::default(), &DefaultSerializer)
        .await
        .context("failed to create topic")?;

    let mut services: Vec<Arc<InProcessPartition>> = Vec::with_capacity(config.num_partitions);
    for i in 0..config.num_partitions {
        let service = Arc::new(InProcessPartition::new());
        let info = PartitionInfo::new(Uuid::new_v4(), format!("na+sm://partition{i}"), 0);
        directory
            .add_custom_partition(&config.topic, &info)
            .await
            .context("failed to register partition")?;
        services.push(service);
    }
    mofka_telemetry::health().directory.set_healthy();
    mofka_telemetry::health().transport.set_healthy();

    let thread_pool = Arc::new(ThreadPool::new(4, 64));

    let topic = directory.open_topic(&config.topic).await.context("failed to open topic")?;
    let service_handles: Vec<Arc<dyn PartitionService>> =
        services.iter().map(|s| s.clone() as Arc<dyn PartitionService>).collect();

    let producer = Producer::new(
        "demo-producer",
        topic.validator,
        topic.selector,
        topic.serializer,
        service_handles.clone(),
        thread_pool.clone(),
        ProducerConfig::default(),
    );

    let topic = directory.open_topic(&config.topic).await.context("failed to reopen topic")?;
    let consumer = ConsumerEngine::new(
        "demo-consumer",
        topic.serializer,
        Arc::new(NullDataSelector),
        Arc::new(NoopDataAllocator),
        service_handles,
        topic.partitions,
        thread_pool.clone(),
        ConsumerConfig::default(),
    );
    consumer.subscribe().await.context("failed to subscribe consumer")?;

    let mut futures = Vec::with_capacity(config.num_events as usize);
    for i in 0..config.num_events {
        let metadata = Metadata::from_tree(serde_json::json!({ "event_num": i }));
        let data = Data::from_segments(vec![bytes::Bytes::from(format!("event {i} payload"))]);
        futures.push(producer.push(metadata, data, None).await);
    }
    for future in futures {
        let id = future.await.context("producer batch dispatch failed")?;
        info!(event_id = id, "published event");
    }
    producer.shutdown().await;

    for service in &services {
        service.mark_as_complete().await.context("failed to mark partition complete")?;
    }

    loop {
        let mut event = consumer.pull().await;
        if event.is_sentinel() {
            info!("received end-of-stream sentinel, demo complete");
            break;
        }
        let event_num = event.metadata.tree().context("failed to decode metadata")?["event_num"].clone();
        info!(event_id = event.id, event_num = %event_num, "consumed event");
        consumer.acknowledge(&event).await.context("failed to acknowledge event")?;
    }

    consumer.unsubscribe().await.context("failed to unsubscribe consumer")?;
    info!("shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        .add_source(config::Config::try_from(&Config::default())?)
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("MOFKA")
                .try_parsing(true),
        )
        .build()
        .context("failed to build configuration")?;

    config.try_deserialize().context("failed to deserialize configuration")
}
