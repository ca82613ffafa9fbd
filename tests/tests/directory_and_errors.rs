//! Acknowledgement-resume scenario plus directory-level and
//! producer/consumer error handling.

use std::sync::Arc;

use integration_tests::{fixtures, setup::TestTopic};
use mofka_client::{ConsumerConfig, ProducerConfig};
use mofka_core::capability::{DefaultSerializer, DefaultValidator, RoundRobinSelector};
use mofka_core::data::Data;
use mofka_core::error::Error;
use mofka_directory::{Directory, InMemoryStore, Registries};

fn fresh_directory() -> Directory<InMemoryStore> {
    Directory::new(Arc::new(InMemoryStore::new()), Registries::with_defaults())
}

#[tokio::test]
async fn acknowledging_resumes_a_new_consumer_of_the_same_name() {
    let topic = TestTopic::create("ack-resume", 1).await;
    let producer = topic.producer("producer-1", ProducerConfig::default()).await;

    let first = topic.consumer("shared-name", ConsumerConfig::default()).await;
    first.subscribe().await.unwrap();

    for i in 0..100u64 {
        let _ = producer.push(fixtures::counter_metadata(i), fixtures::counter_data(i), None).await;
    }
    producer.flush().await;

    let mut last_event = None;
    for _ in 0..50 {
        let event = first.pull().await;
        last_event = Some(event);
    }
    let event_49 = last_event.unwrap();
    assert_eq!(event_49.id, 49);
    first.acknowledge(&event_49).await.unwrap();
    first.unsubscribe().await.unwrap();

    producer.shutdown().await;

    let second = topic.consumer("shared-name", ConsumerConfig::default()).await;
    second.subscribe().await.unwrap();
    let resumed = second.pull().await;
    assert_eq!(resumed.id, 50, "a fresh consumer of the same name must resume after the acknowledged event");
    second.unsubscribe().await.unwrap();
}

#[tokio::test]
async fn creating_a_topic_twice_fails_with_topic_exists() {
    let directory = fresh_directory();
    directory
        .create_topic("dup", &DefaultValidator, &RoundRobinSelector::default(), &DefaultSerializer)
        .await
        .unwrap();
    let err = directory
        .create_topic("dup", &DefaultValidator, &RoundRobinSelector::default(), &DefaultSerializer)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TopicExists(_)));
}

#[tokio::test]
async fn opening_an_unknown_topic_fails_with_topic_not_found() {
    let directory = fresh_directory();
    let err = directory.open_topic("ghost").await.unwrap_err();
    assert!(matches!(err, Error::TopicNotFound(_)));
}

#[tokio::test]
async fn pushing_to_an_out_of_range_partition_fails() {
    let topic = TestTopic::create("single-partition", 1).await;
    let producer = topic.producer("producer-1", ProducerConfig::default()).await;

    let err = producer.push(fixtures::k1_metadata(), Data::empty(), Some(7)).await.await.unwrap_err();
    assert!(matches!(err, Error::PartitionOutOfRange { .. }));

    producer.shutdown().await;
}

#[tokio::test]
async fn acknowledging_the_sentinel_event_is_an_error() {
    let topic = TestTopic::create("sentinel-ack", 1).await;
    let consumer = topic.consumer("consumer-1", ConsumerConfig::default()).await;
    consumer.subscribe().await.unwrap();

    topic.mark_as_complete().await.unwrap();
    let sentinel = consumer.pull().await;
    assert!(sentinel.is_sentinel());

    let err = consumer.acknowledge(&sentinel).await.unwrap_err();
    assert!(matches!(err, Error::Completed));

    consumer.unsubscribe().await.unwrap();
}
