//! End-to-end round-trip scenarios: publish then consume in order,
//! with and without a data payload, ending in the end-of-stream
//! sentinel.

use integration_tests::{fixtures, setup::TestTopic};
use mofka_client::{ConsumerConfig, ProducerConfig};
use mofka_core::data::Data;

#[tokio::test]
async fn round_trip_no_data() {
    let topic = TestTopic::create("round-trip-no-data", 1).await;
    let producer = topic.producer("producer-1", ProducerConfig::default()).await;
    let consumer = topic.consumer("consumer-1", ConsumerConfig::default()).await;
    consumer.subscribe().await.unwrap();

    let id = producer.push(fixtures::k1_metadata(), Data::empty(), None).await.await.unwrap();
    assert_eq!(id, 0);
    producer.shutdown().await;

    let mut event = consumer.pull().await;
    assert_eq!(event.id, 0);
    assert!(!event.is_sentinel());
    assert_eq!(event.metadata.tree().unwrap()["k"], 1);
    assert_eq!(event.data.size(), 0);

    topic.mark_as_complete().await.unwrap();
    let sentinel = consumer.pull().await;
    assert!(sentinel.is_sentinel());

    consumer.unsubscribe().await.unwrap();
}

#[tokio::test]
async fn hundred_event_stream_in_order_then_sentinel() {
    let topic = TestTopic::create("hundred-event-stream", 1).await;
    let producer = topic.producer("producer-1", ProducerConfig::default()).await;
    let consumer = topic.consumer("consumer-1", ConsumerConfig::default()).await;
    consumer.subscribe().await.unwrap();

    let mut futures = Vec::with_capacity(100);
    for i in 0..100u64 {
        let future = producer.push(fixtures::counter_metadata(i), fixtures::counter_data(i), None).await;
        futures.push(future);
    }
    for (i, future) in futures.into_iter().enumerate() {
        assert_eq!(future.await.unwrap(), i as u64);
    }
    producer.shutdown().await;
    topic.mark_as_complete().await.unwrap();

    for i in 0..100u64 {
        let mut event = consumer.pull().await;
        assert_eq!(event.id, i, "events must arrive in strictly increasing order");
        assert_eq!(event.metadata.tree().unwrap()["event_num"], i);
    }

    let sentinel = consumer.pull().await;
    assert!(sentinel.is_sentinel());

    consumer.unsubscribe().await.unwrap();
}
