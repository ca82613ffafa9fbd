//! Selective-fetch scenarios: a consumer's data selector narrows a
//! descriptor before the broker fetches it.

use std::sync::Arc;

use integration_tests::{fixtures, setup::TestTopic};
use mofka_client::{ConsumerConfig, DataSelector, NoopDataAllocator, ProducerConfig};
use mofka_core::descriptor::DataDescriptor;
use mofka_core::metadata::Metadata;

enum View {
    Sub { offset: u64, size: u64 },
    Strided { offset: u64, nblocks: u64, blocksize: u64, gapsize: u64 },
    Unstructured { segments: Vec<(u64, u64)> },
}

struct ViewSelector(View);

impl DataSelector for ViewSelector {
    fn select(&self, _metadata: &mut Metadata, descriptor: &DataDescriptor) -> DataDescriptor {
        match &self.0 {
            View::Sub { offset, size } => descriptor.make_sub_view(*offset, *size),
            View::Strided { offset, nblocks, blocksize, gapsize } => {
                descriptor.make_strided_view(*offset, *nblocks, *blocksize, *gapsize).unwrap()
            }
            View::Unstructured { segments } => descriptor.make_unstructured_view(segments).unwrap(),
        }
    }
}

async fn fetch_with(selector: View) -> Vec<u8> {
    let topic = TestTopic::create("selective-fetch", 1).await;
    let producer = topic.producer("producer-1", ProducerConfig::default()).await;
    let consumer = topic
        .consumer_with(
            "consumer-1",
            ConsumerConfig::default(),
            Arc::new(ViewSelector(selector)),
            Arc::new(NoopDataAllocator),
        )
        .await;
    consumer.subscribe().await.unwrap();

    producer.push(fixtures::k1_metadata(), fixtures::alphabet_data(), None).await.await.unwrap();
    producer.shutdown().await;
    topic.mark_as_complete().await.unwrap();

    let event = consumer.pull().await;
    assert!(!event.is_sentinel());
    consumer.unsubscribe().await.unwrap();
    event.data.to_contiguous()
}

#[tokio::test]
async fn selective_sub_view_fetch() {
    let bytes = fetch_with(View::Sub { offset: 13, size: 26 }).await;
    assert_eq!(bytes, b"nopqrstuvwxyzABCDEFGHIJKLM");
}

#[tokio::test]
async fn strided_fetch() {
    let bytes = fetch_with(View::Strided { offset: 13, nblocks: 3, blocksize: 4, gapsize: 2 }).await;
    assert_eq!(bytes, b"nopqtuvwzABC");
}

#[tokio::test]
async fn unstructured_fetch() {
    let bytes = fetch_with(View::Unstructured { segments: vec![(3, 6), (15, 4), (27, 8)] }).await;
    assert_eq!(bytes, b"defghipqrsBCDEFGHI");
}
