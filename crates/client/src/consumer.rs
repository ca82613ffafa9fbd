//! Consumer engine (§4.6): subscribes to a topic's partitions, receives
//! push-style batches, and fulfills user `pull()` futures, fetching data
//! on demand through a pluggable selector/allocator pair.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{oneshot, Mutex, Semaphore};
use tracing::debug;
use uuid::Uuid;

use mofka_core::archive::SliceArchive;
use mofka_core::bulk::BulkRef;
use mofka_core::capability::Serializer;
use mofka_core::data::Data;
use mofka_core::descriptor::DataDescriptor;
use mofka_core::error::{Error, Result};
use mofka_core::event::{Event, PartitionInfo, PendingEvent};
use mofka_core::event_id::EventId;
use mofka_core::metadata::Metadata;
use mofka_rpc::{PartitionService, RecvBatchSink, SubscriptionToken};
use mofka_threadpool::ThreadPool;

/// Upper bound on the number of per-event fetch tasks a single
/// `recv_batch` push may have in flight at once, so a large incoming
/// batch cannot spawn unbounded concurrent `request_data` RPCs.
pub const DEFAULT_MAX_IN_FLIGHT_FETCHES: usize = 64;

/// Narrows a descriptor down to the subset of data worth fetching for a
/// given event. The default never fetches (§4.6: "defaults to Null").
pub trait DataSelector: Send + Sync {
    fn select(&self, metadata: &mut Metadata, descriptor: &DataDescriptor) -> DataDescriptor;
}

#[derive(Debug, Default)]
pub struct NullDataSelector;

impl DataSelector for NullDataSelector {
    fn select(&self, _metadata: &mut Metadata, _descriptor: &DataDescriptor) -> DataDescriptor {
        DataDescriptor::null()
    }
}

/// Supplies destination memory for a selected fetch. In this transport
/// (no RDMA bulk transfer) the fetched bytes come back as an owned
/// `Vec<u8>` from `request_data` directly; the allocator hook is kept
/// so callers can still observe/account for each fetch's size.
pub trait DataAllocator: Send + Sync {
    fn allocate(&self, metadata: &Metadata, size: u64);
}

#[derive(Debug, Default)]
pub struct NoopDataAllocator;

impl DataAllocator for NoopDataAllocator {
    fn allocate(&self, _metadata: &Metadata, _size: u64) {}
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Batch size requested of each partition's dispatcher; `0` lets the
    /// partition apply its own adaptive cap.
    pub batch_size: u64,
    pub max_in_flight_fetches: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 0,
            max_in_flight_fetches: DEFAULT_MAX_IN_FLIGHT_FETCHES,
        }
    }
}

/// One slot of the event queue contract (§4.6.2): either a promise left
/// by a user `pull()` waiting for an event (`credit == true`), or a
/// future left by an already-arrived batch waiting to be consumed
/// (`credit == false`).
enum Entry {
    Promise(oneshot::Sender<Event>),
    Future(oneshot::Receiver<Event>),
}

struct EngineState {
    queue: VecDeque<Entry>,
    credit: bool,
    completed_partitions: usize,
}

/// A consumer bound to one topic's partitions (§4.6).
pub struct ConsumerEngine {
    name: String,
    serializer: Arc<dyn Serializer>,
    data_selector: Arc<dyn DataSelector>,
    data_allocator: Arc<dyn DataAllocator>,
    services: Vec<Arc<dyn PartitionService>>,
    partitions: Vec<PartitionInfo>,
    partition_index: HashMap<Uuid, usize>,
    thread_pool: Arc<ThreadPool>,
    fetch_semaphore: Arc<Semaphore>,
    state: Mutex<EngineState>,
    tokens: parking_lot::Mutex<Vec<Option<Arc<dyn SubscriptionToken>>>>,
    config: ConsumerConfig,
}

impl ConsumerEngine {
    pub fn new(
        name: impl Into<String>,
        serializer: Box<dyn Serializer>,
        data_selector: Arc<dyn DataSelector>,
        data_allocator: Arc<dyn DataAllocator>,
        services: Vec<Arc<dyn PartitionService>>,
        partitions: Vec<PartitionInfo>,
        thread_pool: Arc<ThreadPool>,
        config: ConsumerConfig,
    ) -> Arc<Self> {
        let partition_index = partitions
            .iter()
            .enumerate()
            .map(|(index, info)| (info.uuid, index))
            .collect();
        let token_slots = partitions.iter().map(|_| None).collect();
        let fetch_semaphore = Arc::new(Semaphore::new(config.max_in_flight_fetches.max(1)));

        Arc::new(Self {
            name: name.into(),
            serializer: Arc::from(serializer),
            data_selector,
            data_allocator,
            services,
            partitions,
            partition_index,
            thread_pool,
            fetch_semaphore,
            state: Mutex::new(EngineState {
                queue: VecDeque::new(),
                credit: false,
                completed_partitions: 0,
            }),
            tokens: parking_lot::Mutex::new(token_slots),
            config,
        })
    }

    fn sentinel_partition(&self) -> PartitionInfo {
        self.partitions
            .first()
            .cloned()
            .unwrap_or_else(|| PartitionInfo::new(Uuid::nil(), "", 0))
    }

    /// Sends a `request_events` RPC to every target partition (§4.6.1).
    pub async fn subscribe(self: &Arc<Self>) -> Result<()> {
        for (index, service) in self.services.iter().enumerate() {
            let sink: Arc<dyn RecvBatchSink> = self.clone();
            let token = service
                .request_events(index, &self.name, self.config.batch_size, sink)
                .await?;
            self.tokens.lock()[index] = Some(token);
        }
        Ok(())
    }

    /// Sends `remove_consumer` to every subscribed partition (§4.6.5).
    pub async fn unsubscribe(&self) -> Result<()> {
        let tokens = std::mem::replace(&mut *self.tokens.lock(), self.partitions.iter().map(|_| None).collect());
        for (service, token) in self.services.iter().zip(tokens) {
            if let Some(token) = token {
                service.remove_consumer(token).await?;
            }
        }
        Ok(())
    }

    /// Pulls the next event, following the credit-flag FIFO contract of
    /// §4.6.2. Resolves to the "no more events" sentinel once every
    /// subscribed partition has completed and there is nothing left to
    /// deliver.
    pub async fn pull(&self) -> Event {
        let mut guard = self.state.lock().await;
        if guard.credit || guard.queue.is_empty() {
            if guard.completed_partitions >= self.partitions.len() {
                return Event::sentinel(self.sentinel_partition());
            }
            let (tx, rx) = oneshot::channel();
            guard.queue.push_back(Entry::Promise(tx));
            guard.credit = true;
            drop(guard);
            return rx.await.unwrap_or_else(|_| Event::sentinel(self.sentinel_partition()));
        }

        let entry = guard.queue.pop_front().expect("checked non-empty above");
        if guard.queue.is_empty() {
            guard.credit = false;
        }
        drop(guard);
        match entry {
            Entry::Future(rx) => rx.await.unwrap_or_else(|_| Event::sentinel(self.sentinel_partition())),
            Entry::Promise(_) => unreachable!("credit == false implies the queue holds futures"),
        }
    }

    /// Reserves `count` promises to fulfil, following the same
    /// credit-symmetric rule as `pull()` (§4.6.3 step 2).
    async fn reserve(&self, count: u64) -> Vec<oneshot::Sender<Event>> {
        let mut guard = self.state.lock().await;
        let mut senders = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if guard.credit && !guard.queue.is_empty() {
                match guard.queue.pop_front() {
                    Some(Entry::Promise(tx)) => senders.push(tx),
                    _ => unreachable!("credit == true implies the queue holds promises"),
                }
                if guard.queue.is_empty() {
                    guard.credit = false;
                }
            } else {
                let (tx, rx) = oneshot::channel();
                guard.queue.push_back(Entry::Future(rx));
                guard.credit = false;
                senders.push(tx);
            }
        }
        senders
    }

    /// Sends `acknowledge` to the event's originating partition
    /// (§4.6.4). Acknowledging the sentinel event is an error.
    pub async fn acknowledge(&self, event: &Event) -> Result<()> {
        if event.is_sentinel() {
            return Err(Error::Completed);
        }
        let index = *self
            .partition_index
            .get(&event.partition.uuid)
            .ok_or_else(|| Error::invalid_config("event's partition is not subscribed by this consumer"))?;
        self.services[index].acknowledge(&self.name, event.id).await
    }
}

#[async_trait]
impl RecvBatchSink for ConsumerEngine {
    /// Push handler for an incoming batch (§4.6.3). A `count == 0` batch
    /// is a partition's end-of-stream signal.
    async fn recv_batch(
        &self,
        partition_index: usize,
        count: u64,
        first_id: EventId,
        meta_sizes: Vec<u64>,
        _meta_bulk: BulkRef,
        meta_bytes: Vec<u8>,
        desc_sizes: Vec<u64>,
        _desc_bulk: BulkRef,
        desc_bytes: Vec<u8>,
    ) -> Result<()> {
        if count == 0 {
            let mut guard = self.state.lock().await;
            guard.completed_partitions += 1;
            if guard.completed_partitions >= self.partitions.len() {
                while let Some(entry) = guard.queue.pop_front() {
                    if let Entry::Promise(tx) = entry {
                        let _ = tx.send(Event::sentinel(self.sentinel_partition()));
                    }
                }
                guard.credit = false;
            }
            debug!(partition_index, "consumer partition reported end of stream");
            return Ok(());
        }

        let meta_offsets = mofka_core::batch::running_offsets(&meta_sizes, 0);
        let desc_offsets = mofka_core::batch::running_offsets(&desc_sizes, 0);
        let senders = self.reserve(count).await;

        let partition_info = self.partitions[partition_index].clone();
        let service = self.services[partition_index].clone();

        for (i, sender) in senders.into_iter().enumerate() {
            let event_id = first_id + i as u64;
            let meta_start = meta_offsets[i] as usize;
            let meta_end = meta_start + meta_sizes[i] as usize;
            let meta_slice = meta_bytes[meta_start..meta_end].to_vec();
            let desc_start = desc_offsets[i] as usize;
            let desc_end = desc_start + desc_sizes[i] as usize;
            let desc_slice = desc_bytes[desc_start..desc_end].to_vec();

            let serializer = self.serializer.clone();
            let data_selector = self.data_selector.clone();
            let data_allocator = self.data_allocator.clone();
            let service = service.clone();
            let partition_info = partition_info.clone();
            let fetch_semaphore = self.fetch_semaphore.clone();

            self.thread_pool.push_work(
                async move {
                    let _permit = fetch_semaphore.acquire().await;
                    let event = fetch_one_event(
                        event_id,
                        partition_info,
                        &meta_slice,
                        &desc_slice,
                        serializer.as_ref(),
                        data_selector.as_ref(),
                        data_allocator.as_ref(),
                        service.as_ref(),
                    )
                    .await;
                    let _ = sender.send(event);
                },
                0,
            );
        }

        Ok(())
    }
}

async fn fetch_one_event(
    event_id: EventId,
    partition: PartitionInfo,
    meta_bytes: &[u8],
    desc_bytes: &[u8],
    serializer: &dyn Serializer,
    data_selector: &dyn DataSelector,
    data_allocator: &dyn DataAllocator,
    service: &dyn PartitionService,
) -> Event {
    let metadata = serializer.deserialize(meta_bytes).unwrap_or_else(|_| Metadata::empty());
    let descriptor = {
        let mut archive = SliceArchive::new(desc_bytes);
        DataDescriptor::load(&mut archive).unwrap_or_else(|_| DataDescriptor::null())
    };
    let mut pending = PendingEvent { id: event_id, partition, metadata, descriptor };

    let selected = data_selector.select(&mut pending.metadata, &pending.descriptor);
    let data = if selected.is_null() || selected.size() == 0 {
        Data::empty()
    } else {
        data_allocator.allocate(&pending.metadata, selected.size());
        let target = BulkRef::new("in-process", 0, selected.size(), "local");
        match service.request_data(vec![selected], vec![target]).await.into_iter().next() {
            Some(Ok(bytes)) => Data::from_segments(vec![Bytes::from(bytes)]),
            _ => Data::empty(),
        }
    };

    Event { id: pending.id, partition: pending.partition, metadata: pending.metadata, data }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mofka_core::capability::DefaultSerializer;
    use mofka_core::event_id::NO_MORE_EVENTS;
    use mofka_rpc::InProcessPartition;

    fn partition_info() -> PartitionInfo {
        PartitionInfo::new(Uuid::new_v4(), "addr0", 0)
    }

    fn engine(service: Arc<dyn PartitionService>) -> Arc<ConsumerEngine> {
        ConsumerEngine::new(
            "test-consumer",
            Box::new(DefaultSerializer),
            Arc::new(NullDataSelector),
            Arc::new(NoopDataAllocator),
            vec![service],
            vec![partition_info()],
            Arc::new(ThreadPool::new(2, 10)),
            ConsumerConfig::default(),
        )
    }

    #[tokio::test]
    async fn end_to_end_round_trip_over_in_process_partition() {
        let service: Arc<InProcessPartition> = Arc::new(InProcessPartition::new());
        let consumer = engine(service.clone());

        consumer.subscribe().await.unwrap();

        let mut metadata = Metadata::from_tree(serde_json::json!({"k": 1}));
        let bytes = DefaultSerializer.serialize(&mut metadata).unwrap();
        service
            .manager()
            .receive_batch(1, &[bytes.len() as u64], &bytes, &[], &[])
            .await
            .unwrap();

        let event = consumer.pull().await;
        assert_eq!(event.id, 0);
        assert!(!event.is_sentinel());

        consumer.acknowledge(&event).await.unwrap();
        assert_eq!(service.manager().cursor_for("test-consumer"), 1);

        service.manager().mark_as_complete().await;
        let sentinel = consumer.pull().await;
        assert_eq!(sentinel.id, NO_MORE_EVENTS);

        consumer.unsubscribe().await.unwrap();
    }

    #[tokio::test]
    async fn pull_called_before_arrival_is_fulfilled_once_the_batch_lands() {
        let service: Arc<InProcessPartition> = Arc::new(InProcessPartition::new());
        let consumer = engine(service.clone());
        consumer.subscribe().await.unwrap();

        let consumer_for_pull = consumer.clone();
        let pulled = tokio::spawn(async move { consumer_for_pull.pull().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut metadata = Metadata::empty();
        let bytes = DefaultSerializer.serialize(&mut metadata).unwrap();
        service.manager().receive_batch(1, &[bytes.len() as u64], &bytes, &[], &[]).await.unwrap();

        let event = pulled.await.unwrap();
        assert_eq!(event.id, 0);

        consumer.unsubscribe().await.unwrap();
    }

    #[tokio::test]
    async fn acknowledging_the_sentinel_event_is_an_error() {
        let service: Arc<InProcessPartition> = Arc::new(InProcessPartition::new());
        let consumer = engine(service);
        let sentinel = Event::sentinel(partition_info());
        let err = consumer.acknowledge(&sentinel).await.unwrap_err();
        assert!(matches!(err, Error::Completed));
    }
}
