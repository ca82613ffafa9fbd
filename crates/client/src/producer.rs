//! Producer batcher (§4.5): accumulates events into per-partition
//! batches, applies back-pressure on the number of in-flight batches,
//! and dispatches them to the partition's `send_batch` RPC.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{oneshot, Mutex, Notify};
use tracing::debug;

use mofka_core::bulk::BulkRef;
use mofka_core::capability::{PartitionSelector, Serializer, Validator};
use mofka_core::data::Data;
use mofka_core::error::{Error, Result};
use mofka_core::event::PartitionInfo;
use mofka_core::event_id::EventId;
use mofka_core::metadata::Metadata;
use mofka_rpc::PartitionService;
use mofka_threadpool::ThreadPool;

/// Inter-batch ordering a producer enforces on each partition's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    /// One sender task per partition; batches dispatch in enqueue order.
    Strict,
    /// Sends may run concurrently; only within-batch ordering holds.
    Loose,
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Target events per batch. `None` means adaptive: any non-empty
    /// batch is eligible for dispatch as soon as the sender is free.
    pub batch_size: Option<u64>,
    /// Maximum outstanding (enqueued-but-not-yet-dispatched) batches per
    /// partition before `push` blocks.
    pub max_num_batches: usize,
    pub ordering: Ordering,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            max_num_batches: 4,
            ordering: Ordering::Strict,
        }
    }
}

struct PendingEntry {
    metadata: Metadata,
    data: Data,
    promise: oneshot::Sender<Result<EventId>>,
}

#[derive(Default)]
struct Batch {
    entries: Vec<PendingEntry>,
}

impl Batch {
    fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct QueueState {
    batches: VecDeque<Batch>,
    stop: bool,
    flush_requested: bool,
    in_flight: u32,
}

enum PopOutcome {
    Stop,
    Batch(Batch),
}

/// One partition's active queue of in-flight batches (§4.5).
struct PartitionQueue {
    state: Mutex<QueueState>,
    /// Signals both "space freed up" (push-side waiters) and "a batch is
    /// ready" (sender-side waiters) — the two predicates share one
    /// condition variable, mirroring the partition log's `log_cv`.
    cv: Notify,
    /// Signals `flush()` waiters once the queue has fully drained.
    idle: Notify,
}

impl PartitionQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                batches: VecDeque::new(),
                stop: false,
                flush_requested: false,
                in_flight: 0,
            }),
            cv: Notify::new(),
            idle: Notify::new(),
        }
    }

    async fn enqueue(&self, entry: PendingEntry, max_num_batches: usize, batch_size: Option<u64>) {
        loop {
            let notified = self.cv.notified();
            {
                let mut guard = self.state.lock().await;
                let need_new_batch = match guard.batches.back() {
                    None => true,
                    Some(tail) => batch_size.map(|size| tail.len() >= size).unwrap_or(false),
                };
                if need_new_batch {
                    if guard.batches.len() >= max_num_batches {
                        drop(guard);
                        notified.await;
                        continue;
                    }
                    guard.batches.push_back(Batch::default());
                }
                guard.batches.back_mut().expect("just ensured a tail batch exists").entries.push(entry);
                self.cv.notify_waiters();
                return;
            }
        }
    }

    async fn wait_for_ready(&self, batch_size: Option<u64>) -> PopOutcome {
        loop {
            let notified = self.cv.notified();
            {
                let mut guard = self.state.lock().await;
                if let Some(head) = guard.batches.front() {
                    let ready = guard.flush_requested
                        || match batch_size {
                            Some(size) => head.len() >= size,
                            None => !head.is_empty(),
                        };
                    if ready {
                        let batch = guard.batches.pop_front().expect("front just matched");
                        guard.in_flight += 1;
                        self.cv.notify_waiters();
                        return PopOutcome::Batch(batch);
                    }
                } else if guard.stop {
                    return PopOutcome::Stop;
                } else if guard.flush_requested {
                    guard.flush_requested = false;
                    self.idle.notify_waiters();
                }
            }
            notified.await;
        }
    }

    async fn finish_batch(&self) {
        let mut guard = self.state.lock().await;
        guard.in_flight -= 1;
        if guard.batches.is_empty() && guard.in_flight == 0 {
            guard.flush_requested = false;
            self.idle.notify_waiters();
        }
    }

    async fn request_flush(&self) {
        {
            let mut guard = self.state.lock().await;
            if guard.batches.is_empty() && guard.in_flight == 0 {
                return;
            }
            guard.flush_requested = true;
        }
        self.cv.notify_waiters();
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            {
                let guard = self.state.lock().await;
                if guard.batches.is_empty() && guard.in_flight == 0 {
                    return;
                }
            }
            notified.await;
        }
    }

    async fn request_stop(&self) {
        {
            let mut guard = self.state.lock().await;
            guard.stop = true;
        }
        self.cv.notify_waiters();
    }
}

/// Future returned by [`Producer::push`]. Its first poll fires the
/// `flush()`-on-wait hook (§4.5.1 step 1) so a caller blocking on a
/// future whose batch is not yet full cannot self-deadlock.
pub struct PushFuture {
    receiver: oneshot::Receiver<Result<EventId>>,
    flush_on_wait: Option<Arc<PartitionQueue>>,
}

impl Future for PushFuture {
    type Output = Result<EventId>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(queue) = self.flush_on_wait.take() {
            tokio::spawn(async move { queue.request_flush().await });
        }
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::cancelled("producer batcher dropped the promise"))),
            Poll::Pending => Poll::Pending,
        }
    }
}

async fn dispatch_batch(
    producer_name: &str,
    serializer: &dyn Serializer,
    service: &dyn PartitionService,
    batch: Batch,
) {
    let count = batch.len();
    let mut metadata_sizes = Vec::with_capacity(batch.entries.len());
    let mut metadata_bytes = Vec::new();
    let mut data_sizes = Vec::with_capacity(batch.entries.len());
    let mut data_bytes = Vec::new();
    let mut serialize_err: Option<Error> = None;

    for entry in &batch.entries {
        let mut metadata = entry.metadata.clone();
        match serializer.serialize(&mut metadata) {
            Ok(bytes) => {
                metadata_sizes.push(bytes.len() as u64);
                metadata_bytes.extend_from_slice(&bytes);
                data_sizes.push(entry.data.size());
                data_bytes.extend_from_slice(&entry.data.to_contiguous());
            }
            Err(err) => {
                serialize_err = Some(err);
                break;
            }
        }
    }

    if let Some(err) = serialize_err {
        let msg = err.to_string();
        for entry in batch.entries {
            let _ = entry.promise.send(Err(Error::invalid_metadata(msg.clone())));
        }
        return;
    }

    let metadata_bulk = BulkRef::new("in-process", 0, metadata_bytes.len() as u64, "local");
    let data_bulk = BulkRef::new("in-process", 0, data_bytes.len() as u64, "local");
    match service
        .send_batch(
            producer_name,
            count,
            metadata_sizes,
            metadata_bulk,
            metadata_bytes,
            data_sizes,
            data_bulk,
            data_bytes,
        )
        .await
    {
        Ok(first_id) => {
            for (i, entry) in batch.entries.into_iter().enumerate() {
                let _ = entry.promise.send(Ok(first_id + i as u64));
            }
        }
        Err(err) => {
            let msg = err.to_string();
            for entry in batch.entries {
                let _ = entry.promise.send(Err(Error::transport(msg.clone())));
            }
        }
    }
}

struct Inner {
    name: String,
    validator: Box<dyn Validator>,
    selector: parking_lot::Mutex<Box<dyn PartitionSelector>>,
    serializer: Arc<dyn Serializer>,
    partitions: Vec<Arc<PartitionQueue>>,
    services: Vec<Arc<dyn PartitionService>>,
    thread_pool: Arc<ThreadPool>,
    config: ProducerConfig,
    active_senders: AtomicUsize,
    senders_idle: Notify,
}

struct SenderGuard(Arc<Inner>);

impl Drop for SenderGuard {
    fn drop(&mut self) {
        if self.0.active_senders.fetch_sub(1, AtomicOrdering::AcqRel) == 1 {
            self.0.senders_idle.notify_waiters();
        }
    }
}

/// A producer bound to one topic's partitions (§4.5). One sender task
/// per partition drains that partition's queue under `config.ordering`.
pub struct Producer {
    inner: Arc<Inner>,
}

impl Producer {
    pub fn new(
        name: impl Into<String>,
        validator: Box<dyn Validator>,
        selector: Box<dyn PartitionSelector>,
        serializer: Box<dyn Serializer>,
        services: Vec<Arc<dyn PartitionService>>,
        thread_pool: Arc<ThreadPool>,
        config: ProducerConfig,
    ) -> Self {
        let partitions = services.iter().map(|_| Arc::new(PartitionQueue::new())).collect::<Vec<_>>();
        let inner = Arc::new(Inner {
            name: name.into(),
            validator,
            selector: parking_lot::Mutex::new(selector),
            serializer: Arc::from(serializer),
            partitions,
            services,
            thread_pool,
            config,
            active_senders: AtomicUsize::new(0),
            senders_idle: Notify::new(),
        });

        for index in 0..inner.services.len() {
            let inner_for_sender = inner.clone();
            inner_for_sender.active_senders.fetch_add(1, AtomicOrdering::AcqRel);
            let guard = SenderGuard(inner_for_sender.clone());
            inner.thread_pool.push_work(
                async move { run_sender_loop(inner_for_sender, index, guard).await },
                0,
            );
        }

        Self { inner }
    }

    /// Sets the partitions the producer's selector may route to,
    /// mirroring the topic's partition list at open time.
    pub fn set_partitions(&self, partitions: Vec<PartitionInfo>) {
        self.inner.selector.lock().set_partitions(partitions);
    }

    /// Admits one event and appends it to its partition's active queue,
    /// blocking only on back-pressure (`max_num_batches`). Returns a
    /// future that resolves to the event's assigned [`EventId`] once the
    /// batch containing it is dispatched (§4.5.1).
    pub async fn push(&self, mut metadata: Metadata, data: Data, partition: Option<usize>) -> PushFuture {
        let (tx, rx) = oneshot::channel();

        if let Err(err) = self.inner.validator.validate(&mut metadata, &data) {
            let _ = tx.send(Err(err));
            return PushFuture { receiver: rx, flush_on_wait: None };
        }

        let index = match self.inner.selector.lock().select_partition_for(&mut metadata, partition) {
            Ok(index) => index,
            Err(err) => {
                let _ = tx.send(Err(err));
                return PushFuture { receiver: rx, flush_on_wait: None };
            }
        };

        let queue = self.inner.partitions[index].clone();
        let flush_on_wait = if self.inner.config.batch_size.is_some() {
            Some(queue.clone())
        } else {
            None
        };

        let entry = PendingEntry { metadata, data, promise: tx };
        let max_num_batches = self.inner.config.max_num_batches;
        let batch_size = self.inner.config.batch_size;
        queue.enqueue(entry, max_num_batches, batch_size).await;

        PushFuture { receiver: rx, flush_on_wait }
    }

    /// Requests a flush on every partition queue and waits for each to
    /// drain (§4.5.4).
    pub async fn flush(&self) {
        for queue in &self.inner.partitions {
            queue.request_flush().await;
        }
        for queue in &self.inner.partitions {
            queue.wait_idle().await;
        }
    }

    /// Flushes every partition queue, then stops and joins every sender
    /// task.
    pub async fn shutdown(&self) {
        self.flush().await;
        for queue in &self.inner.partitions {
            queue.request_stop().await;
        }
        while self.inner.active_senders.load(AtomicOrdering::Acquire) > 0 {
            self.inner.senders_idle.notified().await;
        }
    }
}

async fn run_sender_loop(inner: Arc<Inner>, partition_index: usize, _guard: SenderGuard) {
    let queue = inner.partitions[partition_index].clone();
    let service = inner.services[partition_index].clone();
    let serializer = inner.serializer.clone();
    let batch_size = inner.config.batch_size;

    loop {
        match queue.wait_for_ready(batch_size).await {
            PopOutcome::Stop => {
                debug!(partition = partition_index, "producer sender loop stopping");
                return;
            }
            PopOutcome::Batch(batch) => match inner.config.ordering {
                Ordering::Strict => {
                    dispatch_batch(&inner.name, serializer.as_ref(), service.as_ref(), batch).await;
                    queue.finish_batch().await;
                }
                Ordering::Loose => {
                    let name = inner.name.clone();
                    let serializer = serializer.clone();
                    let service = service.clone();
                    let queue = queue.clone();
                    inner.thread_pool.push_work(
                        async move {
                            dispatch_batch(&name, serializer.as_ref(), service.as_ref(), batch).await;
                            queue.finish_batch().await;
                        },
                        0,
                    );
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mofka_core::capability::{DefaultSerializer, DefaultValidator, RoundRobinSelector};
    use mofka_core::descriptor::DataDescriptor;
    use mofka_rpc::{RecvBatchSink, SubscriptionToken};
    use std::sync::atomic::AtomicU64;
    use uuid::Uuid;

    struct RecordingService {
        next_id: AtomicU64,
        received: parking_lot::Mutex<Vec<(u64, u64)>>,
    }

    impl RecordingService {
        fn new() -> Self {
            Self { next_id: AtomicU64::new(0), received: parking_lot::Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl PartitionService for RecordingService {
        async fn send_batch(
            &self,
            _producer_name: &str,
            count: u64,
            _metadata_sizes: Vec<u64>,
            _metadata_bulk: BulkRef,
            _metadata_bytes: Vec<u8>,
            _data_sizes: Vec<u64>,
            _data_bulk: BulkRef,
            _data_bytes: Vec<u8>,
        ) -> Result<EventId> {
            let first_id = self.next_id.fetch_add(count, AtomicOrdering::SeqCst);
            self.received.lock().push((first_id, count));
            Ok(first_id)
        }

        async fn request_events(
            &self,
            _partition_index: usize,
            _consumer_name: &str,
            _batch_size: u64,
            _sink: Arc<dyn RecvBatchSink>,
        ) -> Result<Arc<dyn SubscriptionToken>> {
            unimplemented!("not exercised by producer tests")
        }

        async fn acknowledge(&self, _consumer_name: &str, _event_id: EventId) -> Result<()> {
            Ok(())
        }

        async fn remove_consumer(&self, _token: Arc<dyn SubscriptionToken>) -> Result<()> {
            Ok(())
        }

        async fn request_data(&self, _descriptors: Vec<DataDescriptor>, _targets: Vec<BulkRef>) -> Vec<Result<Vec<u8>>> {
            Vec::new()
        }

        async fn mark_as_complete(&self) -> Result<()> {
            Ok(())
        }
    }

    fn producer_with(service: Arc<RecordingService>, config: ProducerConfig) -> Producer {
        let mut selector = RoundRobinSelector::default();
        selector.set_partitions(vec![PartitionInfo::new(Uuid::new_v4(), "addr0", 0)]);
        Producer::new(
            "test-producer",
            Box::new(DefaultValidator),
            Box::new(selector),
            Box::new(DefaultSerializer),
            vec![service],
            Arc::new(ThreadPool::new(2, 10)),
            config,
        )
    }

    #[tokio::test]
    async fn adaptive_push_dispatches_and_assigns_ids() {
        let service = Arc::new(RecordingService::new());
        let producer = producer_with(service.clone(), ProducerConfig::default());

        let f0 = producer.push(Metadata::empty(), Data::empty(), None).await;
        let f1 = producer.push(Metadata::empty(), Data::empty(), None).await;

        let id0 = f0.await.unwrap();
        let id1 = f1.await.unwrap();
        assert_eq!(id0, 0);
        assert_eq!(id1, 1);

        producer.shutdown().await;
    }

    #[tokio::test]
    async fn fixed_batch_size_waits_for_a_full_batch_before_sending() {
        let service = Arc::new(RecordingService::new());
        let config = ProducerConfig { batch_size: Some(2), ..ProducerConfig::default() };
        let producer = producer_with(service.clone(), config);

        let f0 = producer.push(Metadata::empty(), Data::empty(), None).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(service.received.lock().is_empty(), "must not send before the batch is full");

        let f1 = producer.push(Metadata::empty(), Data::empty(), None).await;
        let (id0, id1) = tokio::join!(f0, f1);
        assert_eq!(id0.unwrap(), 0);
        assert_eq!(id1.unwrap(), 1);
        assert_eq!(*service.received.lock(), vec![(0, 2)]);

        producer.shutdown().await;
    }

    #[tokio::test]
    async fn waiting_on_a_future_triggers_flush_and_unblocks_a_partial_batch() {
        let service = Arc::new(RecordingService::new());
        let config = ProducerConfig { batch_size: Some(10), ..ProducerConfig::default() };
        let producer = producer_with(service.clone(), config);

        let f0 = producer.push(Metadata::empty(), Data::empty(), None).await;
        let id0 = tokio::time::timeout(std::time::Duration::from_secs(1), f0)
            .await
            .expect("flush-on-wait should unblock a partial batch")
            .unwrap();
        assert_eq!(id0, 0);

        producer.shutdown().await;
    }

    #[tokio::test]
    async fn validator_rejection_completes_the_future_with_an_error_without_sending() {
        struct RejectAll;
        impl Validator for RejectAll {
            fn validate(&self, _metadata: &mut Metadata, _data: &Data) -> Result<()> {
                Err(Error::invalid_metadata("rejected"))
            }
            fn metadata(&self) -> Metadata {
                Metadata::empty()
            }
        }

        let service = Arc::new(RecordingService::new());
        let mut selector = RoundRobinSelector::default();
        selector.set_partitions(vec![PartitionInfo::new(Uuid::new_v4(), "addr0", 0)]);
        let producer = Producer::new(
            "test-producer",
            Box::new(RejectAll),
            Box::new(selector),
            Box::new(DefaultSerializer),
            vec![service.clone()],
            Arc::new(ThreadPool::new(1, 10)),
            ProducerConfig::default(),
        );

        let err = producer.push(Metadata::empty(), Data::empty(), None).await.await.unwrap_err();
        assert!(matches!(err, Error::InvalidMetadata(_)));
        assert!(service.received.lock().is_empty());

        producer.shutdown().await;
    }
}
