//! The server-side partition core (§4.4): an append-only ingest log,
//! per-consumer cursors, and the streaming dispatch loop that feeds
//! subscribed consumers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mofka_core::archive::{BufferArchive, SliceArchive};
use mofka_core::descriptor::DataDescriptor;
use mofka_core::error::{Error, Result};
use mofka_core::event_id::EventId;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::datastore::DataStore;

/// `batch_size == 0` means "adaptive": all currently available events,
/// up to this internal cap (§4.4.2).
pub const DEFAULT_ADAPTIVE_BATCH_CAP: u64 = 1024;

struct PartitionLog {
    metadata_bytes: Vec<u8>,
    metadata_offsets: Vec<u64>,
    metadata_sizes: Vec<u64>,
    desc_bytes: Vec<u8>,
    desc_offsets: Vec<u64>,
    desc_sizes: Vec<u64>,
    completed: bool,
}

impl Default for PartitionLog {
    fn default() -> Self {
        Self {
            metadata_bytes: Vec::new(),
            metadata_offsets: Vec::new(),
            metadata_sizes: Vec::new(),
            desc_bytes: Vec::new(),
            desc_offsets: Vec::new(),
            desc_sizes: Vec::new(),
            completed: false,
        }
    }
}

impl PartitionLog {
    fn len(&self) -> u64 {
        self.metadata_sizes.len() as u64
    }
}

/// One dispatched batch's worth of ranges, ready for an RPC `recv_batch`.
pub struct DispatchBatch {
    pub count: u64,
    pub first_id: EventId,
    pub metadata_sizes: Vec<u64>,
    pub metadata_bytes: Vec<u8>,
    pub desc_sizes: Vec<u64>,
    pub desc_bytes: Vec<u8>,
}

/// The remote consumer's RPC reference: stands in for the `send_batch`
/// wire call of §6.2's `recv_batch` message.
#[async_trait]
pub trait ConsumerSink: Send + Sync {
    async fn feed(&self, batch: DispatchBatch) -> Result<()>;
}

/// A subscribed consumer's dispatch state: name, stop flag, and sink.
pub struct ConsumerHandle {
    pub name: String,
    should_stop: Arc<AtomicBool>,
    sink: Arc<dyn ConsumerSink>,
}

impl ConsumerHandle {
    pub fn new(name: impl Into<String>, sink: Arc<dyn ConsumerSink>) -> Self {
        Self {
            name: name.into(),
            should_stop: Arc::new(AtomicBool::new(false)),
            sink,
        }
    }

    pub fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::Acquire)
    }

    /// Atomically requests the dispatcher serving this handle to exit
    /// and wakes it if it's parked waiting for new data.
    pub fn stop(&self) {
        self.should_stop.store(true, Ordering::Release);
    }
}

struct DispatcherGuard<'a> {
    active: &'a AtomicUsize,
    idle: &'a Notify,
}

impl<'a> Drop for DispatcherGuard<'a> {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Per-partition server-side state (§4.4): the ingest log plus consumer
/// cursors, backed by an injected [`DataStore`].
pub struct PartitionManager<D: DataStore> {
    log: Mutex<PartitionLog>,
    log_cv: Notify,
    cursors: parking_lot::Mutex<HashMap<String, EventId>>,
    data_store: Arc<D>,
    active_dispatchers: AtomicUsize,
    dispatchers_idle: Notify,
}

impl<D: DataStore> PartitionManager<D> {
    pub fn new(data_store: Arc<D>) -> Self {
        Self {
            log: Mutex::new(PartitionLog::default()),
            log_cv: Notify::new(),
            cursors: parking_lot::Mutex::new(HashMap::new()),
            data_store,
            active_dispatchers: AtomicUsize::new(0),
            dispatchers_idle: Notify::new(),
        }
    }

    /// §4.4.1: appends one producer batch to the log. `metadata_sizes`/
    /// `data_sizes` each have length `num_events`; `metadata_payload`/
    /// `data_payload` are the concatenated serialized bytes. Returns the
    /// first assigned `EventID`; on failure nothing is appended.
    pub async fn receive_batch(
        &self,
        num_events: usize,
        metadata_sizes: &[u64],
        metadata_payload: &[u8],
        data_sizes: &[u64],
        data_payload: &[u8],
    ) -> Result<EventId> {
        if metadata_sizes.len() != num_events || data_sizes.len() != num_events {
            return Err(Error::invalid_config("batch size arrays must have length num_events"));
        }

        let mut log = self.log.lock().await;
        let first_id = log.len();

        // Resolved before any log mutation so a data-store rejection
        // never leaves a partial append visible (§4.4.1 step 8, §7).
        let descriptors = self.data_store.create_and_write(data_sizes, data_payload).await?;
        if descriptors.len() != num_events {
            return Err(Error::store("data store returned a mismatched descriptor count"));
        }

        let meta_start = log.metadata_bytes.len() as u64;
        let new_meta_offsets = mofka_core::batch::running_offsets(metadata_sizes, meta_start);
        log.metadata_offsets.extend_from_slice(&new_meta_offsets);
        log.metadata_sizes.extend_from_slice(metadata_sizes);
        log.metadata_bytes.extend_from_slice(metadata_payload);

        let desc_start = log.desc_bytes.len() as u64;
        let mut desc_sizes = Vec::with_capacity(num_events);
        let mut desc_bytes = Vec::new();
        for descriptor in &descriptors {
            let mut buf = BufferArchive::new();
            descriptor.save(&mut buf);
            let encoded = buf.into_bytes();
            desc_sizes.push(encoded.len() as u64);
            desc_bytes.extend_from_slice(&encoded);
        }
        let new_desc_offsets = mofka_core::batch::running_offsets(&desc_sizes, desc_start);
        log.desc_offsets.extend_from_slice(&new_desc_offsets);
        log.desc_sizes.extend_from_slice(&desc_sizes);
        log.desc_bytes.extend_from_slice(&desc_bytes);

        drop(log);
        self.log_cv.notify_waiters();
        debug!(first_id, num_events, "appended batch to partition log");
        Ok(first_id)
    }

    /// §4.4.2: streams batches to `handle` starting from its stored
    /// cursor (default 0) until it stops or the partition completes.
    pub async fn feed_consumer(&self, handle: &ConsumerHandle, batch_size: u64) -> Result<()> {
        self.active_dispatchers.fetch_add(1, Ordering::AcqRel);
        let _guard = DispatcherGuard {
            active: &self.active_dispatchers,
            idle: &self.dispatchers_idle,
        };

        let mut first_id = {
            let cursors = self.cursors.lock();
            *cursors.get(&handle.name).unwrap_or(&0)
        };

        loop {
            if handle.should_stop() {
                return Ok(());
            }

            let want = loop {
                let notified = self.log_cv.notified();
                {
                    let log = self.log.lock().await;
                    let n = log.len();
                    let available = n.saturating_sub(first_id);
                    if available > 0 || handle.should_stop() || (log.completed && first_id == n) {
                        let cap = if batch_size == 0 { DEFAULT_ADAPTIVE_BATCH_CAP } else { batch_size };
                        break available.min(cap);
                    }
                }
                notified.await;
            };

            if handle.should_stop() {
                return Ok(());
            }

            if want == 0 {
                handle
                    .sink
                    .feed(DispatchBatch {
                        count: 0,
                        first_id,
                        metadata_sizes: Vec::new(),
                        metadata_bytes: Vec::new(),
                        desc_sizes: Vec::new(),
                        desc_bytes: Vec::new(),
                    })
                    .await?;
                return Ok(());
            }

            let batch = {
                let log = self.log.lock().await;
                let start = first_id as usize;
                let end = (first_id + want) as usize;
                let meta_byte_start = log.metadata_offsets[start] as usize;
                let meta_byte_end = (log.metadata_offsets[end - 1] + log.metadata_sizes[end - 1]) as usize;
                let desc_byte_start = log.desc_offsets[start] as usize;
                let desc_byte_end = (log.desc_offsets[end - 1] + log.desc_sizes[end - 1]) as usize;

                DispatchBatch {
                    count: want,
                    first_id,
                    metadata_sizes: log.metadata_sizes[start..end].to_vec(),
                    metadata_bytes: log.metadata_bytes[meta_byte_start..meta_byte_end].to_vec(),
                    desc_sizes: log.desc_sizes[start..end].to_vec(),
                    desc_bytes: log.desc_bytes[desc_byte_start..desc_byte_end].to_vec(),
                }
            };

            handle.sink.feed(batch).await?;
            first_id += want;
        }
    }

    /// §4.4.3: advances `consumer_name`'s cursor to `event_id + 1`.
    /// Never decreases; idempotent.
    pub fn acknowledge(&self, consumer_name: &str, event_id: EventId) {
        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(consumer_name.to_string()).or_insert(0);
        let candidate = event_id.saturating_add(1);
        if candidate > *cursor {
            *cursor = candidate;
        }
    }

    pub fn cursor_for(&self, consumer_name: &str) -> EventId {
        *self.cursors.lock().get(consumer_name).unwrap_or(&0)
    }

    /// §4.4.4: reads the bytes each descriptor selects. An individual
    /// failure doesn't fail the whole call.
    pub async fn get_data(&self, descriptors: &[DataDescriptor]) -> Vec<Result<Vec<u8>>> {
        let mut out = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            out.push(self.data_store.read(descriptor).await);
        }
        out
    }

    /// Decodes a `desc_bytes` slice produced by `feed_consumer` back
    /// into descriptors, using the matching `desc_sizes`.
    pub fn decode_descriptors(desc_sizes: &[u64], desc_bytes: &[u8]) -> Result<Vec<DataDescriptor>> {
        let mut descriptors = Vec::with_capacity(desc_sizes.len());
        let mut cursor = 0usize;
        for &size in desc_sizes {
            let end = cursor + size as usize;
            let mut reader = SliceArchive::new(&desc_bytes[cursor..end]);
            descriptors.push(DataDescriptor::load(&mut reader)?);
            cursor = end;
        }
        Ok(descriptors)
    }

    /// §4.4.5: marks the partition complete so dispatchers drain and exit.
    pub async fn mark_as_complete(&self) {
        self.log.lock().await.completed = true;
        self.log_cv.notify_waiters();
    }

    /// §4.4.5: marks the partition complete, wakes every dispatcher, and
    /// waits for them all to exit before returning.
    pub async fn destroy(&self) {
        self.mark_as_complete().await;
        while self.active_dispatchers.load(Ordering::Acquire) > 0 {
            self.dispatchers_idle.notified().await;
        }
    }
}
