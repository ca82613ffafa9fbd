//! The blob-store collaborator (§1, §4.4.4): an external data store in
//! the original system (Warabi-backed in production), specified here
//! by interface plus an in-memory implementation for tests and the
//! demo binary.
//!
//! Per the Open Question decision recorded in `DESIGN.md`, a
//! descriptor's `location` blob is the opaque pair `(region_id, offset)`
//! the in-memory store needs to locate a previously written event's
//! bytes: not a general-purpose format, just this implementation's own
//! bookkeeping.

use async_trait::async_trait;
use mofka_core::descriptor::DataDescriptor;
use mofka_core::error::{Error, Result};

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Writes one batch's payload (the concatenated bytes of `sizes.len()`
    /// events) and returns one descriptor per event, in order.
    async fn create_and_write(&self, sizes: &[u64], payload: &[u8]) -> Result<Vec<DataDescriptor>>;

    /// Reads the bytes a (possibly view-narrowed) descriptor selects.
    async fn read(&self, descriptor: &DataDescriptor) -> Result<Vec<u8>>;
}

fn encode_location(region_id: u64, region_offset: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.extend_from_slice(&region_id.to_le_bytes());
    buf.extend_from_slice(&region_offset.to_le_bytes());
    buf
}

fn decode_location(location: &[u8]) -> Result<(u64, u64)> {
    if location.len() != 16 {
        return Err(Error::store("malformed in-memory data store location"));
    }
    let mut region_id = [0u8; 8];
    let mut region_offset = [0u8; 8];
    region_id.copy_from_slice(&location[0..8]);
    region_offset.copy_from_slice(&location[8..16]);
    Ok((u64::from_le_bytes(region_id), u64::from_le_bytes(region_offset)))
}

/// An in-memory `DataStore`: each batch becomes one appended region.
#[derive(Default)]
pub struct InMemoryDataStore {
    regions: parking_lot::RwLock<Vec<Vec<u8>>>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
    async fn create_and_write(&self, sizes: &[u64], payload: &[u8]) -> Result<Vec<DataDescriptor>> {
        let expected: u64 = sizes.iter().sum();
        if expected != payload.len() as u64 {
            return Err(Error::store(format!(
                "batch payload size {} does not match declared sizes sum {expected}",
                payload.len()
            )));
        }

        let region_id = {
            let mut regions = self.regions.write();
            regions.push(payload.to_vec());
            (regions.len() - 1) as u64
        };

        let offsets = mofka_core::batch::running_offsets(sizes, 0);
        let descriptors = sizes
            .iter()
            .zip(offsets)
            .map(|(&size, offset)| DataDescriptor::from(encode_location(region_id, offset), size))
            .collect();
        Ok(descriptors)
    }

    async fn read(&self, descriptor: &DataDescriptor) -> Result<Vec<u8>> {
        let (region_id, region_offset) = decode_location(descriptor.location())?;
        let regions = self.regions.read();
        let region = regions
            .get(region_id as usize)
            .ok_or_else(|| Error::store(format!("no such data region {region_id}")))?;

        let mut out = Vec::with_capacity(descriptor.size() as usize);
        for segment in descriptor.flatten()? {
            let start = (region_offset + segment.offset) as usize;
            let end = start + segment.size as usize;
            if end > region.len() {
                return Err(Error::store("descriptor reads past the end of its data region"));
            }
            out.extend_from_slice(&region[start..end]);
        }
        Ok(out)
    }
}
