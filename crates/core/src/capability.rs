//! Pluggable event admission, routing, and encoding (§4.2).
//!
//! `Validator`, `PartitionSelector`, and `Serializer` share a common
//! shape: an implementation plus a `Metadata` round-trip, so their
//! configuration can be stored in the directory database alongside the
//! topic and reconstituted at `open_topic` time. A `__type__` field in
//! that configuration blob selects the implementation via the
//! [`Registry`](crate::registry::Registry), defaulting to `"default"`.

use crate::data::Data;
use crate::error::Result;
use crate::event::PartitionInfo;
use crate::metadata::Metadata;

/// Validates metadata/data pairs at admission time.
pub trait Validator: Send + Sync {
    /// Fails with [`crate::error::Error::InvalidMetadata`] when the event
    /// is rejected.
    fn validate(&self, metadata: &mut Metadata, data: &Data) -> Result<()>;

    /// Serializes this validator's configuration so it can be stored and
    /// later reconstituted by [`Registry::create`](crate::registry::Registry::create).
    fn metadata(&self) -> Metadata;
}

/// Accepts any well-formed document; the default validator (§4.2).
#[derive(Debug, Default)]
pub struct DefaultValidator;

impl Validator for DefaultValidator {
    fn validate(&self, _metadata: &mut Metadata, _data: &Data) -> Result<()> {
        Ok(())
    }

    fn metadata(&self) -> Metadata {
        Metadata::from_tree(serde_json::json!({"__type__": "default"}))
    }
}

/// Chooses which partition should store a given event.
pub trait PartitionSelector: Send + Sync {
    /// Installs the list of partitions available to route events to.
    fn set_partitions(&mut self, partitions: Vec<PartitionInfo>);

    /// Selects a partition index for `metadata`. `requested`, when
    /// present, lets the caller override the selector's own choice; the
    /// selector must still range-check it.
    fn select_partition_for(&mut self, metadata: &mut Metadata, requested: Option<usize>) -> Result<usize>;

    fn metadata(&self) -> Metadata;
}

/// Round-robins across the known partitions; the default selector (§4.2).
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    partitions: Vec<PartitionInfo>,
    next: usize,
}

impl PartitionSelector for RoundRobinSelector {
    fn set_partitions(&mut self, partitions: Vec<PartitionInfo>) {
        self.partitions = partitions;
        self.next = 0;
    }

    fn select_partition_for(&mut self, _metadata: &mut Metadata, requested: Option<usize>) -> Result<usize> {
        if self.partitions.is_empty() {
            return Err(crate::error::Error::invalid_config(
                "no partitions available to select from",
            ));
        }
        if let Some(index) = requested {
            if index >= self.partitions.len() {
                return Err(crate::error::Error::PartitionOutOfRange {
                    index,
                    len: self.partitions.len(),
                });
            }
            return Ok(index);
        }
        let index = self.next;
        self.next = (self.next + 1) % self.partitions.len();
        Ok(index)
    }

    fn metadata(&self) -> Metadata {
        Metadata::from_tree(serde_json::json!({"__type__": "default"}))
    }
}

/// Encodes/decodes event metadata for the wire and the append log.
pub trait Serializer: Send + Sync {
    fn serialize(&self, metadata: &mut Metadata) -> Result<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Metadata>;
    fn metadata(&self) -> Metadata;
}

/// Encodes the metadata's textual form with a `u64` length prefix; the
/// default serializer (§4.2).
#[derive(Debug, Default)]
pub struct DefaultSerializer;

impl Serializer for DefaultSerializer {
    fn serialize(&self, metadata: &mut Metadata) -> Result<Vec<u8>> {
        let text = metadata.text()?;
        let mut out = Vec::with_capacity(8 + text.len());
        out.extend_from_slice(&(text.len() as u64).to_le_bytes());
        out.extend_from_slice(text.as_bytes());
        Ok(out)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Metadata> {
        if bytes.len() < 8 {
            return Err(crate::error::Error::store("metadata buffer too short"));
        }
        let mut len_buf = [0u8; 8];
        len_buf.copy_from_slice(&bytes[0..8]);
        let len = u64::from_le_bytes(len_buf) as usize;
        let text = std::str::from_utf8(&bytes[8..8 + len])
            .map_err(|e| crate::error::Error::store(format!("invalid utf8 metadata: {e}")))?;
        Ok(Metadata::from_text(text.to_string()))
    }

    fn metadata(&self) -> Metadata {
        Metadata::from_tree(serde_json::json!({"__type__": "default"}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn round_robin_cycles_through_partitions() {
        let mut selector = RoundRobinSelector::default();
        selector.set_partitions(vec![
            PartitionInfo::new(Uuid::new_v4(), "addr0", 0),
            PartitionInfo::new(Uuid::new_v4(), "addr1", 0),
        ]);
        let mut md = Metadata::empty();
        assert_eq!(selector.select_partition_for(&mut md, None).unwrap(), 0);
        assert_eq!(selector.select_partition_for(&mut md, None).unwrap(), 1);
        assert_eq!(selector.select_partition_for(&mut md, None).unwrap(), 0);
    }

    #[test]
    fn round_robin_respects_requested_override() {
        let mut selector = RoundRobinSelector::default();
        selector.set_partitions(vec![
            PartitionInfo::new(Uuid::new_v4(), "addr0", 0),
            PartitionInfo::new(Uuid::new_v4(), "addr1", 0),
        ]);
        let mut md = Metadata::empty();
        assert_eq!(selector.select_partition_for(&mut md, Some(1)).unwrap(), 1);
    }

    #[test]
    fn round_robin_range_checks_requested_override() {
        let mut selector = RoundRobinSelector::default();
        selector.set_partitions(vec![PartitionInfo::new(Uuid::new_v4(), "addr0", 0)]);
        let mut md = Metadata::empty();
        assert!(selector.select_partition_for(&mut md, Some(5)).is_err());
    }

    #[test]
    fn default_serializer_round_trips() {
        let ser = DefaultSerializer;
        let mut md = Metadata::from_tree(serde_json::json!({"k": 1}));
        let bytes = ser.serialize(&mut md).unwrap();
        let mut restored = ser.deserialize(&bytes).unwrap();
        assert_eq!(restored.tree().unwrap(), md.tree().unwrap());
    }
}
