//! Topic directory logic (§4.7): binds a topic name to its validator,
//! selector, serializer, and partition list, stored under
//! `MOFKA:GLOBAL:<topic>:{validator,selector,serializer,partitions}`.

use std::sync::Arc;

use mofka_core::capability::{PartitionSelector, Serializer, Validator};
use mofka_core::error::{Error, Result};
use mofka_core::event::{PartitionInfo, MAX_TOPIC_NAME_LEN};
use mofka_core::metadata::Metadata;
use mofka_core::registry::Registry;

use crate::kv::KeyValueStore;

fn validator_key(topic: &str) -> String {
    format!("MOFKA:GLOBAL:{topic}:validator")
}
fn selector_key(topic: &str) -> String {
    format!("MOFKA:GLOBAL:{topic}:selector")
}
fn serializer_key(topic: &str) -> String {
    format!("MOFKA:GLOBAL:{topic}:serializer")
}
fn partitions_key(topic: &str) -> String {
    format!("MOFKA:GLOBAL:{topic}:partitions")
}

/// The three capability factories a directory service dispatches
/// reconstituted configuration through.
#[derive(Default)]
pub struct Registries {
    pub validators: Registry<dyn Validator>,
    pub selectors: Registry<dyn PartitionSelector>,
    pub serializers: Registry<dyn Serializer>,
}

impl Registries {
    /// A registry pre-populated with the `"default"` implementation of
    /// each capability (§4.2).
    pub fn with_defaults() -> Self {
        let mut registries = Self::default();
        registries
            .validators
            .register("default", |_m| Ok(Box::new(mofka_core::capability::DefaultValidator)));
        registries
            .selectors
            .register("default", |_m| Ok(Box::new(mofka_core::capability::RoundRobinSelector::default())));
        registries
            .serializers
            .register("default", |_m| Ok(Box::new(mofka_core::capability::DefaultSerializer)));
        registries
    }
}

/// A reconstituted topic: its capabilities plus the partitions it
/// currently fans out to.
pub struct Topic {
    pub name: String,
    pub validator: Box<dyn Validator>,
    pub selector: Box<dyn PartitionSelector>,
    pub serializer: Box<dyn Serializer>,
    pub partitions: Vec<PartitionInfo>,
}

fn metadata_to_bytes(metadata: &Metadata) -> Result<Vec<u8>> {
    let mut metadata = metadata.clone();
    Ok(metadata.text()?.as_bytes().to_vec())
}

fn bytes_to_metadata(bytes: &[u8]) -> Result<Metadata> {
    let text = String::from_utf8(bytes.to_vec()).map_err(|e| Error::store(format!("non-utf8 metadata: {e}")))?;
    Ok(Metadata::from_text(text))
}

#[derive(serde::Serialize, serde::Deserialize)]
struct PartitionRecord {
    uuid: uuid::Uuid,
    address: String,
    provider_id: u16,
}

impl From<&PartitionInfo> for PartitionRecord {
    fn from(info: &PartitionInfo) -> Self {
        Self {
            uuid: info.uuid,
            address: info.address.clone(),
            provider_id: info.provider_id,
        }
    }
}

impl From<PartitionRecord> for PartitionInfo {
    fn from(record: PartitionRecord) -> Self {
        PartitionInfo::new(record.uuid, record.address, record.provider_id)
    }
}

/// The directory service: a thin layer of topic create/open semantics
/// over a [`KeyValueStore`] and a set of capability [`Registries`].
pub struct Directory<S: KeyValueStore> {
    store: Arc<S>,
    registries: Registries,
}

impl<S: KeyValueStore> Directory<S> {
    pub fn new(store: Arc<S>, registries: Registries) -> Self {
        Self { store, registries }
    }

    /// Creates a new topic with the given capabilities. Fails with
    /// [`Error::TopicExists`] if any of its three keys already exist.
    pub async fn create_topic(
        &self,
        name: &str,
        validator: &dyn Validator,
        selector: &dyn PartitionSelector,
        serializer: &dyn Serializer,
    ) -> Result<()> {
        if name.len() > MAX_TOPIC_NAME_LEN {
            return Err(Error::invalid_config(format!(
                "topic name '{name}' exceeds {MAX_TOPIC_NAME_LEN} bytes"
            )));
        }

        let entries = vec![
            (validator_key(name), metadata_to_bytes(&validator.metadata())?),
            (selector_key(name), metadata_to_bytes(&selector.metadata())?),
            (serializer_key(name), metadata_to_bytes(&serializer.metadata())?),
        ];

        self.store
            .put_new_batch(entries)
            .await
            .map_err(|_| Error::topic_exists(name))?;

        // The partitions collection is created lazily on first append;
        // nothing further to do for a topic with zero initial partitions.
        Ok(())
    }

    /// Reconstitutes a topic's capabilities and partition list.
    pub async fn open_topic(&self, name: &str) -> Result<Topic> {
        for key in [validator_key(name), selector_key(name), serializer_key(name)] {
            if self.store.length(&key).await?.is_none() {
                return Err(Error::topic_not_found(name));
            }
        }

        let validator_bytes = self
            .store
            .get(&validator_key(name))
            .await?
            .ok_or_else(|| Error::topic_not_found(name))?;
        let selector_bytes = self
            .store
            .get(&selector_key(name))
            .await?
            .ok_or_else(|| Error::topic_not_found(name))?;
        let serializer_bytes = self
            .store
            .get(&serializer_key(name))
            .await?
            .ok_or_else(|| Error::topic_not_found(name))?;

        let validator = self.registries.validators.create(&bytes_to_metadata(&validator_bytes)?)?;
        let mut selector = self.registries.selectors.create(&bytes_to_metadata(&selector_bytes)?)?;
        let serializer = self.registries.serializers.create(&bytes_to_metadata(&serializer_bytes)?)?;

        let records = self.store.list_collection(&partitions_key(name)).await?;
        let mut partitions = Vec::with_capacity(records.len());
        for record in records {
            let record: PartitionRecord = serde_json::from_slice(&record)?;
            partitions.push(PartitionInfo::from(record));
        }

        selector.set_partitions(partitions.clone());

        Ok(Topic {
            name: name.to_string(),
            validator,
            selector,
            serializer,
            partitions,
        })
    }

    /// Appends a partition record to the topic's partitions collection.
    /// Spinning up the provider itself is the caller's responsibility
    /// (it requires the external RPC collaborator); this only records it.
    pub async fn add_custom_partition(&self, topic: &str, partition: &PartitionInfo) -> Result<()> {
        let record = PartitionRecord::from(partition);
        let bytes = serde_json::to_vec(&record)?;
        self.store.append_to_collection(&partitions_key(topic), bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryStore;
    use mofka_core::capability::{DefaultSerializer, DefaultValidator, RoundRobinSelector};
    use uuid::Uuid;

    fn directory() -> Directory<InMemoryStore> {
        Directory::new(Arc::new(InMemoryStore::new()), Registries::with_defaults())
    }

    #[tokio::test]
    async fn create_then_open_round_trips_capabilities_and_partitions() {
        let dir = directory();
        dir.create_topic(
            "events",
            &DefaultValidator,
            &RoundRobinSelector::default(),
            &DefaultSerializer,
        )
        .await
        .unwrap();

        let info = PartitionInfo::new(Uuid::new_v4(), "na+sm://partition0", 0);
        dir.add_custom_partition("events", &info).await.unwrap();

        let topic = dir.open_topic("events").await.unwrap();
        assert_eq!(topic.name, "events");
        assert_eq!(topic.partitions, vec![info]);
    }

    #[tokio::test]
    async fn create_topic_twice_fails_with_topic_exists() {
        let dir = directory();
        dir.create_topic("events", &DefaultValidator, &RoundRobinSelector::default(), &DefaultSerializer)
            .await
            .unwrap();
        let err = dir
            .create_topic("events", &DefaultValidator, &RoundRobinSelector::default(), &DefaultSerializer)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TopicExists(_)));
    }

    #[tokio::test]
    async fn open_unknown_topic_fails_with_topic_not_found() {
        let dir = directory();
        let err = dir.open_topic("ghost").await.unwrap_err();
        assert!(matches!(err, Error::TopicNotFound(_)));
    }

    #[tokio::test]
    async fn create_topic_rejects_overlong_name() {
        let dir = directory();
        let name = "x".repeat(MAX_TOPIC_NAME_LEN + 1);
        let err = dir
            .create_topic(&name, &DefaultValidator, &RoundRobinSelector::default(), &DefaultSerializer)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
