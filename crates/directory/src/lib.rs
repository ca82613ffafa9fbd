//! The topic directory service: the master key/value store interface
//! and topic create/open/add-partition logic (§4.7).

pub mod directory;
pub mod kv;

pub use directory::{Directory, Registries, Topic};
pub use kv::{InMemoryStore, KeyValueStore};
