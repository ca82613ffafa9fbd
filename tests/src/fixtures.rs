//! Test fixtures: metadata/data builders for the end-to-end scenarios.

use bytes::Bytes;
use mofka_core::data::Data;
use mofka_core::metadata::Metadata;

/// `{"k": 1}` metadata, used by the no-data round-trip scenario.
pub fn k1_metadata() -> Metadata {
    Metadata::from_tree(serde_json::json!({ "k": 1 }))
}

/// `{"event_num": i}` metadata, used by the 100-event stream scenario.
pub fn counter_metadata(i: u64) -> Metadata {
    Metadata::from_tree(serde_json::json!({ "event_num": i }))
}

/// `"This is data for event i"`, one contiguous segment.
pub fn counter_data(i: u64) -> Data {
    Data::from_segments(vec![Bytes::from(format!("This is data for event {i}"))])
}

/// The two 26-byte alphabet segments shared by the selective/strided/
/// unstructured fetch scenarios: lowercase then uppercase.
pub fn alphabet_data() -> Data {
    let lower: Vec<u8> = (b'a'..=b'z').collect();
    let upper: Vec<u8> = (b'A'..=b'Z').collect();
    Data::from_segments(vec![Bytes::from(lower), Bytes::from(upper)])
}
