//! Capability pointing to a remote memory region, used for one-sided
//! RDMA-style transfers between producer/consumer and partition.

use serde::{Deserialize, Serialize};

/// `(transport-handle, offset, size, origin-address)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRef {
    /// Opaque transport handle, meaningful only to the RPC/RDMA layer.
    pub handle: String,
    pub offset: u64,
    pub size: u64,
    pub address: String,
}

impl BulkRef {
    pub fn new(handle: impl Into<String>, offset: u64, size: u64, address: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            offset,
            size,
            address: address.into(),
        }
    }
}
