//! Opaque user data attached to an [`Event`](crate::event::Event).
//!
//! The C++ core pairs a list of `(pointer, size)` segments with a raw
//! `ctx`/free-callback pair that the `Data` holder exclusively owns; per
//! §9's redesign flag this collapses onto ordinary Rust ownership: each
//! segment is a reference-counted [`bytes::Bytes`], and an optional
//! drop guard plays the role of the free callback for buffers that came
//! from outside Rust's allocator (e.g. a pinned RDMA region).

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

struct FreeGuard(Option<Box<dyn FnOnce() + Send + Sync>>);

impl Drop for FreeGuard {
    fn drop(&mut self) {
        if let Some(free) = self.0.take() {
            free();
        }
    }
}

impl fmt::Debug for FreeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeGuard").finish()
    }
}

/// A list of byte segments plus an optional owning context.
#[derive(Debug, Clone, Default)]
pub struct Data {
    segments: Vec<Bytes>,
    guard: Option<Arc<FreeGuard>>,
}

impl Data {
    /// An empty `Data` (zero segments, size 0).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a `Data` from plain owned segments.
    pub fn from_segments(segments: Vec<Bytes>) -> Self {
        Self {
            segments,
            guard: None,
        }
    }

    /// Builds a `Data` whose segments are backed by an external context;
    /// `free` runs exactly once, when the last clone of this `Data` (and
    /// any clone derived from it) is dropped.
    pub fn with_context<F>(segments: Vec<Bytes>, free: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            segments,
            guard: Some(Arc::new(FreeGuard(Some(Box::new(free))))),
        }
    }

    pub fn segments(&self) -> &[Bytes] {
        &self.segments
    }

    /// Total size across all segments.
    pub fn size(&self) -> u64 {
        self.segments.iter().map(|s| s.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() || self.size() == 0
    }

    /// Concatenates all segments into one contiguous buffer.
    pub fn to_contiguous(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size() as usize);
        for seg in &self.segments {
            out.extend_from_slice(seg);
        }
        out
    }
}
