//! A lazy, composable view over a byte region stored elsewhere (§4.1).
//!
//! A [`DataDescriptor`] never touches the underlying bytes; it carries an
//! opaque `location` blob (meaningful only to the data store that produced
//! it) plus a stack of view transforms. [`DataDescriptor::flatten`] resolves
//! that stack down to a canonical, non-overlapping list of `(offset, size)`
//! segments over the base region.

use crate::archive::{ArchiveReader, ArchiveWriter};
use crate::error::{Error, Result};

/// A contiguous `(offset, size)` segment over the base region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Strided {
    offset: u64,
    nblocks: u64,
    blocksize: u64,
    gapsize: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Unstructured {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum View {
    Sub(Segment),
    Strided(Strided),
    Unstructured(Unstructured),
}

const TAG_SUB: u8 = 0;
const TAG_STRIDED: u8 = 1;
const TAG_UNSTRUCTURED: u8 = 2;

/// An immutable-by-copy handle describing how to locate bytes in a data
/// store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDescriptor {
    location: Vec<u8>,
    size: u64,
    base_size: u64,
    views: Vec<View>,
}

impl DataDescriptor {
    /// A descriptor of size 0.
    pub fn null() -> Self {
        Self {
            location: Vec::new(),
            size: 0,
            base_size: 0,
            views: Vec::new(),
        }
    }

    /// A primitive descriptor over `size` bytes at an implementation-defined
    /// `location`.
    pub fn from(location: impl Into<Vec<u8>>, size: u64) -> Self {
        Self {
            location: location.into(),
            size,
            base_size: size,
            views: Vec::new(),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn location(&self) -> &[u8] {
        &self.location
    }

    pub fn is_null(&self) -> bool {
        self.size == 0
    }

    /// Selects a contiguous `size`-byte window starting at `offset`,
    /// clamped to the remaining size. Returns [`DataDescriptor::null`] if
    /// `offset` is past the end.
    pub fn make_sub_view(&self, offset: u64, size: u64) -> Self {
        if offset > self.size || size == 0 || self.size == 0 {
            return Self::null();
        }
        let clamped = size.min(self.size - offset);
        let mut next = self.clone();
        next.views.push(View::Sub(Segment {
            offset,
            size: clamped,
        }));
        next.size = clamped;
        next
    }

    /// Selects `nblocks` blocks of `blocksize` bytes separated by `gapsize`
    /// bytes, starting at `offset`. Fails if the stride would run past the
    /// current size; nulls out on a zero-sized request.
    pub fn make_strided_view(
        &self,
        offset: u64,
        nblocks: u64,
        blocksize: u64,
        gapsize: u64,
    ) -> Result<Self> {
        if offset > self.size || nblocks == 0 || blocksize == 0 {
            return Ok(Self::null());
        }
        let span = nblocks
            .checked_mul(blocksize + gapsize)
            .ok_or_else(|| Error::store("strided view overflow"))?;
        if offset + span > self.size {
            return Err(Error::store("invalid strided view: would go out of bounds"));
        }
        let mut next = self.clone();
        next.views.push(View::Strided(Strided {
            offset,
            nblocks,
            blocksize,
            gapsize,
        }));
        next.size = nblocks * blocksize;
        Ok(next)
    }

    /// Selects a union of `(offset, size)` segments, which must be sorted
    /// by ascending offset and non-overlapping. Adjacent segments are
    /// coalesced; a single resulting segment collapses to a sub view.
    pub fn make_unstructured_view(&self, segments: &[(u64, u64)]) -> Result<Self> {
        if segments.is_empty() {
            return Ok(Self::null());
        }
        if segments[0].0 > self.size {
            return Ok(Self::null());
        }

        let mut coalesced: Vec<Segment> = Vec::new();
        let mut view_size = 0u64;
        let mut cursor = 0u64;

        for &(offset, size) in segments {
            if offset < cursor {
                return Err(Error::store(
                    "invalid unstructured view: segments overlapping or out of order",
                ));
            }
            if offset + size > self.size {
                return Err(Error::store(
                    "invalid unstructured view: would go out of bounds",
                ));
            }
            if let Some(last) = coalesced.last_mut() {
                if last.offset + last.size == offset {
                    last.size += size;
                    view_size += size;
                    cursor = offset + size;
                    continue;
                }
            }
            coalesced.push(Segment { offset, size });
            view_size += size;
            cursor = offset + size;
        }

        if coalesced.is_empty() {
            return Ok(Self::null());
        }
        if coalesced.len() == 1 {
            return Ok(self.make_sub_view(coalesced[0].offset, coalesced[0].size));
        }

        let mut next = self.clone();
        next.size = view_size;
        next.views.push(View::Unstructured(Unstructured {
            segments: coalesced,
        }));
        Ok(next)
    }

    /// Resolves the view stack down to a canonical list of non-overlapping
    /// `(offset, size)` segments over the base region.
    pub fn flatten(&self) -> Result<Vec<Segment>> {
        let mut flat = vec![Segment {
            offset: 0,
            size: self.base_size,
        }];

        for view in &self.views {
            flat = match view {
                View::Sub(sub) => flatten_sub(&flat, sub),
                View::Strided(strided) => {
                    let unstructured = strided_to_unstructured(strided);
                    flatten_unstructured(&flat, &unstructured)?
                }
                View::Unstructured(u) => flatten_unstructured(&flat, u)?,
            };
        }

        Ok(flat)
    }

    pub fn save<W: ArchiveWriter>(&self, ar: &mut W) {
        ar.write_u64(self.base_size);
        ar.write_u64(self.size);
        ar.write_u64(self.location.len() as u64);
        ar.write(&self.location);
        ar.write_u64(self.views.len() as u64);
        for view in &self.views {
            match view {
                View::Sub(s) => {
                    ar.write(&[TAG_SUB]);
                    ar.write_u64(s.offset);
                    ar.write_u64(s.size);
                }
                View::Strided(s) => {
                    ar.write(&[TAG_STRIDED]);
                    ar.write_u64(s.offset);
                    ar.write_u64(s.nblocks);
                    ar.write_u64(s.blocksize);
                    ar.write_u64(s.gapsize);
                }
                View::Unstructured(u) => {
                    ar.write(&[TAG_UNSTRUCTURED]);
                    ar.write_u64(u.segments.len() as u64);
                    for seg in &u.segments {
                        ar.write_u64(seg.offset);
                        ar.write_u64(seg.size);
                    }
                }
            }
        }
    }

    pub fn load<R: ArchiveReader>(ar: &mut R) -> Result<Self> {
        let base_size = ar.read_u64()?;
        let size = ar.read_u64()?;
        let loc_size = ar.read_u64()? as usize;
        let location = ar.read(loc_size)?.to_vec();
        let n_views = ar.read_u64()?;

        let mut views = Vec::with_capacity(n_views as usize);
        for _ in 0..n_views {
            let tag = ar.read(1)?[0];
            let view = match tag {
                TAG_SUB => View::Sub(Segment {
                    offset: ar.read_u64()?,
                    size: ar.read_u64()?,
                }),
                TAG_STRIDED => View::Strided(Strided {
                    offset: ar.read_u64()?,
                    nblocks: ar.read_u64()?,
                    blocksize: ar.read_u64()?,
                    gapsize: ar.read_u64()?,
                }),
                TAG_UNSTRUCTURED => {
                    let n = ar.read_u64()?;
                    let mut segments = Vec::with_capacity(n as usize);
                    for _ in 0..n {
                        segments.push(Segment {
                            offset: ar.read_u64()?,
                            size: ar.read_u64()?,
                        });
                    }
                    View::Unstructured(Unstructured { segments })
                }
                other => return Err(Error::store(format!("unknown view tag {other}"))),
            };
            views.push(view);
        }

        Ok(Self {
            location,
            size,
            base_size,
            views,
        })
    }
}

fn strided_to_unstructured(strided: &Strided) -> Unstructured {
    let mut segments = Vec::with_capacity(strided.nblocks as usize);
    let mut offset = strided.offset;
    for _ in 0..strided.nblocks {
        segments.push(Segment {
            offset,
            size: strided.blocksize,
        });
        offset += strided.blocksize + strided.gapsize;
    }
    Unstructured { segments }
}

/// Applies a `Sub{offset,size}` selection on top of the current flattened
/// segment list, splitting/trimming segments as needed.
fn flatten_sub(flat: &[Segment], sub: &Segment) -> Vec<Segment> {
    let mut result = Vec::new();
    let mut cursor = 0u64;
    let mut remaining = sub.size;

    for segment in flat {
        if cursor + segment.size < sub.offset {
            cursor += segment.size;
            continue;
        }
        if cursor >= sub.offset + sub.size {
            break;
        }
        let offset = if cursor < sub.offset {
            segment.offset + (sub.offset - cursor)
        } else {
            segment.offset
        };
        let mut size = segment.size - (offset - segment.offset);
        if size > remaining {
            size = remaining;
        }
        result.push(Segment { offset, size });
        remaining -= size;
        cursor += segment.size;
    }

    result
}

/// Applies an `Unstructured` selection. Stacking a second non-contiguous
/// layer on top of an already-fragmented descriptor is an error (flatten
/// only supports one non-contiguous layer).
fn flatten_unstructured(flat: &[Segment], u: &Unstructured) -> Result<Vec<Segment>> {
    if flat.len() != 1 {
        return Err(Error::store(
            "stacked unstructured or strided descriptors are not supported",
        ));
    }
    let base = flat[0];
    Ok(u.segments
        .iter()
        .map(|seg| Segment {
            offset: base.offset + seg.offset,
            size: seg.size,
        })
        .collect())
}
