//! Wire encoding for the metadata/data bulk layouts of §6.3: a run of
//! `u64` sizes followed by the concatenated payload bytes. Both the
//! producer batcher and the partition manager's ingest path share this
//! codec so the two sides agree on layout without a shared RPC crate.

use crate::error::{Error, Result};

/// Encodes `[u64 size_0 | ... | bytes_0 | ...]`.
pub fn encode_sized_bulk(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.len() * 8 + parts.iter().map(|p| p.len()).sum::<usize>());
    for part in parts {
        out.extend_from_slice(&(part.len() as u64).to_le_bytes());
    }
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

/// Decodes a buffer produced by [`encode_sized_bulk`] into `count` byte
/// slices plus their sizes.
pub fn decode_sized_bulk(buf: &[u8], count: usize) -> Result<(Vec<u64>, Vec<Vec<u8>>)> {
    let header_len = count * 8;
    if buf.len() < header_len {
        return Err(Error::transport("sized bulk buffer shorter than its header"));
    }
    let mut sizes = Vec::with_capacity(count);
    for i in 0..count {
        let mut b = [0u8; 8];
        b.copy_from_slice(&buf[i * 8..i * 8 + 8]);
        sizes.push(u64::from_le_bytes(b));
    }

    let mut parts = Vec::with_capacity(count);
    let mut cursor = header_len;
    for &size in &sizes {
        let end = cursor + size as usize;
        if end > buf.len() {
            return Err(Error::transport("sized bulk buffer shorter than its payload"));
        }
        parts.push(buf[cursor..end].to_vec());
        cursor = end;
    }
    Ok((sizes, parts))
}

/// Running offsets (prefix sums) for a list of sizes, used to index into
/// the concatenated payload region (`metadata_offsets`/`desc_offsets`).
pub fn running_offsets(sizes: &[u64], start: u64) -> Vec<u64> {
    let mut offsets = Vec::with_capacity(sizes.len());
    let mut acc = start;
    for &s in sizes {
        offsets.push(acc);
        acc += s;
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_sized_bulk() {
        let parts: Vec<&[u8]> = vec![b"abc", b"", b"defgh"];
        let buf = encode_sized_bulk(&parts);
        let (sizes, decoded) = decode_sized_bulk(&buf, parts.len()).unwrap();
        assert_eq!(sizes, vec![3, 0, 5]);
        assert_eq!(decoded, vec![b"abc".to_vec(), Vec::new(), b"defgh".to_vec()]);
    }

    #[test]
    fn running_offsets_are_prefix_sums() {
        let offsets = running_offsets(&[3, 0, 5], 10);
        assert_eq!(offsets, vec![10, 13, 13]);
    }
}
