//! Variable-length data segments
//!
//! A [`DataSegment`] keeps the logical length separate from the allocated
//! storage so that outbound segments can carry their 4-byte wire padding
//! while length queries still report the unpadded size.

use crate::error::{IscsiError, IscsiResult};
use crate::header::pad4;

/// Owned, growable byte buffer plus its logical length
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSegment {
    /// Allocated storage; zero-filled past `size` when padded
    buf: Vec<u8>,
    /// Logical length
    size: usize,
}

impl DataSegment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logical (unpadded) length
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Size of the allocated storage, including any padding
    pub fn storage_len(&self) -> usize {
        self.buf.len()
    }

    /// Logical bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.size]
    }

    /// Logical bytes followed by any zero padding
    pub fn storage(&self) -> &[u8] {
        &self.buf
    }

    /// Append `bytes`, replacing the storage with a freshly allocated buffer.
    ///
    /// With `align` set the new storage is rounded up to a multiple of 4 and
    /// the tail is zero-filled; the logical length stays unpadded. On error
    /// the segment is left unmodified.
    pub fn append(&mut self, bytes: &[u8], align: bool) -> IscsiResult<()> {
        if bytes.is_empty() {
            return Err(IscsiError::EmptyAppend);
        }

        let len = self.size + bytes.len();
        let aligned = if align { pad4(len) } else { len };

        let mut buf = try_alloc(aligned)?;
        buf.extend_from_slice(self.as_slice());
        buf.extend_from_slice(bytes);
        // zero out any padding at the end
        buf.resize(aligned, 0);

        self.buf = buf;
        self.size = len;
        Ok(())
    }
}

/// Empty buffer with room for `len` bytes, or `AllocationFailure`
fn try_alloc(len: usize) -> IscsiResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| IscsiError::AllocationFailure(len))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    // A real out-of-memory cannot be forced through `append` without
    // exhausting the host, so allocation failure is covered at `try_alloc`.
    // `append` assigns `buf` and `size` only after `try_alloc` succeeds.

    #[test]
    fn test_oversized_allocation_fails() {
        assert!(matches!(
            try_alloc(usize::MAX),
            Err(IscsiError::AllocationFailure(usize::MAX))
        ));
    }

    #[test]
    fn test_allocation_reserves_requested_capacity() {
        let buf = try_alloc(12).unwrap();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 12);
    }

    #[test]
    fn test_empty_append_rejected() {
        let mut seg = DataSegment::new();
        assert!(matches!(seg.append(&[], true), Err(IscsiError::EmptyAppend)));
        assert!(seg.is_empty());
        assert_eq!(seg.storage_len(), 0);
    }

    #[test]
    fn test_aligned_small_appends() {
        for n in 1..=4usize {
            let mut seg = DataSegment::new();
            seg.append(&vec![0xAA; n], true).unwrap();
            assert_eq!(seg.len(), n);
            assert_eq!(seg.storage_len(), 4);
            assert!(seg.storage()[n..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_aligned_appends_accumulate() {
        let mut seg = DataSegment::new();
        let mut expected = Vec::new();
        for (n, padded) in [(1usize, 4usize), (2, 4), (3, 8), (4, 12)] {
            let chunk = vec![n as u8; n];
            seg.append(&chunk, true).unwrap();
            expected.extend_from_slice(&chunk);
            assert_eq!(seg.len(), expected.len());
            assert_eq!(seg.storage_len(), padded);
            assert_eq!(seg.as_slice(), &expected[..]);
        }
    }

    #[test]
    fn test_padding_is_not_carried_into_next_append() {
        let mut seg = DataSegment::new();
        seg.append(&[1, 2, 3], true).unwrap();
        seg.append(&[4], true).unwrap();
        assert_eq!(seg.storage(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_unaligned_append() {
        let mut seg = DataSegment::new();
        seg.append(&[1, 2, 3], false).unwrap();
        seg.append(&[4, 5], false).unwrap();
        assert_eq!(seg.len(), 5);
        assert_eq!(seg.storage_len(), 5);
        assert_eq!(seg.as_slice(), &[1, 2, 3, 4, 5]);
    }
}
