//! DMA-capable buffer allocation.
//!
//! Controllers transfer data straight to and from request buffers, so every
//! I/O buffer is allocated with an explicit alignment (the namespace sector
//! size for device I/O) and owned by exactly one request at a time.
//!
//! # Example
//!
//! ```
//! use nvme_io_device::DmaBuf;
//!
//! // Allocate a 4KB buffer aligned to 512 bytes (typical sector size)
//! let mut buf = DmaBuf::alloc(4096, 512).expect("allocation failed");
//!
//! buf.as_mut_slice()[..5].copy_from_slice(b"hello");
//! assert_eq!(buf.as_ptr() as usize % 512, 0);
//! ```

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{Error, Result};

/// Minimum alignment handed out, one cache line.
const MIN_ALIGN: usize = 64;

/// An aligned, owned memory buffer for device I/O.
///
/// # Thread Safety
///
/// `DmaBuf` is `Send` but not `Sync`. It can be moved between threads
/// (a request travels from the submitting thread to the poller), but cannot
/// be shared across threads simultaneously.
pub struct DmaBuf {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The underlying memory is just bytes, no thread-local state
unsafe impl Send for DmaBuf {}

impl DmaBuf {
    /// Allocate a zeroed buffer.
    ///
    /// # Arguments
    ///
    /// * `size` - Size in bytes to allocate
    /// * `align` - Alignment requirement (must be power of 2, or 0 for default).
    ///   The buffer will be aligned to at least cache line size (64 bytes).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a zero size or an alignment that
    /// is not a power of two, and [`Error::DmaAlloc`] if the allocator fails.
    pub fn alloc(size: usize, align: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidArgument("size must be > 0".to_string()));
        }
        let layout = Layout::from_size_align(size, align.max(MIN_ALIGN))
            .map_err(|e| Error::InvalidArgument(format!("bad DMA layout: {e}")))?;

        let ptr = unsafe { alloc::alloc_zeroed(layout) };

        NonNull::new(ptr)
            .map(|ptr| Self { ptr, layout })
            .ok_or(Error::DmaAlloc(size))
    }

    /// Get the buffer length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Check if the buffer is empty (zero length).
    ///
    /// Note: Zero-length buffers cannot be created via `alloc()`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Alignment the buffer was allocated with.
    #[inline]
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// Get raw pointer to the buffer.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Get an immutable slice view of the buffer.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    /// Get a mutable slice view of the buffer.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for DmaBuf {
    fn drop(&mut self) {
        unsafe {
            alloc::dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

impl std::fmt::Debug for DmaBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaBuf")
            .field("ptr", &self.ptr)
            .field("len", &self.layout.size())
            .field("align", &self.layout.align())
            .finish()
    }
}

impl AsRef<[u8]> for DmaBuf {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_size_fails() {
        assert!(DmaBuf::alloc(0, 0).is_err());
    }

    #[test]
    fn test_bad_alignment_fails() {
        assert!(matches!(
            DmaBuf::alloc(512, 3000),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_sector_alignment() {
        let buf = DmaBuf::alloc(8192, 4096).unwrap();
        assert_eq!(buf.len(), 8192);
        assert_eq!(buf.align(), 4096);
        assert_eq!(buf.as_ptr() as usize % 4096, 0);

        // Small alignments are rounded up to a cache line
        let buf = DmaBuf::alloc(512, 0).unwrap();
        assert_eq!(buf.align(), 64);
    }

    #[test]
    fn test_zeroed_contents() {
        let mut buf = DmaBuf::alloc(1024, 512).unwrap();
        assert!(buf.as_slice().iter().all(|&b| b == 0));
        buf.as_mut_slice()[..5].copy_from_slice(b"hello");
        assert_eq!(&buf.as_ref()[..5], b"hello");
    }
}
