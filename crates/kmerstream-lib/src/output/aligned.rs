//! Block-aligned staging buffers for direct I/O

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::constants::round_up;
use crate::error::{IngestError, Result};

/// Zero-initialized heap buffer whose start is aligned to `align`
///
/// The allocation is rounded up to a whole number of `align` blocks, so the
/// bytes past `len` up to the next block boundary exist and are zero.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// SAFETY: the buffer owns its allocation exclusively
unsafe impl Send for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate `len` zero bytes aligned to `align` (a power of two)
    pub fn zeroed(len: usize, align: usize) -> Result<Self> {
        let alloc_err = || IngestError::Alloc { size: len, align };
        if align == 0 || !align.is_power_of_two() {
            return Err(alloc_err());
        }
        let capacity = round_up(len.max(1), align);
        let layout = Layout::from_size_align(capacity, align).map_err(|_| alloc_err())?;
        // SAFETY: layout has a non-zero size
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(alloc_err)?;
        Ok(Self { ptr, len, layout })
    }

    /// Allocate an aligned copy of `data`
    pub fn from_slice(data: &[u8], align: usize) -> Result<Self> {
        let mut buf = Self::zeroed(data.len(), align)?;
        buf.as_mut_slice().copy_from_slice(data);
        Ok(buf)
    }

    /// Logical length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the logical length is zero
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Alignment of the start of the buffer
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// The first `len` bytes
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() >= len initialized bytes
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The first `len` bytes, mutably
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusive access
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with this exact layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}
