//! Scoped page-aligned buffers for the engine's input layout.
//!
//! The transform engine wants its per-rank input array page-aligned. The
//! allocation is made on construction and released on drop, on every exit
//! path, so there is no free-pairing to get wrong. Allocation failure is an
//! ordinary [`SpectralError::Memory`] value, never a process abort.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::slice;

use crate::error::{Result, SpectralError};

/// Alignment for engine buffers. One page on every platform we target.
const PAGE_SIZE: usize = 4096;

/// A page-aligned, heap-allocated `f64` array with a fixed length.
pub struct PageAligned {
    ptr: *mut f64,
    len: usize,
    layout: Option<Layout>,
}

// The buffer is exclusively owned; the raw pointer is only an allocation
// detail.
unsafe impl Send for PageAligned {}

impl PageAligned {
    /// Allocate a zeroed buffer of `len` reals.
    ///
    /// A zero-length buffer is legal and performs no allocation. The engine's
    /// partition rule can hand a rank a zero-read region while still
    /// requiring the buffer object to exist.
    pub fn zeroed(len: usize) -> Result<Self> {
        if len == 0 {
            return Ok(Self {
                ptr: std::ptr::null_mut(),
                len: 0,
                layout: None,
            });
        }
        let bytes = len
            .checked_mul(std::mem::size_of::<f64>())
            .ok_or(SpectralError::Memory { len })?;
        let layout = Layout::from_size_align(bytes, PAGE_SIZE)
            .map_err(|_| SpectralError::Memory { len })?;
        let ptr = unsafe { alloc_zeroed(layout) } as *mut f64;
        if ptr.is_null() {
            return Err(SpectralError::Memory { len });
        }
        Ok(Self {
            ptr,
            len,
            layout: Some(layout),
        })
    }

    /// Length in reals.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the buffer holds no reals.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read-only view of the buffer.
    pub fn as_slice(&self) -> &[f64] {
        if self.len == 0 {
            &[]
        } else {
            unsafe { slice::from_raw_parts(self.ptr, self.len) }
        }
    }

    /// Mutable view of the buffer.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        if self.len == 0 {
            &mut []
        } else {
            unsafe { slice::from_raw_parts_mut(self.ptr, self.len) }
        }
    }
}

impl Drop for PageAligned {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            unsafe { dealloc(self.ptr as *mut u8, layout) };
        }
    }
}
