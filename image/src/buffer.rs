//! Reference counted byte buffer.

use karst_heap::{Allocation, HeapError, SafePointer};

/// Owns a run of arena bytes. Clones share the memory.
#[derive(Clone)]
pub struct Buffer {
    allocation: Allocation,
    size: usize,
}

impl Buffer {
    /// A zeroed buffer. Zero bytes is legal, so empty files and empty
    /// images can be represented.
    pub fn new(size: usize) -> Result<Self, HeapError> {
        Ok(Self {
            allocation: Allocation::new(size, true)?,
            size,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HeapError> {
        let buffer = Self::new(bytes.len())?;
        // Safety: freshly allocated, nobody else writes yet.
        unsafe {
            buffer
                .bytes("buffer_from_bytes")
                .as_mut_slice(bytes.len())
                .copy_from_slice(bytes);
        }
        Ok(buffer)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    /// Checked pointer over the buffer's bytes (including the bin
    /// padding, so SIMD loops may overshoot safely).
    #[inline]
    pub fn bytes(&self, name: &'static str) -> SafePointer<u8> {
        self.allocation.safe_pointer(name)
    }

    /// Checked pointer over the buffer as elements of `T`.
    #[inline]
    pub fn elements<T: bytemuck::Pod>(&self, name: &'static str) -> SafePointer<T> {
        self.allocation.safe_pointer(name)
    }
}
