//! Bound and identity checked pointers.
//!
//! In release builds a [`SafePointer`] is a single raw pointer with zero
//! overhead. Debug builds carry the permitted region, the allocation
//! header and the identity nonce from allocation time, and every access
//! asserts that the range is inside the region, that the allocation still
//! has the expected identity, and that the memory is either shared or
//! owned by the calling thread.

use core::marker::PhantomData;

use crate::arena::AllocationHeader;
#[cfg(debug_assertions)]
use crate::arena::{current_thread_hash, report_error};

pub struct SafePointer<T> {
    data: *mut T,
    #[cfg(debug_assertions)]
    start: *const u8,
    #[cfg(debug_assertions)]
    end: *const u8,
    #[cfg(debug_assertions)]
    header: *const AllocationHeader,
    #[cfg(debug_assertions)]
    identity: u64,
    #[cfg(debug_assertions)]
    name: &'static str,
    _marker: PhantomData<*mut T>,
}

impl<T> Clone for SafePointer<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for SafePointer<T> {}

// Safety: a safe pointer is only a view; the memory it points into is
// shared arena memory whose writers are coordinated externally (disjoint
// image tiles, or exclusive owners).
unsafe impl<T: Send> Send for SafePointer<T> {}
unsafe impl<T: Sync> Sync for SafePointer<T> {}

impl<T> SafePointer<T> {
    pub fn null(name: &'static str) -> Self {
        #[cfg(not(debug_assertions))]
        let _ = name;
        Self {
            data: core::ptr::null_mut(),
            #[cfg(debug_assertions)]
            start: core::ptr::null(),
            #[cfg(debug_assertions)]
            end: core::ptr::null(),
            #[cfg(debug_assertions)]
            header: core::ptr::null(),
            #[cfg(debug_assertions)]
            identity: 0,
            #[cfg(debug_assertions)]
            name,
            _marker: PhantomData,
        }
    }

    /// View over plain memory without an allocation header, for stack or
    /// foreign buffers. Only the region bound is checked.
    ///
    /// # Safety
    /// `start` must point to at least `byte_size` valid bytes that outlive
    /// every use of the returned pointer.
    pub unsafe fn from_raw(name: &'static str, start: *mut T, byte_size: usize) -> Self {
        #[cfg(not(debug_assertions))]
        let _ = (name, byte_size);
        Self {
            data: start,
            #[cfg(debug_assertions)]
            start: start as *const u8,
            #[cfg(debug_assertions)]
            end: (start as *const u8).add(byte_size),
            #[cfg(debug_assertions)]
            header: core::ptr::null(),
            #[cfg(debug_assertions)]
            identity: 0,
            #[cfg(debug_assertions)]
            name,
            _marker: PhantomData,
        }
    }

    /// View over arena memory, carrying the header and the identity the
    /// allocation had when the owner acquired it.
    ///
    /// # Safety
    /// `start .. start + byte_size` must lie inside the allocation that
    /// `header` describes.
    pub unsafe fn from_allocation(
        name: &'static str,
        header: *const AllocationHeader,
        identity: u64,
        start: *mut T,
        byte_size: usize,
    ) -> Self {
        #[cfg(not(debug_assertions))]
        let _ = (name, header, identity, byte_size);
        Self {
            data: start,
            #[cfg(debug_assertions)]
            start: start as *const u8,
            #[cfg(debug_assertions)]
            end: (start as *const u8).add(byte_size),
            #[cfg(debug_assertions)]
            header,
            #[cfg(debug_assertions)]
            identity,
            #[cfg(debug_assertions)]
            name,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.data.is_null()
    }

    #[cfg(debug_assertions)]
    fn assert_inside(&self, method: &str, claimed: *const u8, byte_size: usize) {
        if !self.header.is_null() {
            // Safety: headers are never unmapped while the process runs.
            let header = unsafe { &*self.header };
            let current = header.identity();
            if current != self.identity {
                report_error(&format!(
                    "Stale identity in {} for pointer \"{}\": the allocation now has identity {} but {} was expected. \
                     The memory was freed or recycled while this pointer was kept.",
                    method, self.name, current, self.identity
                ));
            }
            let thread_hash = header.thread_hash();
            if thread_hash != 0 && thread_hash != current_thread_hash() {
                report_error(&format!(
                    "Wrong thread in {} for pointer \"{}\": the allocation is private to another thread.",
                    method, self.name
                ));
            }
        }
        let claimed_end = claimed as usize + byte_size;
        if claimed < self.start || claimed_end > self.end as usize {
            report_error(&format!(
                "Out of bounds in {} for pointer \"{}\": accessed {:?}..{:#x} outside the permitted region {:?}..{:?}.",
                method, self.name, claimed, claimed_end, self.start, self.end
            ));
        }
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    fn assert_inside(&self, _method: &str, _claimed: *const u8, _byte_size: usize) {}

    /// Read the element at `index` elements after the pointer.
    #[inline]
    pub fn read(&self, index: usize) -> T
    where
        T: Copy,
    {
        // Safety: checked in debug builds, caller discipline in release.
        unsafe {
            let address = self.data.add(index);
            self.assert_inside("read", address as *const u8, core::mem::size_of::<T>());
            address.read()
        }
    }

    /// Write the element at `index` elements after the pointer.
    #[inline]
    pub fn write(&self, index: usize, value: T) {
        // Safety: checked in debug builds, caller discipline in release.
        unsafe {
            let address = self.data.add(index);
            self.assert_inside("write", address as *const u8, core::mem::size_of::<T>());
            address.write(value);
        }
    }

    /// A checked slice view of `len` elements starting at the pointer.
    #[inline]
    pub fn as_slice(&self, len: usize) -> &[T] {
        self.assert_inside("as_slice", self.data as *const u8, len * core::mem::size_of::<T>());
        // Safety: region checked in debug builds; the arena keeps the
        // memory mapped for the process lifetime.
        unsafe { core::slice::from_raw_parts(self.data, len) }
    }

    /// A checked mutable slice view of `len` elements.
    ///
    /// # Safety
    /// The caller must guarantee that no other writer touches the same
    /// elements at the same time (image tiles are disjoint by design).
    #[inline]
    pub unsafe fn as_mut_slice(&self, len: usize) -> &mut [T] {
        self.assert_inside(
            "as_mut_slice",
            self.data as *const u8,
            len * core::mem::size_of::<T>(),
        );
        core::slice::from_raw_parts_mut(self.data, len)
    }

    /// New pointer moved by a number of elements. Motion is unchecked;
    /// the region follows along and the next access is checked.
    #[inline]
    #[must_use]
    pub fn offset_elements(&self, count: isize) -> Self {
        let mut result = *self;
        result.data = unsafe { result.data.offset(count) };
        result
    }

    /// New pointer moved by a number of bytes, for stride stepping.
    #[inline]
    #[must_use]
    pub fn offset_bytes(&self, count: isize) -> Self {
        let mut result = *self;
        result.data = unsafe { (result.data as *mut u8).offset(count) } as *mut T;
        result
    }

    /// A sub-region starting `byte_offset` into this pointer, restricted
    /// to `byte_size` bytes.
    #[inline]
    #[must_use]
    pub fn slice(&self, name: &'static str, byte_offset: usize, byte_size: usize) -> Self {
        #[cfg(not(debug_assertions))]
        let _ = name;
        let start = unsafe { (self.data as *mut u8).add(byte_offset) } as *mut T;
        self.assert_inside("slice", start as *const u8, byte_size);
        Self {
            data: start,
            #[cfg(debug_assertions)]
            start: start as *const u8,
            #[cfg(debug_assertions)]
            end: unsafe { (start as *const u8).add(byte_size) },
            #[cfg(debug_assertions)]
            header: self.header,
            #[cfg(debug_assertions)]
            identity: self.identity,
            #[cfg(debug_assertions)]
            name,
            _marker: PhantomData,
        }
    }

    /// Escape hatch back to a raw pointer, checked once on the way out.
    #[inline]
    pub fn as_ptr(&self) -> *mut T {
        if !self.data.is_null() {
            self.assert_inside("as_ptr", self.data as *const u8, core::mem::size_of::<T>());
        }
        self.data
    }

    /// Raw pointer without any check, for callers implementing their own.
    #[inline]
    pub fn as_ptr_unchecked(&self) -> *mut T {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_writes_inside_the_region() {
        let mut values = [1i32, 2, 3, 4];
        let pointer =
            unsafe { SafePointer::from_raw("values", values.as_mut_ptr(), core::mem::size_of_val(&values)) };
        assert_eq!(pointer.read(2), 3);
        pointer.write(0, 9);
        assert_eq!(values[0], 9);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn out_of_bounds_access_is_caught() {
        let mut values = [0u8; 8];
        let pointer = unsafe { SafePointer::from_raw("bytes", values.as_mut_ptr(), values.len()) };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| pointer.read(8)));
        assert!(result.is_err());
    }

    #[cfg(debug_assertions)]
    #[test]
    fn slicing_cannot_grow_the_region() {
        let mut values = [0u8; 16];
        let pointer = unsafe { SafePointer::from_raw("bytes", values.as_mut_ptr(), values.len()) };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pointer.slice("past the end", 8, 16)
        }));
        assert!(result.is_err());
    }
}
