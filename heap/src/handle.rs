//! Owning views over arena memory.
//!
//! [`Allocation`] owns untyped bytes and backs buffers and images;
//! [`Handle`] owns a single typed value whose destructor is registered in
//! the allocation header, so the value is dropped wherever the last owner
//! happens to be released.

use core::marker::PhantomData;
use core::ops::Deref;
use core::ptr::NonNull;

use crate::arena::{self, AllocationHeader, HeapError, RawAllocation};
use crate::safe_ptr::SafePointer;

/// Reference counted owner of raw arena bytes.
///
/// Clones share the same memory; the allocation is recycled when the last
/// owner is dropped. The permitted region handed out through
/// [`Allocation::safe_pointer`] spans the whole padded bin size, so SIMD
/// style code may overshoot a row into the allocation's own padding.
pub struct Allocation {
    data: *mut u8,
    header: *mut AllocationHeader,
    identity: u64,
}

// Safety: the payload is plain shared memory. Writers are coordinated by
// the owners (disjoint render tiles, or exclusive access), the use count
// itself is atomic.
unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}

impl Allocation {
    pub fn new(size: usize, zeroed: bool) -> Result<Self, HeapError> {
        let RawAllocation { data, header } = arena::allocate(size, zeroed)?;
        // Safety: freshly allocated, we take the first use count.
        let identity = unsafe {
            arena::increase_use_count(header);
            (*header).identity()
        };
        Ok(Self {
            data,
            header,
            identity,
        })
    }

    /// Bytes the allocation was created with.
    #[inline]
    pub fn size(&self) -> usize {
        // Safety: we hold a use count, the header is live.
        unsafe { (*self.header).used_size() }
    }

    /// Bytes that may be touched, including the power-of-two padding.
    #[inline]
    pub fn padded_size(&self) -> usize {
        // Safety: we hold a use count, the header is live.
        unsafe { (*self.header).allocation_size() }
    }

    #[inline]
    pub fn use_count(&self) -> usize {
        // Safety: we hold a use count, the header is live.
        unsafe { (*self.header).use_count() }
    }

    /// True when both owners share the same allocation.
    #[inline]
    pub fn shares_memory_with(&self, other: &Allocation) -> bool {
        self.data == other.data
    }

    /// Checked pointer over the whole padded region, as elements of `T`.
    #[inline]
    pub fn safe_pointer<T>(&self, name: &'static str) -> SafePointer<T> {
        // Safety: the region is owned by this allocation and stays mapped.
        unsafe {
            SafePointer::from_allocation(
                name,
                self.header,
                self.identity,
                self.data as *mut T,
                self.padded_size(),
            )
        }
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.data
    }

    /// Restrict checked access to the calling thread. Shared by default.
    pub fn make_thread_local(&self) {
        // Safety: we hold a use count, the header is live.
        unsafe { arena::make_thread_local(self.header) };
    }
}

impl Clone for Allocation {
    fn clone(&self) -> Self {
        // Safety: we already hold a use count, so the header is live.
        unsafe { arena::increase_use_count(self.header) };
        Self {
            data: self.data,
            header: self.header,
            identity: self.identity,
        }
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        // Safety: we own one use count.
        unsafe { arena::decrease_use_count(self.header) };
    }
}

unsafe fn drop_in_place_shim<T>(payload: *mut u8) {
    core::ptr::drop_in_place(payload as *mut T);
}

/// Reference counted owner of one `T` stored on the arena.
///
/// Clones share the value. Shared handles are read-only; exclusive
/// mutation goes through [`Handle::get_mut`], which refuses to hand out a
/// mutable borrow while other owners exist.
pub struct Handle<T> {
    data: NonNull<T>,
    header: *mut AllocationHeader,
    _marker: PhantomData<T>,
}

// Safety: the handle behaves like an Arc around T.
unsafe impl<T: Send + Sync> Send for Handle<T> {}
unsafe impl<T: Send + Sync> Sync for Handle<T> {}

impl<T> Handle<T> {
    pub fn new(value: T) -> Result<Self, HeapError> {
        assert!(core::mem::align_of::<T>() <= arena::HEAP_ALIGNMENT);
        let RawAllocation { data, header } = arena::allocate(core::mem::size_of::<T>(), false)?;
        // Safety: freshly allocated memory large and aligned enough for T.
        unsafe {
            (data as *mut T).write(value);
            arena::set_destructor(header, drop_in_place_shim::<T>);
            arena::increase_use_count(header);
        }
        Ok(Self {
            data: NonNull::new(data as *mut T).expect("arena payloads are never null"),
            header,
            _marker: PhantomData,
        })
    }

    #[inline]
    pub fn use_count(&self) -> usize {
        // Safety: we hold a use count, the header is live.
        unsafe { (*self.header).use_count() }
    }

    /// Exclusive access to the value. Reports an error when the handle is
    /// shared, because mutating behind other owners' backs is exactly the
    /// aliasing bug the heap checks exist to catch.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        if self.use_count() != 1 {
            arena::report_error(
                "Null or shared handle mutation: get_mut needs the only owner of the handle",
            );
        }
        // Safety: single owner, so no aliasing borrow can exist.
        unsafe { self.data.as_mut() }
    }
}

impl<T> Deref for Handle<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: the value is alive while any owner exists.
        unsafe { self.data.as_ref() }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        // Safety: we already hold a use count.
        unsafe { arena::increase_use_count(self.header) };
        Self {
            data: self.data,
            header: self.header,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Handle<T> {
    fn drop(&mut self) {
        // Safety: we own one use count; the registered destructor drops T.
        unsafe { arena::decrease_use_count(self.header) };
    }
}
