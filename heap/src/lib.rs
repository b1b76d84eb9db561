//! Reference counted arena memory for the rendering framework.
//!
//! Every buffer, image and model lives in one shared arena that recycles
//! freed allocations through power-of-two bins. Each allocation carries a
//! header with an identity nonce, so checked pointers can detect use after
//! free, and an atomic use count driven by the owning handles.

pub mod arena;
pub mod handle;
pub mod safe_ptr;

pub use arena::{
    allocation_count, set_message_handler, AllocationHeader, HeapError, RawAllocation,
    HEAP_ALIGNMENT,
};
pub use handle::{Allocation, Handle};
pub use safe_ptr::SafePointer;
