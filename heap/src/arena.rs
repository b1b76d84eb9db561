//! The arena allocator behind every heap handle.
//!
//! Allocations are served from 16 MiB blocks by moving an allocation
//! pointer downward, rounding down for alignment. Each payload is preceded
//! by an [`AllocationHeader`] holding the use count, a destructor and the
//! recycling state. Freed allocations go into a free list per power-of-two
//! size bin and are handed out again with a fresh identity nonce.

use core::ptr;
use core::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

use bitflags::bitflags;
use spin::Mutex;
use thiserror::Error;

/// Every allocation starts on a cache line to prevent false sharing
/// between tile workers.
pub const HEAP_ALIGNMENT: usize = 64;

/// New backing blocks are at least this large.
const BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// Bin `i` recycles allocations of `HEAP_ALIGNMENT << i` bytes. The last
/// bin is the largest power of two that still fits in a pointer.
const BIN_COUNT: usize = (usize::BITS - HEAP_ALIGNMENT.trailing_zeros()) as usize;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// No power-of-two bin can hold the requested size.
    #[error("requested allocation size exceeds the addressable bins")]
    OutOfAddressSpace,
    /// The operating system refused to map another backing block.
    #[error("failed to allocate a backing memory block")]
    AllocationFailed,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u16 {
        const RECYCLED = 1 << 0;
    }
}

/// Lives immediately before every payload, padded to [`HEAP_ALIGNMENT`].
///
/// `identity` is a process-wide nonce stamped at allocation time and
/// zeroed on free, so a stale [`crate::SafePointer`] fails its match.
/// `thread_hash` is zero for shared memory; a non-zero hash restricts
/// checked access to the owning thread.
#[repr(C)]
pub struct AllocationHeader {
    total_size: usize,
    used_size: usize,
    next_recycled: *mut AllocationHeader,
    destructor: Option<unsafe fn(*mut u8)>,
    use_count: AtomicUsize,
    identity: AtomicU64,
    thread_hash: AtomicU64,
    flags: HeaderFlags,
    bin_index: u16,
}

impl AllocationHeader {
    #[inline]
    pub fn identity(&self) -> u64 {
        self.identity.load(Ordering::Acquire)
    }

    #[inline]
    pub fn thread_hash(&self) -> u64 {
        self.thread_hash.load(Ordering::Acquire)
    }

    #[inline]
    pub fn use_count(&self) -> usize {
        self.use_count.load(Ordering::Acquire)
    }

    /// Bytes the caller asked for, as opposed to the padded bin size.
    #[inline]
    pub fn used_size(&self) -> usize {
        if self.flags.contains(HeaderFlags::RECYCLED) {
            0
        } else {
            self.used_size
        }
    }

    /// Available bytes in the allocation, the bin size.
    #[inline]
    pub fn allocation_size(&self) -> usize {
        HEAP_ALIGNMENT << self.bin_index as usize
    }

    /// Bytes between this header and the end of the reserved region,
    /// including the header itself and any alignment padding.
    #[inline]
    pub fn total_size(&self) -> usize {
        self.total_size
    }
}

/// Header size rounded up to whole alignment blocks; the payload starts
/// this many bytes after the header.
pub const fn header_padded_size() -> usize {
    (core::mem::size_of::<AllocationHeader>() + HEAP_ALIGNMENT - 1) & !(HEAP_ALIGNMENT - 1)
}

/// A payload plus its header, before any use count has been taken.
#[derive(Clone, Copy, Debug)]
pub struct RawAllocation {
    pub data: *mut u8,
    pub header: *mut AllocationHeader,
}

/// One backing block. The allocation pointer starts at the high end and
/// moves toward `base` as headers are carved off.
struct Block {
    base: *mut u8,
    size: usize,
    cursor: *mut u8,
}

// Safety: blocks are only reached under the arena's locks; the payload
// bytes they serve are handed out with their own ownership discipline.
unsafe impl Send for Block {}

struct BinList(*mut AllocationHeader);

// Safety: free-list heads are only dereferenced while the bin lock is held.
unsafe impl Send for BinList {}

struct Arena {
    blocks: Mutex<Vec<Block>>,
    bins: [Mutex<BinList>; BIN_COUNT],
}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_BIN: Mutex<BinList> = Mutex::new(BinList(ptr::null_mut()));

static ARENA: Arena = Arena {
    blocks: Mutex::new(Vec::new()),
    bins: [EMPTY_BIN; BIN_COUNT],
};

/// Identities start at one so that zero always means freed.
static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

/// Live allocations, for leak diagnostics in tests.
static ALLOCATION_COUNT: AtomicI64 = AtomicI64::new(0);

static MESSAGE_HANDLER: Mutex<Option<fn(&str)>> = Mutex::new(None);

/// Install a handler that receives every formatted memory error message
/// before the failing call panics (or exits with the `hard-exit` feature).
pub fn set_message_handler(handler: Option<fn(&str)>) {
    *MESSAGE_HANDLER.lock() = handler;
}

/// Report an unrecoverable memory error.
pub(crate) fn report_error(message: &str) -> ! {
    if let Some(handler) = *MESSAGE_HANDLER.lock() {
        handler(message);
    }
    if cfg!(feature = "hard-exit") {
        log::error!("{message}");
        std::process::exit(1);
    }
    panic!("{message}");
}

fn bin_index(minimum_size: usize) -> Option<u16> {
    let mut index = 0usize;
    while index < BIN_COUNT {
        if (HEAP_ALIGNMENT << index) >= minimum_size {
            return Some(index as u16);
        }
        index += 1;
    }
    None
}

fn bump_allocate(blocks: &mut Vec<Block>, padded_size: usize) -> Result<RawAllocation, HeapError> {
    if let Some(block) = blocks.last_mut() {
        if let Some(result) = try_bump(block, padded_size) {
            return Ok(result);
        }
    }
    // The newest block is full, map another one.
    let block_size = BLOCK_SIZE.max(
        padded_size
            .checked_add(header_padded_size() * 2)
            .ok_or(HeapError::OutOfAddressSpace)?,
    );
    let layout = core::alloc::Layout::from_size_align(block_size, HEAP_ALIGNMENT)
        .map_err(|_| HeapError::AllocationFailed)?;
    // Safety: the layout has non-zero size and valid alignment.
    let base = unsafe { std::alloc::alloc(layout) };
    if base.is_null() {
        return Err(HeapError::AllocationFailed);
    }
    blocks.push(Block {
        base,
        size: block_size,
        cursor: unsafe { base.add(block_size) },
    });
    try_bump(blocks.last_mut().unwrap(), padded_size).ok_or(HeapError::AllocationFailed)
}

fn try_bump(block: &mut Block, padded_size: usize) -> Option<RawAllocation> {
    let cursor = block.cursor as usize;
    let data = cursor.checked_sub(padded_size)? & !(HEAP_ALIGNMENT - 1);
    let header = data.checked_sub(header_padded_size())?;
    if header < block.base as usize {
        return None;
    }
    let header_ptr = header as *mut AllocationHeader;
    // Safety: the header region is inside the block and exclusively ours
    // while the block lock is held.
    unsafe {
        header_ptr.write(AllocationHeader {
            total_size: cursor - header,
            used_size: 0,
            next_recycled: ptr::null_mut(),
            destructor: None,
            use_count: AtomicUsize::new(0),
            identity: AtomicU64::new(0),
            thread_hash: AtomicU64::new(0),
            flags: HeaderFlags::empty(),
            bin_index: 0,
        });
    }
    block.cursor = header as *mut u8;
    debug_assert!(cursor <= block.base as usize + block.size);
    Some(RawAllocation {
        data: data as *mut u8,
        header: header_ptr,
    })
}

/// Allocate at least `minimum_size` bytes. Zero is legal, so that empty
/// buffers can exist. The result has use count zero; owners take counts
/// through [`increase_use_count`].
pub fn allocate(minimum_size: usize, zeroed: bool) -> Result<RawAllocation, HeapError> {
    let bin = bin_index(minimum_size).ok_or(HeapError::OutOfAddressSpace)?;
    let padded_size = HEAP_ALIGNMENT << bin as usize;

    let recycled = {
        let mut head = ARENA.bins[bin as usize].lock();
        let header = head.0;
        if header.is_null() {
            None
        } else {
            // Safety: recycled headers are owned by the bin while linked.
            unsafe {
                head.0 = (*header).next_recycled;
                (*header).next_recycled = ptr::null_mut();
                (*header).flags.remove(HeaderFlags::RECYCLED);
            }
            Some(RawAllocation {
                data: unsafe { (header as *mut u8).add(header_padded_size()) },
                header,
            })
        }
    };

    let allocation = match recycled {
        Some(allocation) => allocation,
        None => bump_allocate(&mut ARENA.blocks.lock(), padded_size)?,
    };

    // Safety: the allocation is not reachable by anyone else yet.
    unsafe {
        let header = allocation.header;
        (*header).bin_index = bin;
        (*header).used_size = minimum_size;
        (*header).destructor = None;
        (*header).use_count.store(0, Ordering::Relaxed);
        (*header).thread_hash.store(0, Ordering::Relaxed);
        (*header)
            .identity
            .store(NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed), Ordering::Release);
        if zeroed {
            ptr::write_bytes(allocation.data, 0, padded_size);
        }
    }
    ALLOCATION_COUNT.fetch_add(1, Ordering::Relaxed);
    Ok(allocation)
}

/// Register a destructor to run right before the payload is recycled.
///
/// # Safety
/// `header` must come from [`allocate`] and still be live.
pub unsafe fn set_destructor(header: *mut AllocationHeader, destructor: unsafe fn(*mut u8)) {
    (*header).destructor = Some(destructor);
}

/// Restrict checked access to the calling thread. Heap memory is shared
/// by default; this exists for memory that must stay thread private.
///
/// # Safety
/// `header` must come from [`allocate`] and still be live.
pub unsafe fn make_thread_local(header: *mut AllocationHeader) {
    (*header)
        .thread_hash
        .store(current_thread_hash(), Ordering::Release);
}

/// # Safety
/// `header` must come from [`allocate`] and still be live.
pub unsafe fn increase_use_count(header: *mut AllocationHeader) {
    (*header).use_count.fetch_add(1, Ordering::Relaxed);
}

/// Decrease the use count and recycle the allocation when it reaches
/// zero: the registered destructor runs first (it may allocate and free
/// on its own, no locks are held), then the identity is zeroed and the
/// memory is pushed onto its size bin.
///
/// # Safety
/// `header` must come from [`allocate`], be live, and the caller must own
/// one use count.
pub unsafe fn decrease_use_count(header: *mut AllocationHeader) {
    if (*header).use_count.fetch_sub(1, Ordering::AcqRel) == 1 {
        free(header);
    }
}

unsafe fn free(header: *mut AllocationHeader) {
    if (*header).flags.contains(HeaderFlags::RECYCLED) {
        report_error("Heap error: an allocation was freed twice");
    }
    if let Some(destructor) = (*header).destructor.take() {
        let payload = (header as *mut u8).add(header_padded_size());
        destructor(payload);
    }
    (*header).identity.store(0, Ordering::Release);
    (*header).thread_hash.store(0, Ordering::Relaxed);
    (*header).flags.insert(HeaderFlags::RECYCLED);
    let bin = (*header).bin_index as usize;
    let mut head = ARENA.bins[bin].lock();
    (*header).next_recycled = head.0;
    head.0 = header;
    ALLOCATION_COUNT.fetch_sub(1, Ordering::Relaxed);
}

/// Number of live allocations in the arena. Used to find leaks in
/// single-threaded tests.
pub fn allocation_count() -> i64 {
    ALLOCATION_COUNT.load(Ordering::Relaxed)
}

/// Hash of the current thread's identity, for ownership checks.
pub fn current_thread_hash() -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    // Reserve zero for shared memory.
    hasher.finish() | 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bin_sizes_round_up_to_powers_of_two() {
        assert_eq!(bin_index(0), Some(0));
        assert_eq!(bin_index(1), Some(0));
        assert_eq!(bin_index(HEAP_ALIGNMENT), Some(0));
        assert_eq!(bin_index(HEAP_ALIGNMENT + 1), Some(1));
        assert_eq!(bin_index(usize::MAX), None);
    }

    #[test]
    fn allocate_zero_bytes_is_legal() {
        let allocation = allocate(0, true).unwrap();
        unsafe {
            increase_use_count(allocation.header);
            assert_eq!((*allocation.header).used_size(), 0);
            assert!((*allocation.header).total_size() >= header_padded_size());
            decrease_use_count(allocation.header);
        }
    }

    #[test]
    fn oversized_requests_fail_instead_of_wrapping() {
        assert_eq!(allocate(usize::MAX, false).unwrap_err(), HeapError::OutOfAddressSpace);
    }

    #[test]
    fn recycling_reuses_memory_with_a_fresh_identity() {
        let first = allocate(100, false).unwrap();
        let first_data = first.data;
        let first_identity = unsafe { (*first.header).identity() };
        unsafe {
            increase_use_count(first.header);
            decrease_use_count(first.header);
        }
        let second = allocate(100, false).unwrap();
        assert_eq!(second.data, first_data);
        let second_identity = unsafe { (*second.header).identity() };
        assert_ne!(second_identity, first_identity);
        assert_ne!(second_identity, 0);
        unsafe {
            increase_use_count(second.header);
            decrease_use_count(second.header);
        }
    }

    #[test]
    fn destructor_runs_once_on_last_release() {
        use core::sync::atomic::AtomicUsize;
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        unsafe fn count_drop(_payload: *mut u8) {
            DROPS.fetch_add(1, Ordering::Relaxed);
        }
        let allocation = allocate(32, true).unwrap();
        unsafe {
            set_destructor(allocation.header, count_drop);
            increase_use_count(allocation.header);
            increase_use_count(allocation.header);
            decrease_use_count(allocation.header);
            assert_eq!(DROPS.load(Ordering::Relaxed), 0);
            decrease_use_count(allocation.header);
            assert_eq!(DROPS.load(Ordering::Relaxed), 1);
        }
    }
}
