//! Best-fit memory pool allocator
//!
//! This crate manages a single contiguous buffer of bytes: it hands out and
//! reclaims variably-sized regions of that buffer, much like a general-purpose
//! heap, but over memory supplied by the caller instead of the operating
//! system. There are two ways to use it:
//!
//! - [`RawAllocator`] is the pool engine. It takes any storage, that can be
//!   viewed as a byte slice (a `&mut [u8]`, a `Vec<u8>`, a [`HeapMemory`], ...)
//!   and provides `alloc()`, `free()` and `stats()`. Allocations are identified
//!   by a [`Payload`] handle, i.e. the offset into the pool.
//! - [`Allocator`] wraps a statically sized pool in a spin lock and implements
//!   the [`core::alloc::GlobalAlloc`]-trait, so that it can be used with the
//!   [`alloc`-crate][alloc] on `#![no_std]`-targets.
//!
//! # Usage
//! Using the engine directly with a buffer of your own:
//! ```
//! let mut memory = [0u8; 1024];
//! let mut pool = bestfit::RawAllocator::new(&mut memory[..]).unwrap();
//!
//! let payload = pool.alloc(50).unwrap();
//! pool.memory_mut(&payload).fill(42);
//! assert_eq!(pool.stats().unwrap().used_blocks, 1);
//!
//! pool.free(payload).unwrap();
//! assert_eq!(pool.stats().unwrap().free_blocks, 1);
//! ```
//! Using it as the global allocator (here with a 4K heap):
//! ```no_run
//! #[global_allocator]
//! static ALLOCATOR: bestfit::Allocator<4096> = bestfit::Allocator::new();
//!
//! extern crate alloc;
//! ```
//!
//! # Implementation
//! Every block of the pool starts with a header of [`HEADER_SIZE`] bytes (four
//! machine words: state, payload size and the offsets of the previous and the
//! next header). The headers form a doubly linked list in address order, which
//! covers the whole pool without gaps. There is no separate free list: free
//! and used blocks are part of the same list. The example below assumes a
//! 64-bit target, i.e. a header of 32 bytes, and a pool of 160 bytes.
//! 1.  We start with an empty pool.
//!     ```text
//!     hhhh 0000 0000 0000 0000
//!     ^--- ^------------------
//!     FREE size = 128
//!     ```
//!     There is a single entry, which spans all the remaining bytes (after the
//!     header itself).
//! 2.  A block of 32 is allocated.
//!     ```text
//!     hhhh 0000 0000 hhhh 0000
//!     ^--- ^-------- ^--- ^---
//!     FREE size = 64 USED size = 32
//!     ```
//!     The smallest free block, that can hold the request _and a new header_,
//!     is split. The new used block is placed at the tail of the free block,
//!     so the free block keeps its position and only shrinks by `32 + 32`.
//! 3.  A block of 16 is allocated.
//!     ```text
//!     hhhh 00 hhhh 00 hhhh 0000
//!     ^--- ^- ^--- ^- ^--- ^---
//!     FREE 16 USED 16 USED size = 32
//!     ```
//!     The same thing as in step 2 happens.
//! 4.  A request for a block of 16 comes in. There are 16 free bytes, but no
//!     room for another header. Therefore the allocation fails with
//!     [`AllocError::OutOfMemory`]. A request for more than `160 - 32` bytes
//!     would have been rejected with [`AllocError::RequestTooLarge`] right
//!     away, without looking at the blocks at all.
//! 5.  The first allocation (block size 32) is freed.
//!     ```text
//!     hhhh 00 hhhh 00 hhhh 0000
//!     ^--- ^- ^--- ^- ^--- ^---
//!     FREE 16 USED 16 FREE size = 32
//!     ```
//!     Its header is found directly in front of the payload. Its neighbor is
//!     in use, so nothing is merged.
//! 6.  The second allocation (block size 16) is freed.
//!     ```text
//!     hhhh 0000 0000 0000 0000
//!     ^--- ^------------------
//!     FREE size = 128
//!     ```
//!     Both neighbors are free now. First the following block is absorbed
//!     (`16 + 32 + 32 = 80`), then the enlarged block is absorbed into the
//!     preceding one (`16 + 32 + 80 = 128`). The picture of step 1 is
//!     restored: there are never two free blocks next to each other.
//!
//! [alloc]: https://doc.rust-lang.org/alloc/index.html
#![no_std]

#[cfg(test)]
extern crate std;

mod raw_allocator;

pub use raw_allocator::{
    AllocError, Block, FreeError, HeapMemory, InitError, Payload, RawAllocator, State, Stats,
    HEADER_SIZE,
};

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

/// The alignment of every block handed out by [`Allocator`].
pub const ALIGN: usize = 16;

/// The memory allocator for embedded systems.
///
/// This is an allocator with a predefined heap size. Therefore the heap memory
/// usage is statically limited to an upper value, which also helps to prevent
/// issues with heap/stack-smashes, as the heap is counted to the static memory
/// (e.g. `.data`/`.bss`-sections).
///
/// Its usage is simple: just copy and paste the following in the binary crate
/// you're developing. The memory size of the heap is `4096` or 4K in this
/// example. Adjust that value to your needs.
/// ```no_run
/// #[global_allocator]
/// static ALLOCATOR: bestfit::Allocator<4096> = bestfit::Allocator::new();
/// ```
/// All requests are rounded up to a multiple of [`ALIGN`]. Layouts requiring a
/// larger alignment get a block with `align - ALIGN` spare bytes, so that an
/// aligned address can be handed out from inside of it. The pool is
/// initialized lazily on its first use and protected by a spin lock.
///
/// The pool is [quiet](RawAllocator::set_quiet) and the allocator does not log
/// anything itself: a logger is free to allocate.
pub struct Allocator<const N: usize> {
    pool: spin::Mutex<RawAllocator<HeapMemory<N>>>,
}
impl<const N: usize> Allocator<N> {
    /// Create a new [`Allocator`].
    ///
    /// This function is a `const fn`, therefore you can call it directly when
    /// creating the allocator.
    ///
    /// # Panics
    /// This function will panic, if the supplied buffer size, i.e. `N` is less
    /// than two headers or not divisible by 16.
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn new() -> Self {
        assert!(N >= 2 * HEADER_SIZE, "too small heap memory: minimum size is two headers");
        assert!(N % ALIGN == 0, "memory size has to be divisible by 16");
        Self {
            pool: spin::Mutex::new(RawAllocator::uninit(HeapMemory::new())),
        }
    }

    /// Gather statistics about the blocks of the heap.
    pub fn stats(&self) -> Stats {
        self.lock().stats().unwrap_or_default()
    }

    /// Lock the pool and initialize it, if this is the first use.
    fn lock(&self) -> spin::MutexGuard<'_, RawAllocator<HeapMemory<N>>> {
        let mut pool = self.pool.lock();
        if !pool.is_initialized() {
            pool.set_quiet(true);
            let initialized = pool.reset();
            debug_assert!(initialized.is_ok(), "heap size is checked in `new()`");
        }
        pool
    }
}
impl<const N: usize> Default for Allocator<N> {
    fn default() -> Self {
        Self::new()
    }
}
unsafe impl<const N: usize> GlobalAlloc for Allocator<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // zero-sized requests still get a distinct block
        let Some(size) = layout.size().max(1).checked_next_multiple_of(ALIGN) else {
            return ptr::null_mut();
        };
        // every block is aligned to `ALIGN`, so at most `align - ALIGN` bytes
        // have to be skipped to reach the requested alignment
        let padding = layout.align().saturating_sub(ALIGN);
        let Some(size) = size.checked_add(padding) else {
            return ptr::null_mut();
        };

        let mut pool = self.lock();
        let Ok(payload) = pool.alloc(size) else {
            return ptr::null_mut();
        };
        let block = pool.payload_ptr(payload);
        let skip = (block as usize).next_multiple_of(layout.align()) - block as usize;
        // `skip <= padding`, so the result stays inside the payload
        block.add(skip)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let mut pool = self.lock();
        let payload = if layout.align() > ALIGN {
            pool.payload_containing_ptr(ptr)
        } else {
            pool.payload_from_ptr(ptr)
        };
        // a failed free cannot be reported from here, it leaves the pool as is
        let _ = payload.and_then(|payload| pool.free(payload));
    }
}
