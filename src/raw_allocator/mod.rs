//! This module provides the raw allocator and its support types.
//!
//! A "raw allocator" is one, that simply gets request for a specific memory
//! size but does not need to worry about alignment.
mod buffer;
mod entry;
mod stats;

pub use buffer::HeapMemory;
pub use entry::{State, HEADER_SIZE};
pub use stats::Stats;

use buffer::{Buffer, ValidatedOffset};
use entry::Entry;

use thiserror::Error;

/// Forward to [`log::debug!`], unless the pool is quiet.
macro_rules! debug {
    ($pool:expr, $($arg:tt)+) => {
        if !$pool.quiet {
            log::debug!($($arg)+)
        }
    };
}

/// Forward to [`log::trace!`], unless the pool is quiet.
macro_rules! trace {
    ($pool:expr, $($arg:tt)+) => {
        if !$pool.quiet {
            log::trace!($($arg)+)
        }
    };
}

/// An error occurred when initializing a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InitError {
    /// The storage cannot hold a single header plus at least one byte of
    /// payload.
    #[error("pool of {size} bytes is too small to hold a block")]
    TooSmall {
        /// The size of the rejected storage.
        size: usize,
    },
}

/// An error occurred when calling `alloc()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// A request for zero bytes.
    #[error("allocation size has to be larger than zero")]
    InvalidSize,
    /// The request plus its header exceeds the total size of the pool, so it
    /// can never succeed.
    #[error("request of {requested} bytes exceeds the pool capacity of {capacity} bytes")]
    RequestTooLarge { requested: usize, capacity: usize },
    /// The pool was not initialized yet.
    #[error("pool is not initialized")]
    NotInitialized,
    /// There is no free block large enough. This might be due to
    /// fragmentation, even if the total free memory would be sufficient.
    #[error("no free block can hold {requested} bytes")]
    OutOfMemory { requested: usize },
}

/// An error occurred when calling `free()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FreeError {
    /// An invalid pointer was freed up (either a null pointer, a pointer
    /// outside of the pool memory or a pointer, that was never returned by
    /// `alloc()`).
    #[error("pointer does not belong to an allocation")]
    InvalidPointer,
    /// There is a double-free detected. An already freed-up-block is freed up
    /// again.
    #[error("block is already free")]
    DoubleFreeDetected,
    /// The pool was not initialized yet.
    #[error("pool is not initialized")]
    NotInitialized,
}

/// A handle to an allocation.
///
/// This is the byte offset of the payload relative to the start of the pool.
/// It is only meaningful for the pool, that returned it, and only until it is
/// freed or the pool is re-initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Payload(usize);
impl Payload {
    /// The byte offset of the payload from the start of the pool.
    pub const fn offset(self) -> usize {
        self.0
    }
}

/// A read-only view of a single block of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// The byte offset of the header from the start of the pool.
    pub offset: usize,
    pub state: State,
    /// The payload size, not including the header.
    pub size: usize,
}

/// A raw memory allocator for contiguous slices of bytes without any alignment.
///
/// This allocator is an intermediate one, which does not need to handle the
/// alignment of a [`Layout`](core::alloc::Layout). It manages a single pool of
/// memory given as the storage `S`, e.g. a `&mut [u8]`, a `Vec<u8>` or a
/// [`HeapMemory`]. All bookkeeping is stored inside the pool itself: every
/// block starts with a header of [`HEADER_SIZE`] bytes, and the headers form
/// an address-ordered doubly linked list covering the whole pool.
///
/// The allocator is not synchronized. Wrap it in a lock to share it (see
/// [`Allocator`](crate::Allocator)).
pub struct RawAllocator<S> {
    buffer: Buffer<S>,
    initialized: bool,
    quiet: bool,
}
impl<S> RawAllocator<S> {
    /// Create a [`RawAllocator`] over the storage without initializing it.
    ///
    /// The storage contents are left untouched. Every operation reports the
    /// pool as not initialized until [`reset()`](Self::reset) or
    /// [`init()`](Self::init) is called.
    pub const fn uninit(storage: S) -> Self {
        Self {
            buffer: Buffer::new(storage),
            initialized: false,
            quiet: false,
        }
    }

    /// Turn the log output of this pool on or off.
    ///
    /// A pool backing the global allocator has to be quiet: a logger, that
    /// allocates, would re-enter the allocator while the pool is locked.
    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    /// Whether the pool has been initialized.
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Give back the storage. All outstanding allocations become invalid.
    pub fn into_inner(self) -> S {
        self.buffer.into_inner()
    }
}
impl<S: AsRef<[u8]> + AsMut<[u8]>> RawAllocator<S> {
    /// Create a new [`RawAllocator`] with the given storage as the pool.
    ///
    /// The pool starts with a single free block spanning the whole storage
    /// minus one header.
    pub fn new(storage: S) -> Result<Self, InitError> {
        let mut allocator = Self::uninit(storage);
        allocator.reset()?;
        Ok(allocator)
    }

    /// Install a new storage as the pool.
    ///
    /// The previous storage is returned, all its allocations become invalid.
    /// If the new storage is too small, it is rejected and the current pool
    /// stays as it is.
    pub fn init(&mut self, storage: S) -> Result<S, InitError> {
        check_size(storage.as_ref().len())?;

        let previous = core::mem::replace(&mut self.buffer, Buffer::new(storage));
        self.buffer.initialize();
        self.initialized = true;
        trace!(self, "installed pool of {} bytes", self.capacity());
        Ok(previous.into_inner())
    }

    /// Re-initialize the pool over its current storage.
    ///
    /// This discards all blocks: afterwards there is a single free block and
    /// all outstanding allocations are invalid.
    pub fn reset(&mut self) -> Result<(), InitError> {
        check_size(self.capacity())?;

        self.buffer.initialize();
        self.initialized = true;
        trace!(self, "reset pool of {} bytes", self.capacity());
        Ok(())
    }

    /// The total size of the pool in bytes, including all headers.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Allocate a new memory block of size `n`.
    ///
    /// This method is used for general allocation of multiple contiguous bytes.
    /// It searches for the smallest free entry, that can hold `n` bytes plus a
    /// new header, and splits it: the new used block is carved from the tail of
    /// the free block, which keeps its position but shrinks. As usual with
    /// [`RawAllocator`], this does not take alignment in account.
    ///
    /// # Errors
    /// The checks are done in this order:
    /// 1. [`AllocError::InvalidSize`] if `n` is zero,
    /// 2. [`AllocError::RequestTooLarge`] if `n` plus a header exceeds the
    ///    total size of the pool,
    /// 3. [`AllocError::NotInitialized`] if there is no pool yet,
    /// 4. [`AllocError::OutOfMemory`] if no free block is large enough.
    ///
    /// The pool is not modified on failure.
    pub fn alloc(&mut self, n: usize) -> Result<Payload, AllocError> {
        if n == 0 {
            debug!(self, "rejected allocation of zero bytes");
            return Err(AllocError::InvalidSize);
        }
        let capacity = self.capacity();
        let needed = match n.checked_add(HEADER_SIZE) {
            Some(needed) if needed <= capacity => needed,
            _ => {
                debug!(self, "rejected allocation of {n} bytes from pool of {capacity} bytes");
                return Err(AllocError::RequestTooLarge {
                    requested: n,
                    capacity,
                });
            }
        };
        if !self.initialized {
            return Err(AllocError::NotInitialized);
        }

        let Some(chosen) = self.best_fit(needed) else {
            debug!(self, "no free block for {n} bytes");
            return Err(AllocError::OutOfMemory { requested: n });
        };

        let mut free = self.buffer.get(chosen);
        let remaining = free.size() - needed;
        let former_next = free.next();

        let new = self.buffer.insert(
            chosen.payload() + remaining,
            Entry::used(n).linked(Some(chosen.get()), former_next),
        );
        if let Some(next) = self.buffer.follow(former_next) {
            let mut next_entry = self.buffer.get(next);
            next_entry.set_prev(Some(new.get()));
            self.buffer.set(next, next_entry);
        }
        free.set_size(remaining);
        free.set_next(Some(new.get()));
        self.buffer.set(chosen, free);

        trace!(
            self,
            "allocated {n} bytes at {} (split from block at {}, {remaining} bytes left)",
            new.payload(),
            chosen.get()
        );
        Ok(Payload(new.payload()))
    }

    /// Find the smallest free block with a payload of at least `needed` bytes.
    ///
    /// Ties are resolved by taking the first such block in address order.
    fn best_fit(&self, needed: usize) -> Option<ValidatedOffset> {
        let mut best: Option<(ValidatedOffset, usize)> = None;
        for offset in self.buffer.entries() {
            let entry = self.buffer.get(offset);
            if !entry.is_free() || entry.size() < needed {
                continue;
            }
            match best {
                Some((_, size)) if size <= entry.size() => {}
                _ => best = Some((offset, entry.size())),
            }
        }
        best.map(|(offset, _)| offset)
    }

    /// Free an allocation.
    ///
    /// This method is used to release a memory block allocated with this raw
    /// allocator. The header of the block is located directly in front of the
    /// payload. If that header is not part of the block list, then an error is
    /// reported (as allocators are not allowed to unwind).
    ///
    /// # Algorithm
    /// The header offset is validated by scanning the list linearly. If no
    /// such entry is found, then the user tried to free an allocation, that
    /// was not allocated with this allocator (or the allocator messed up
    /// internally). [`FreeError::InvalidPointer`] is reported.
    ///
    /// The selected block is tested for its state. If it is marked as "used",
    /// then everything is fine. If it is already marked as "free", then
    /// [`FreeError::DoubleFreeDetected`] is returned.
    ///
    /// The block is then marked as free and merged with its neighbors: first
    /// the following block is absorbed if it is free, then the (possibly
    /// enlarged) block is absorbed into the preceding one if that is free.
    /// Doing it in this order results in a single block even if both neighbors
    /// are free.
    pub fn free(&mut self, payload: Payload) -> Result<(), FreeError> {
        if !self.initialized {
            return Err(FreeError::NotInitialized);
        }
        let target = payload
            .0
            .checked_sub(HEADER_SIZE)
            .and_then(|offset| self.buffer.validate(offset))
            .ok_or_else(|| {
                debug!(self, "free of unknown payload offset {}", payload.0);
                FreeError::InvalidPointer
            })?;

        let mut entry = self.buffer.get(target);
        if entry.is_free() {
            debug!(self, "double free of block at {}", target.get());
            return Err(FreeError::DoubleFreeDetected);
        }
        entry.set_state(State::Free);
        trace!(self, "freed {} bytes at {}", entry.size(), payload.0);

        if let Some(next) = self.buffer.follow(entry.next()) {
            let next_entry = self.buffer.get(next);
            if next_entry.is_free() {
                entry.set_size(entry.size() + HEADER_SIZE + next_entry.size());
                entry.set_next(next_entry.next());
                self.relink_prev(entry.next(), target);
                trace!(self, "merged following block at {}", next.get());
            }
        }
        self.buffer.set(target, entry);

        if let Some(prev) = self.buffer.follow(entry.prev()) {
            let mut prev_entry = self.buffer.get(prev);
            if prev_entry.is_free() {
                prev_entry.set_size(prev_entry.size() + HEADER_SIZE + entry.size());
                prev_entry.set_next(entry.next());
                self.buffer.set(prev, prev_entry);
                self.relink_prev(entry.next(), prev);
                trace!(self, "merged into preceding block at {}", prev.get());
            }
        }
        Ok(())
    }

    /// Point the `prev`-link of the block at `link` (if any) to `to`.
    fn relink_prev(&mut self, link: Option<usize>, to: ValidatedOffset) {
        if let Some(offset) = self.buffer.follow(link) {
            let mut entry = self.buffer.get(offset);
            entry.set_prev(Some(to.get()));
            self.buffer.set(offset, entry);
        }
    }

    /// Gather statistics about the blocks in a single pass over the list.
    ///
    /// Returns `None` if the pool is not initialized.
    pub fn stats(&self) -> Option<Stats> {
        self.initialized.then(|| {
            Stats::collect(self.buffer.entries().map(|offset| self.buffer.get(offset)))
        })
    }

    /// Iterate over all blocks in address order.
    ///
    /// The iterator is empty if the pool is not initialized.
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.initialized
            .then(|| self.buffer.entries())
            .into_iter()
            .flatten()
            .map(|offset| {
                let entry = self.buffer.get(offset);
                Block {
                    offset: offset.get(),
                    state: entry.state(),
                    size: entry.size(),
                }
            })
    }

    /// The payload memory of an allocation.
    ///
    /// The slice is exactly as long as requested in `alloc()`.
    ///
    /// # Panics
    /// This function panics if the handle does not refer to a block of this
    /// pool.
    pub fn memory(&self, payload: &Payload) -> &[u8] {
        let offset = self.validated(payload);
        self.buffer.memory_of(offset)
    }

    /// The mutable payload memory of an allocation.
    ///
    /// # Panics
    /// This function panics if the handle does not refer to a block of this
    /// pool.
    pub fn memory_mut(&mut self, payload: &Payload) -> &mut [u8] {
        let offset = self.validated(payload);
        self.buffer.memory_of_mut(offset)
    }

    fn validated(&self, payload: &Payload) -> ValidatedOffset {
        let offset = payload
            .0
            .checked_sub(HEADER_SIZE)
            .filter(|_| self.initialized)
            .and_then(|offset| self.buffer.validate(offset))
            .filter(|offset| !self.buffer.get(*offset).is_free());
        match offset {
            Some(offset) => offset,
            None => panic!("payload offset {} is not part of the pool", payload.0),
        }
    }

    /// The address of an allocation.
    ///
    /// The pointer stays valid as long as the storage is neither moved nor
    /// dropped and the allocation is not freed.
    ///
    /// # Panics
    /// This function panics if the handle does not refer to a used block of
    /// this pool.
    pub fn payload_ptr(&mut self, payload: Payload) -> *mut u8 {
        let offset = self.validated(&payload);
        self.buffer.bytes_mut()[offset.payload()..].as_mut_ptr()
    }

    /// Map an address returned by [`payload_ptr()`](Self::payload_ptr) back to
    /// its allocation.
    ///
    /// # Errors
    /// A null pointer or a pointer outside of the pool memory is reported as
    /// [`FreeError::InvalidPointer`]. The pointer is not checked to be the
    /// start of an allocation here, this is done when freeing it.
    pub fn payload_from_ptr(&self, ptr: *const u8) -> Result<Payload, FreeError> {
        self.offset_of(ptr).map(Payload)
    }

    /// Find the used allocation, whose payload contains `ptr`.
    ///
    /// Unlike [`payload_from_ptr()`](Self::payload_from_ptr) the pointer may
    /// point anywhere inside the payload, e.g. to an address aligned within a
    /// larger allocation. This scans the list linearly.
    ///
    /// # Errors
    /// [`FreeError::NotInitialized`] if there is no pool yet and
    /// [`FreeError::InvalidPointer`] if no used block contains the address.
    pub fn payload_containing_ptr(&self, ptr: *const u8) -> Result<Payload, FreeError> {
        if !self.initialized {
            return Err(FreeError::NotInitialized);
        }
        let offset = self.offset_of(ptr)?;
        self.buffer
            .entries()
            .take_while(|block| block.payload() <= offset)
            .find(|block| {
                let entry = self.buffer.get(*block);
                !entry.is_free() && offset < block.payload() + entry.size()
            })
            .map(|block| Payload(block.payload()))
            .ok_or_else(|| {
                debug!(self, "no allocation contains pointer {ptr:p}");
                FreeError::InvalidPointer
            })
    }

    /// The offset of an address inside the pool, excluding the first header.
    fn offset_of(&self, ptr: *const u8) -> Result<usize, FreeError> {
        if ptr.is_null() {
            debug!(self, "free of null pointer");
            return Err(FreeError::InvalidPointer);
        }
        let start = self.buffer.bytes().as_ptr() as usize;
        let offset = (ptr as usize).wrapping_sub(start);
        if offset < HEADER_SIZE || offset >= self.capacity() {
            debug!(self, "free of pointer {ptr:p} outside of pool at {start:#x}");
            return Err(FreeError::InvalidPointer);
        }
        Ok(offset)
    }

    /// Free an allocation given by its address.
    ///
    /// This is the same as [`free()`](Self::free), but takes the address
    /// returned by [`payload_ptr()`](Self::payload_ptr).
    pub fn free_ptr(&mut self, ptr: *const u8) -> Result<(), FreeError> {
        if !self.initialized {
            return Err(FreeError::NotInitialized);
        }
        let payload = self.payload_from_ptr(ptr)?;
        self.free(payload)
    }
}

const fn check_size(size: usize) -> Result<(), InitError> {
    if size > HEADER_SIZE {
        Ok(())
    } else {
        Err(InitError::TooSmall { size })
    }
}
