//! Header-only allocator.
//!
//! Free blocks carry no bookkeeping beyond their header word: `malloc`
//! rediscovers them by walking the segment from its base, first-fit. Freed
//! blocks are never merged, so adjacent free blocks accumulate and get
//! re-examined individually on every search.

use core::ptr::{self, NonNull};

use log::{info, trace};

use super::block::{check_tiling, header_of, payload_of, BlockCursor, BlockHeader};
use super::{align_up, HeapStats, ALIGNMENT, HEADER_SIZE, MAX_REQUEST_SIZE};
use crate::err::{CanFail, HeapInitError};

/// Smallest payload a block of this variant may carry.
pub const MIN_PAYLOAD: usize = ALIGNMENT;

/// Heap allocator that finds free blocks by linear traversal.
///
/// The allocator is a plain value owning no memory of its own; all block
/// storage lives in the segment attached by [`init`](Self::init).
pub struct ImplicitHeap {
    base: *mut u8,
    end: *mut u8,
    length: usize,
    used_bytes: usize,
    used_blocks: usize,
    free_blocks: usize,
}

unsafe impl Send for ImplicitHeap {}

impl ImplicitHeap {
    /// Creates an allocator not yet attached to a segment.
    ///
    /// Every request is rejected until [`init`](Self::init) succeeds. The
    /// constructor is `const` so the allocator can live in a `static`.
    pub const fn empty() -> Self {
        Self {
            base: ptr::null_mut(),
            end: ptr::null_mut(),
            length: 0,
            used_bytes: 0,
            used_blocks: 0,
            free_blocks: 0,
        }
    }

    /// Attaches the allocator to the segment `[base, base + length)` and
    /// formats it as a single spanning free block.
    ///
    /// Calling `init` again discards every prior allocation, whether the new
    /// segment is the same or a different one. `base` and `length` must both
    /// be multiples of [`ALIGNMENT`] and the segment must fit one minimal
    /// block.
    ///
    /// # Safety
    ///
    /// The segment must be valid for reads and writes for as long as the
    /// allocator uses it, and must not be accessed through any other path
    /// in the meantime.
    pub unsafe fn init(&mut self, base: NonNull<u8>, length: usize) -> CanFail<HeapInitError> {
        if base.as_ptr() as usize % ALIGNMENT != 0 || length % ALIGNMENT != 0 {
            return Err(HeapInitError::SegmentMisaligned);
        }
        if length < HEADER_SIZE + MIN_PAYLOAD {
            return Err(HeapInitError::SegmentTooSmall);
        }

        let base = base.as_ptr();
        base.cast::<BlockHeader>()
            .write(BlockHeader::encode(length - HEADER_SIZE, false));

        self.base = base;
        self.end = base.add(length);
        self.length = length;
        self.used_bytes = 0;
        self.used_blocks = 0;
        self.free_blocks = 1;

        trace!("implicit heap attached to {:p}, {} bytes", base, length);
        Ok(())
    }

    /// Hands out an [`ALIGNMENT`]-aligned payload of at least `size` bytes.
    ///
    /// Returns `None` when `size` is zero or above [`MAX_REQUEST_SIZE`], and
    /// when no free block can accommodate the rounded request.
    ///
    /// # Safety
    ///
    /// The allocator must be attached to a live segment (see
    /// [`init`](Self::init)).
    pub unsafe fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || size > MAX_REQUEST_SIZE {
            return None;
        }
        let need = align_up(size).max(MIN_PAYLOAD);
        if need + self.used_bytes > self.length {
            return None;
        }

        let header = self.find_first_fit(need)?;
        self.split(header, need);
        (*header).mark_used();
        self.free_blocks -= 1;
        self.used_blocks += 1;
        self.used_bytes += (*header).size() + HEADER_SIZE;

        NonNull::new(payload_of(header))
    }

    /// Returns `ptr`'s block to the free set. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a payload pointer previously returned by this
    /// allocator and not freed since.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let header = header_of(ptr);
        (*header).mark_free();
        self.used_bytes -= (*header).size() + HEADER_SIZE;
        self.used_blocks -= 1;
        self.free_blocks += 1;
    }

    /// Resizes the allocation at `ptr` to `size` bytes.
    ///
    /// This variant always moves: a fresh block is allocated, the payload
    /// copied over and the old block freed. When the new allocation cannot
    /// be satisfied, `None` is returned and the old block is left untouched.
    ///
    /// A null `ptr` behaves as [`malloc`](Self::malloc); a zero `size`
    /// behaves as [`free`](Self::free) and returns `None`.
    ///
    /// # Safety
    ///
    /// Same contract as [`free`](Self::free) for `ptr`.
    pub unsafe fn realloc(&mut self, ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
        if ptr.is_null() {
            return self.malloc(size);
        }
        if size == 0 {
            self.free(ptr);
            return None;
        }

        let old = (*header_of(ptr)).size();
        let new = self.malloc(size)?;
        ptr::copy_nonoverlapping(ptr, new.as_ptr(), old.min(size));
        self.free(ptr);
        Some(new)
    }

    /// Checks every structural invariant of the segment; read-only.
    ///
    /// Failures are reported through `log::error!`. An allocator that was
    /// never attached to a segment is trivially valid.
    pub fn validate(&self) -> bool {
        if self.base.is_null() {
            return true;
        }

        let summary = match unsafe { check_tiling(self.base, self.end, MIN_PAYLOAD) } {
            Some(summary) => summary,
            None => return false,
        };

        if self.used_bytes > self.length {
            log::error!(
                "heap: used byte counter {} exceeds segment length {}",
                self.used_bytes,
                self.length
            );
            return false;
        }
        if summary.used_bytes != self.used_bytes {
            log::error!(
                "heap: used byte counter {} disagrees with walk total {}",
                self.used_bytes,
                summary.used_bytes
            );
            return false;
        }
        if summary.used_blocks != self.used_blocks || summary.free_blocks != self.free_blocks {
            log::error!(
                "heap: block counters ({} used, {} free) disagree with walk ({} used, {} free)",
                self.used_blocks,
                self.free_blocks,
                summary.used_blocks,
                summary.free_blocks
            );
            return false;
        }

        true
    }

    /// Logs the segment layout, one line per block. Never mutates.
    pub fn dump(&self) {
        if self.base.is_null() {
            info!("heap: not attached to a segment");
            return;
        }
        info!(
            "heap segment [{:p}, {:p}), {} of {} bytes in use",
            self.base, self.end, self.used_bytes, self.length
        );
        for header in BlockCursor::new(self.base, self.end) {
            let (size, used) = unsafe { ((*header).size(), (*header).is_used()) };
            info!(
                "  {:p} {:>8} {}",
                header,
                size,
                if used { "used" } else { "free" }
            );
        }
    }

    /// Current usage counters.
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            length: self.length,
            used_bytes: self.used_bytes,
            used_blocks: self.used_blocks,
            free_blocks: self.free_blocks,
        }
    }

    fn find_first_fit(&self, need: usize) -> Option<*mut BlockHeader> {
        BlockCursor::new(self.base, self.end)
            .find(|&header| unsafe { !(*header).is_used() && (*header).size() >= need })
    }

    /// Splits `header` down to `need` payload bytes when the remainder can
    /// form a legal block of its own; otherwise leaves it alone.
    unsafe fn split(&mut self, header: *mut BlockHeader, need: usize) {
        let old = (*header).size();
        if old - need < HEADER_SIZE + MIN_PAYLOAD {
            return;
        }

        let tail = header
            .cast::<u8>()
            .add(HEADER_SIZE + need)
            .cast::<BlockHeader>();
        tail.write(BlockHeader::encode(old - need - HEADER_SIZE, false));
        (*header).set_size(need);
        self.free_blocks += 1;
    }
}
