//! Free-list allocator.
//!
//! Every free block threads a pair of links through its own payload, forming
//! a doubly linked LIFO list anchored at the allocator. Searching touches
//! only free blocks, freeing merges neighbours eagerly, and `realloc` grows
//! in place by absorbing free blocks sitting to the right.

use core::mem::size_of;
use core::ptr::{self, NonNull};

use log::{info, trace};
use static_assertions::const_assert;

use super::block::{check_tiling, header_of, payload_of, BlockCursor, BlockHeader};
use super::{align_up, HeapStats, ALIGNMENT, HEADER_SIZE, MAX_REQUEST_SIZE};
use crate::err::{CanFail, HeapInitError};

/// Smallest payload a block of this variant may carry: a free block must be
/// able to hold its two list links.
pub const MIN_PAYLOAD: usize = 2 * ALIGNMENT;

/// List links overlaid on the payload of every free block.
#[repr(C)]
struct FreeNode {
    prev: *mut FreeNode,
    next: *mut FreeNode,
}

const_assert!(size_of::<FreeNode>() <= MIN_PAYLOAD);

/// Heap allocator backed by an intrusive free list.
pub struct ExplicitHeap {
    base: *mut u8,
    end: *mut u8,
    length: usize,
    used_bytes: usize,
    used_blocks: usize,
    free_blocks: usize,
    first_free: *mut FreeNode,
}

unsafe impl Send for ExplicitHeap {}

impl ExplicitHeap {
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
            first_free: ptr::null_mut(),
        }
    }

    /// Attaches the allocator to the segment `[base, base + length)` and
    /// formats it as a single spanning free block.
    ///
    /// Calling `init` again discards every prior allocation. `base` and
    /// `length` must both be multiples of [`ALIGNMENT`] and the segment must
    /// fit one minimal block (header plus the two list links).
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
        let header = base.cast::<BlockHeader>();
        header.write(BlockHeader::encode(length - HEADER_SIZE, false));

        self.base = base;
        self.end = base.add(length);
        self.length = length;
        self.used_bytes = 0;
        self.used_blocks = 0;
        self.free_blocks = 1;
        self.first_free = ptr::null_mut();
        self.push_front(header);

        trace!("explicit heap attached to {:p}, {} bytes", base, length);
        Ok(())
    }

    /// Hands out an [`ALIGNMENT`]-aligned payload of at least `size` bytes.
    ///
    /// First-fit over the free list, in list order. Returns `None` when
    /// `size` is zero or above [`MAX_REQUEST_SIZE`], and when no free block
    /// can accommodate the rounded request.
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

        let mut node = self.first_free;
        while !node.is_null() {
            let header = header_of(node.cast::<u8>());
            if (*header).size() >= need {
                self.split(header, need);
                self.unlink(node);
                (*header).mark_used();
                self.free_blocks -= 1;
                self.used_blocks += 1;
                self.used_bytes += (*header).size() + HEADER_SIZE;
                return NonNull::new(payload_of(header));
            }
            node = (*node).next;
        }

        None
    }

    /// Returns `ptr`'s block to the free set, merging it with free
    /// neighbours on both sides. Null is a no-op.
    ///
    /// The left neighbour has no back-reference (no boundary tags), so it is
    /// located by scanning the free list for a block ending exactly here.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a payload pointer previously returned by this
    /// allocator and not freed since.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let mut header = header_of(ptr);
        (*header).mark_free();
        self.used_bytes -= (*header).size() + HEADER_SIZE;
        self.used_blocks -= 1;

        match self.left_free_neighbor(header) {
            Some(left) => {
                (*left).set_size((*left).size() + HEADER_SIZE + (*header).size());
                header = left;
            }
            None => {
                self.push_front(header);
                self.free_blocks += 1;
            }
        }
        // Loop, not a single step: a shrinking realloc can leave runs of
        // adjacent free blocks behind, and this is where they collapse.
        while self.coalesce_right(header) {}
    }

    /// Resizes the allocation at `ptr` to `size` bytes, in place whenever
    /// possible.
    ///
    /// Shrinking splits the block and keeps the pointer. Growing measures
    /// the contiguous run of free blocks to the right and absorbs it when
    /// it covers the request; otherwise the payload moves to a fresh
    /// allocation. A failed move returns `None` with the original block,
    /// the free list and the counters untouched.
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
        if size > MAX_REQUEST_SIZE {
            return None;
        }

        let header = header_of(ptr);
        let old = (*header).size();
        let need = align_up(size).max(MIN_PAYLOAD);

        if old >= need {
            // Shrink or exact fit: split in place and keep the pointer. The
            // split tail joins the list unmerged; a later free or in-place
            // grow absorbs it.
            self.split(header, need);
            self.used_bytes -= old - (*header).size();
            return NonNull::new(ptr);
        }

        // Grow in place only when the contiguous run of free blocks to the
        // right covers the request. The run is measured first, read-only:
        // nothing may be absorbed unless the call is going to succeed.
        if self.right_run_size(header) >= need {
            // The block stays marked in use throughout, so it never
            // appears on the free list.
            while self.coalesce_right(header) {}
            let grown = (*header).size();
            self.used_bytes += grown - old;
            self.split(header, need);
            self.used_bytes -= grown - (*header).size();
            return NonNull::new(ptr);
        }

        // The run falls short; move instead. The segment has not been
        // touched yet, so a failed move reports `None` with the original
        // block, the free list and the counters exactly as they were.
        trace!("realloc: moving {:p} ({} -> {} bytes)", ptr, old, size);
        let new = self.malloc(size)?;
        ptr::copy_nonoverlapping(ptr, new.as_ptr(), old);
        self.free(ptr);
        Some(new)
    }

    /// Checks every structural invariant of the segment and the free list;
    /// read-only.
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

        self.validate_free_list(summary.free_blocks)
    }

    fn validate_free_list(&self, walked_free_blocks: usize) -> bool {
        let mut listed = 0_usize;
        let mut prev: *mut FreeNode = ptr::null_mut();
        let mut node = self.first_free;

        while !node.is_null() {
            let header = unsafe { header_of(node.cast::<u8>()) };
            if (header.cast::<u8>() as usize) < self.base as usize
                || (node as usize) >= self.end as usize
            {
                log::error!("heap: free-list node {:p} outside the segment", node);
                return false;
            }
            if unsafe { (*header).is_used() } {
                log::error!("heap: free-list node {:p} marks a block in use", node);
                return false;
            }
            if unsafe { (*node).prev } != prev {
                log::error!("heap: free-list back link broken at {:p}", node);
                return false;
            }

            listed += 1;
            if listed > walked_free_blocks {
                // More nodes than free blocks exist; the list must be cyclic
                // or reach blocks twice.
                log::error!("heap: free list longer than the free block population");
                return false;
            }
            prev = node;
            node = unsafe { (*node).next };
        }

        if listed != self.free_blocks {
            log::error!(
                "heap: free list holds {} nodes, counter says {}",
                listed,
                self.free_blocks
            );
            return false;
        }

        true
    }

    /// Logs the segment layout, one line per block; free blocks show their
    /// list links. Never mutates.
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
            let size = unsafe { (*header).size() };
            if unsafe { (*header).is_used() } {
                info!("  {:p} {:>8} used", header, size);
            } else {
                let node = unsafe { payload_of(header).cast::<FreeNode>() };
                let (prev, next) = unsafe { ((*node).prev, (*node).next) };
                info!("  {:p} {:>8} free prev={:p} next={:p}", header, size, prev, next);
            }
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

    /// Pushes the free block at `header` onto the head of the list.
    unsafe fn push_front(&mut self, header: *mut BlockHeader) {
        let node = payload_of(header).cast::<FreeNode>();
        (*node).prev = ptr::null_mut();
        (*node).next = self.first_free;
        if !self.first_free.is_null() {
            (*self.first_free).prev = node;
        }
        self.first_free = node;
    }

    /// Splices `node` out of the list.
    unsafe fn unlink(&mut self, node: *mut FreeNode) {
        if (*node).prev.is_null() {
            self.first_free = (*node).next;
        } else {
            (*(*node).prev).next = (*node).next;
        }
        if !(*node).next.is_null() {
            (*(*node).next).prev = (*node).prev;
        }
    }

    /// Splits a block down to `need` payload bytes when the tail can form a
    /// legal free block of its own; the tail is pushed onto the list. The
    /// allocation flag of the split block is preserved.
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
        self.push_front(tail);
        self.free_blocks += 1;
    }

    /// Absorbs the block immediately to the right of `header` when that
    /// block is free. Returns whether a merge happened.
    ///
    /// `header` itself may be in use or free; its flag is left untouched.
    unsafe fn coalesce_right(&mut self, header: *mut BlockHeader) -> bool {
        let right = header.cast::<u8>().add(HEADER_SIZE + (*header).size());
        if right >= self.end {
            return false;
        }

        let right = right.cast::<BlockHeader>();
        if (*right).is_used() {
            return false;
        }

        self.unlink(payload_of(right).cast::<FreeNode>());
        (*header).set_size((*header).size() + HEADER_SIZE + (*right).size());
        self.free_blocks -= 1;
        true
    }

    /// Payload size the block at `header` would reach by absorbing the
    /// whole contiguous run of free blocks to its right.
    ///
    /// Read-only: measuring the run must not commit anything, so that a
    /// grow which cannot succeed leaves the segment untouched.
    unsafe fn right_run_size(&self, header: *mut BlockHeader) -> usize {
        let mut size = (*header).size();
        let mut right = header.cast::<u8>().add(HEADER_SIZE + size);
        while right < self.end && !(*right.cast::<BlockHeader>()).is_used() {
            let block = HEADER_SIZE + (*right.cast::<BlockHeader>()).size();
            size += block;
            right = right.add(block);
        }
        size
    }

    /// Finds the free block whose payload ends exactly at `header`, if any,
    /// by scanning the free list.
    unsafe fn left_free_neighbor(&self, header: *mut BlockHeader) -> Option<*mut BlockHeader> {
        let mut node = self.first_free;
        while !node.is_null() {
            let candidate = header_of(node.cast::<u8>());
            if node.cast::<u8>().add((*candidate).size()) == header.cast::<u8>() {
                return Some(candidate);
            }
            node = (*node).next;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 8-byte aligned backing storage for a test segment.
    fn arena(len: usize) -> (NonNull<u8>, Vec<u64>) {
        assert_eq!(len % 8, 0);
        let mut backing = vec![0_u64; len / 8];
        let base = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();
        (base, backing)
    }

    fn heap_over(len: usize) -> (ExplicitHeap, Vec<u64>) {
        let (base, backing) = arena(len);
        let mut heap = ExplicitHeap::empty();
        unsafe { heap.init(base, len).unwrap() };
        (heap, backing)
    }

    #[test]
    fn init_formats_one_spanning_free_block() {
        let (heap, _backing) = heap_over(128);
        assert!(heap.validate());
        assert_eq!(
            heap.stats(),
            HeapStats {
                length: 128,
                used_bytes: 0,
                used_blocks: 0,
                free_blocks: 1,
            }
        );
    }

    #[test]
    fn init_rejects_degenerate_segments() {
        let (base, _backing) = arena(64);
        let mut heap = ExplicitHeap::empty();

        // A free block needs room for both links, so 16 bytes of payload.
        assert_eq!(
            unsafe { heap.init(base, 16) },
            Err(HeapInitError::SegmentTooSmall)
        );
        assert_eq!(
            unsafe { heap.init(base, 44) },
            Err(HeapInitError::SegmentMisaligned)
        );
        assert!(unsafe { heap.init(base, 24) }.is_ok());
    }

    #[test]
    fn malloc_walks_the_free_list_first_fit() {
        let (mut heap, _backing) = heap_over(256);
        unsafe {
            let a = heap.malloc(32).unwrap();
            let b = heap.malloc(32).unwrap();
            let _c = heap.malloc(32).unwrap();

            heap.free(a.as_ptr());
            heap.free(b.as_ptr());

            // The merged a+b hole sits at the list head and wins first-fit
            // even though the tail block would fit as well.
            let d = heap.malloc(48).unwrap();
            assert_eq!(d, a);
        }
        assert!(heap.validate());
    }

    #[test]
    fn malloc_min_payload_holds_the_links() {
        let (mut heap, _backing) = heap_over(128);
        unsafe {
            let p = heap.malloc(1).unwrap();
            assert_eq!((*header_of(p.as_ptr())).size(), MIN_PAYLOAD);
            assert_eq!(heap.stats().used_bytes, HEADER_SIZE + MIN_PAYLOAD);
        }
        assert!(heap.validate());
    }

    #[test]
    fn free_merges_left_neighbour_found_via_list() {
        // Mirrors the fill-then-free walkthrough: three 16-byte allocations
        // in a 128-byte segment, then freeing b and c must fold b, c and the
        // 48-byte tail into one 96-byte free block.
        let (mut heap, _backing) = heap_over(128);
        unsafe {
            let _a = heap.malloc(16).unwrap();
            let b = heap.malloc(16).unwrap();
            let c = heap.malloc(16).unwrap();
            assert_eq!(heap.stats().used_bytes, 72);

            heap.free(b.as_ptr());
            assert_eq!(heap.stats().free_blocks, 2);

            heap.free(c.as_ptr());
            assert_eq!(heap.stats().free_blocks, 1);
            assert_eq!((*header_of(b.as_ptr())).size(), 96);
        }
        assert!(heap.validate());
    }

    #[test]
    fn free_coalesces_right_eagerly() {
        let (mut heap, _backing) = heap_over(128);
        unsafe {
            let a = heap.malloc(16).unwrap();
            let _b = heap.malloc(16).unwrap();

            // a's right neighbour is in use: freeing a merges nothing.
            heap.free(a.as_ptr());
            assert_eq!(heap.stats().free_blocks, 2);
        }
        assert!(heap.validate());
    }

    #[test]
    fn realloc_grows_into_free_right_neighbour() {
        let (mut heap, _backing) = heap_over(128);
        unsafe {
            let a = heap.malloc(16).unwrap();
            let b = heap.malloc(16).unwrap();
            heap.free(b.as_ptr());
            assert_eq!(heap.stats().free_blocks, 1);

            let p = heap.realloc(a.as_ptr(), 40).unwrap();
            assert_eq!(p, a);
            assert_eq!((*header_of(a.as_ptr())).size(), 40);
            assert_eq!(heap.stats().free_blocks, 1);
        }
        assert!(heap.validate());
    }

    #[test]
    fn realloc_grow_preserves_payload() {
        let (mut heap, _backing) = heap_over(128);
        unsafe {
            let a = heap.malloc(16).unwrap();
            let b = heap.malloc(16).unwrap();
            a.as_ptr().write_bytes(0xC3, 16);
            heap.free(b.as_ptr());

            let p = heap.realloc(a.as_ptr(), 40).unwrap();
            assert_eq!(p, a);
            for offset in 0..16 {
                assert_eq!(*p.as_ptr().add(offset), 0xC3);
            }
        }
        assert!(heap.validate());
    }

    #[test]
    fn realloc_shrink_below_split_threshold_is_a_no_op() {
        let (mut heap, _backing) = heap_over(128);
        unsafe {
            let a = heap.malloc(24).unwrap();
            let before = heap.stats();

            // 20 rounds back up to 24: same block, nothing moves.
            let p = heap.realloc(a.as_ptr(), 20).unwrap();
            assert_eq!(p, a);
            assert_eq!((*header_of(a.as_ptr())).size(), 24);
            assert_eq!(heap.stats(), before);
        }
        assert!(heap.validate());
    }

    #[test]
    fn realloc_shrink_splits_profitably() {
        let (mut heap, _backing) = heap_over(128);
        unsafe {
            let a = heap.malloc(48).unwrap();

            let p = heap.realloc(a.as_ptr(), 16).unwrap();
            assert_eq!(p, a);
            assert_eq!((*header_of(a.as_ptr())).size(), 16);

            // The 24-byte tail sits at the list head, unmerged with the
            // segment tail block to its right.
            let head = heap.first_free;
            assert_eq!((*header_of(head.cast::<u8>())).size(), 24);
            assert_eq!(heap.stats().free_blocks, 2);
        }
        assert!(heap.validate());
    }

    #[test]
    fn realloc_grow_absorbs_shrink_leftovers() {
        let (mut heap, _backing) = heap_over(128);
        unsafe {
            let a = heap.malloc(48).unwrap();
            heap.realloc(a.as_ptr(), 16).unwrap();
            // Blocks now: a(16 used) | 24 free | 64 free.
            assert_eq!(heap.stats().free_blocks, 2);

            // Growing a must chew through both free blocks in one call.
            let p = heap.realloc(a.as_ptr(), 96).unwrap();
            assert_eq!(p, a);
            assert_eq!((*header_of(a.as_ptr())).size(), 96);
            assert_eq!(heap.stats().free_blocks, 1);
        }
        assert!(heap.validate());
    }

    #[test]
    fn failed_grow_leaves_block_usable() {
        let (mut heap, _backing) = heap_over(128);
        unsafe {
            let p = heap.malloc(120).unwrap();
            p.as_ptr().write_bytes(0x7E, 120);

            assert!(heap.realloc(p.as_ptr(), 128).is_none());
            assert_eq!((*header_of(p.as_ptr())).size(), 120);
            for offset in 0..120 {
                assert_eq!(*p.as_ptr().add(offset), 0x7E);
            }
        }
        assert!(heap.validate());
    }

    #[test]
    fn failed_grow_does_not_absorb_insufficient_neighbour() {
        // Three 24-byte blocks fill the segment exactly; the freed middle
        // one is the only free memory anywhere. Growing a beyond what a+b
        // can cover must fail without absorbing b.
        let (mut heap, _backing) = heap_over(96);
        unsafe {
            let a = heap.malloc(24).unwrap();
            let b = heap.malloc(24).unwrap();
            let _c = heap.malloc(24).unwrap();
            assert_eq!(heap.stats().used_bytes, 96);

            heap.free(b.as_ptr());
            a.as_ptr().write_bytes(0x2F, 24);
            let before = heap.stats();

            assert!(heap.realloc(a.as_ptr(), 64).is_none());
            assert_eq!(heap.stats(), before);
            assert_eq!((*header_of(a.as_ptr())).size(), 24);
            for offset in 0..24 {
                assert_eq!(*a.as_ptr().add(offset), 0x2F);
            }

            // b's block is still on the free list and individually
            // allocatable.
            let d = heap.malloc(24).unwrap();
            assert_eq!(d, b);
        }
        assert!(heap.validate());
    }

    #[test]
    fn realloc_moves_when_right_neighbour_is_used() {
        let (mut heap, _backing) = heap_over(256);
        unsafe {
            let a = heap.malloc(16).unwrap();
            let _pin = heap.malloc(16).unwrap();
            a.as_ptr().write_bytes(0x11, 16);

            let p = heap.realloc(a.as_ptr(), 64).unwrap();
            assert_ne!(p, a);
            for offset in 0..16 {
                assert_eq!(*p.as_ptr().add(offset), 0x11);
            }
            // The old block was freed and is the leftmost free block again.
            let q = heap.malloc(16).unwrap();
            assert_eq!(q, a);
        }
        assert!(heap.validate());
    }

    #[test]
    fn realloc_zero_frees_the_block() {
        let (mut heap, _backing) = heap_over(128);
        unsafe {
            let a = heap.malloc(16).unwrap();
            assert!(heap.realloc(a.as_ptr(), 0).is_none());
        }
        assert_eq!(heap.stats().used_blocks, 0);
        assert_eq!(heap.stats().free_blocks, 1);
        assert!(heap.validate());
    }

    #[test]
    fn free_null_is_a_no_op() {
        let (mut heap, _backing) = heap_over(64);
        unsafe { heap.free(ptr::null_mut()) };
        assert!(heap.validate());
        assert_eq!(heap.stats().free_blocks, 1);
    }

    #[test]
    fn interleaved_frees_collapse_to_one_block() {
        let (mut heap, _backing) = heap_over(512);
        unsafe {
            let blocks: Vec<_> = (0..8).map(|_| heap.malloc(32).unwrap()).collect();

            // Punch holes first, then fill them in: every free must merge
            // with both of its neighbours eventually.
            for p in blocks.iter().step_by(2) {
                heap.free(p.as_ptr());
                assert!(heap.validate());
            }
            for p in blocks.iter().skip(1).step_by(2) {
                heap.free(p.as_ptr());
                assert!(heap.validate());
            }
        }
        assert_eq!(heap.stats().free_blocks, 1);
        assert_eq!(heap.stats().used_bytes, 0);
    }

    #[test]
    fn broken_list_links_fail_validation() {
        let (mut heap, _backing) = heap_over(128);
        unsafe {
            let a = heap.malloc(16).unwrap();
            let _b = heap.malloc(16).unwrap();
            heap.free(a.as_ptr());

            // Corrupt the back link of the second node.
            let second = (*heap.first_free).next;
            assert!(!second.is_null());
            (*second).prev = ptr::null_mut();
            assert!(!heap.validate());
        }
    }

    #[test]
    fn stale_counter_fails_validation() {
        let (mut heap, _backing) = heap_over(128);
        unsafe {
            heap.malloc(16).unwrap();
        }
        heap.used_bytes += 8;
        assert!(!heap.validate());
    }
}
