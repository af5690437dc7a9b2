//! Block metadata and segment traversal.

use log::error;

use super::{ALIGNMENT, HEADER_SIZE};

/// In-use flag, stored in the lowest bit of the header word.
const USED: usize = 0x1;

/// Mask recovering the payload size from the header word.
const SIZE_MASK: usize = !(ALIGNMENT - 1);

/// Metadata word stored at the start of every block.
///
/// The payload size is always a multiple of [`ALIGNMENT`], so the low bits
/// of a valid size are zero and carry the allocation flag instead.
#[repr(transparent)]
#[derive(Clone, Copy, Debug)]
pub(crate) struct BlockHeader(usize);

impl BlockHeader {
    pub(crate) const fn encode(size: usize, used: bool) -> Self {
        Self(size | if used { USED } else { 0 })
    }

    pub(crate) fn size(&self) -> usize {
        self.0 & SIZE_MASK
    }

    pub(crate) fn is_used(&self) -> bool {
        self.0 & USED != 0
    }

    pub(crate) fn mark_used(&mut self) {
        self.0 |= USED;
    }

    pub(crate) fn mark_free(&mut self) {
        self.0 &= !USED;
    }

    /// Updates the payload size, preserving the allocation flag.
    pub(crate) fn set_size(&mut self, size: usize) {
        let flag = self.0 & USED;
        self.0 = size | flag;
    }
}

/// Header address for a payload pointer handed out by the allocator.
pub(crate) unsafe fn header_of(payload: *mut u8) -> *mut BlockHeader {
    payload.sub(HEADER_SIZE).cast()
}

/// Payload address of the block starting at `header`.
pub(crate) unsafe fn payload_of(header: *mut BlockHeader) -> *mut u8 {
    header.cast::<u8>().add(HEADER_SIZE)
}

/// Forward cursor over the blocks of a well-formed segment.
///
/// Steps `header + size` per block. Corrupted sizes send the cursor out of
/// bounds, so diagnostics that must survive corruption (see [`check_tiling`])
/// walk by hand instead.
pub(crate) struct BlockCursor {
    cur: *mut u8,
    end: *mut u8,
}

impl BlockCursor {
    pub(crate) fn new(base: *mut u8, end: *mut u8) -> Self {
        Self { cur: base, end }
    }
}

impl Iterator for BlockCursor {
    type Item = *mut BlockHeader;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur >= self.end {
            return None;
        }
        let header = self.cur.cast::<BlockHeader>();
        self.cur = unsafe { self.cur.add(HEADER_SIZE + (*header).size()) };
        Some(header)
    }
}

/// Per-segment totals accumulated by [`check_tiling`].
pub(crate) struct WalkSummary {
    pub(crate) used_blocks: usize,
    pub(crate) free_blocks: usize,
    pub(crate) used_bytes: usize,
}

/// Walks `[base, end)` checking that blocks tile the segment exactly.
///
/// Returns `None` (after logging the offending block) when a header is
/// truncated, a payload is below `min_payload`, or a block overruns the
/// segment end.
pub(crate) unsafe fn check_tiling(
    base: *mut u8,
    end: *mut u8,
    min_payload: usize,
) -> Option<WalkSummary> {
    let mut summary = WalkSummary {
        used_blocks: 0,
        free_blocks: 0,
        used_bytes: 0,
    };

    let mut cur = base;
    while cur < end {
        let remaining = end as usize - cur as usize;
        if remaining < HEADER_SIZE {
            error!("heap: truncated header at {:p}", cur);
            return None;
        }

        let header = cur.cast::<BlockHeader>();
        let size = (*header).size();
        if size < min_payload {
            error!("heap: block {:p} has illegal payload size {}", cur, size);
            return None;
        }
        if HEADER_SIZE + size > remaining {
            error!("heap: block {:p} overruns the segment end", cur);
            return None;
        }

        if (*header).is_used() {
            summary.used_blocks += 1;
            summary.used_bytes += HEADER_SIZE + size;
        } else {
            summary.free_blocks += 1;
        }
        cur = cur.add(HEADER_SIZE + size);
    }

    Some(summary)
}
