use core::fmt::Debug;

/// `BaseError` is a common trait implemented by every error type defined in
/// this crate.
///
/// It is dependent on the [`Debug`] trait, which makes sense as we are
/// dealing with errors.
pub trait BaseError: Debug {}

/// `CanFail` is a return type for functions that are allowed to fail, and
/// don't need to return anything.
///
/// # Examples:
///
/// ```
/// use segheap::err::{CanFail, HeapInitError};
///
/// fn attach_component() -> CanFail<HeapInitError> {
///     Ok(())
/// }
/// ```
pub type CanFail<T> = Result<(), T>;

/// `HeapInitError` defines the ways attaching an allocator to a memory
/// segment can fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapInitError {
    /// The segment cannot hold a single block of the minimal legal size.
    SegmentTooSmall,

    /// The segment base or length is not a multiple of the block alignment,
    /// so no valid block tiling of the segment exists.
    SegmentMisaligned,
}

impl BaseError for HeapInitError {}
