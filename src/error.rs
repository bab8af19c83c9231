//! The [`AllocError`] type returned by every fallible allocator operation.

use thiserror::Error;

/// Errors reported synchronously to the caller of an allocator operation.
///
/// Misuse that cannot be recovered from (freeing a sentinel handle, double frees)
/// is not represented here, such calls panic instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The request could not be satisfied and growth is disabled or exhausted.
    /// Any blocks claimed while serving the request have already been released.
    #[error("out of memory")]
    OutOfMemory,
    /// A word offset fell outside of an allocation's addressable range.
    #[error("word offset {offset} is out of bounds for an allocation of {capacity} words")]
    OutOfBounds { offset: usize, capacity: usize },
    /// Rejected at construction time.
    #[error("illegal configuration: {0}")]
    IllegalConfig(String),
    /// The requested size exceeds what the allocator can serve in one allocation.
    #[error("requested {requested} words but the limit is {limit}")]
    TooLarge { requested: usize, limit: usize },
    /// The operation is not offered by this allocator.
    #[error("{0} is not supported by this allocator")]
    Unsupported(&'static str),
    /// Structural dumps are only produced when the debug flag is set.
    #[error("structural dumps require the debug flag")]
    DebugDisabled,
    /// A blocking allocation gave up waiting for a block to be freed.
    #[error("timed out waiting for free blocks")]
    Timeout,
}
