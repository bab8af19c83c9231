//! Handle-based word allocators over a flat, growable word store.
//!
//! Containers built on this crate never hold references into memory. They hold
//! [`Handle`]s, plain 32-bit integers, and read or write 32-bit [`Word`]s through the
//! allocator that issued them. Because a handle is just an integer, it can itself be
//! stored inside a word, which is how linked structures are built on top.
//!
//! ```
//! use word_malloc::{AllocatorConfig, TreeAllocator, WordAllocator};
//!
//! let config = AllocatorConfig::new(16, 64).growth_factor(2.0).unwrap();
//! let mut allocator = TreeAllocator::new(config).unwrap();
//!
//! let h = allocator.malloc(100).unwrap();
//! allocator.set_long(h, 98, -1).unwrap();
//! let h = allocator.realloc(h, 1000).unwrap();
//! assert_eq!(allocator.get_long(h, 98), Ok(-1));
//! allocator.free(h);
//! ```
//!
//! # Allocators
//! Every allocator implements [`WordAllocator`]:
//! - [`BlockAllocator`] hands out blocks of one fixed size from a single store segment.
//! - [`BigBlockAllocator`] does the same over several segments, for stores too large to
//!   be addressed as one.
//! - [`ChainedAllocator`] serves any size by linking blocks into a chain.
//! - [`TreeAllocator`] serves any size with a shallow index tree, so resizing costs
//!   work proportional to the tree depth instead of the allocation size.
//! - [`SizeClassAllocator`] routes each request to the smallest of several block sizes.
//!
//! None of them are thread-safe. [`SharedAllocator`] wraps any of them in a `Mutex` and
//! lets callers wait for memory when a bounded allocator is exhausted.
//!
//! # Mode of operation
//! ## Blocks
//! The store is an array of blocks of `block_size` words. Block 0 is reserved so that
//! no valid handle is ever `0`. A block is either free or handed out, and freeing a block
//! that is not handed out panics.
//!
//! ## Freelist
//! Free blocks are threaded into an intrusive list through their first word. Blocks that
//! were never handed out are not threaded at all: a watermark marks where they start and
//! they are taken from there when the list is empty.
//!
//! ## Handles
//! A non-negative handle is the id of a single block holding the whole allocation. A
//! negative handle is the complement of the id of the block describing a larger
//! allocation: the head of a chain or the root of an index tree. `-1` and `0` are the
//! [`Handle::INVALID`] and [`Handle::NULL`] sentinels and are never returned.
//!
//! ## Growth
//! When the store is exhausted it grows by the configured [`Growth`] factor, up to the
//! configured block limit, or fails with [`AllocError::OutOfMemory`]. Growing never moves
//! a block to another id, so handles stay valid.
//!
//! ## Failure
//! Operations needing several blocks claim all of them before changing anything. When a
//! claim fails the blocks claimed so far are returned and the allocator is left exactly as
//! it was, including the structure of an allocation a failed `realloc` was called on.
//!
//! # Logging
//! Allocation entry points are instrumented with [`tracing`] spans. Growth, exhaustion
//! and rollbacks are logged as events.

pub use crate::allocators::{
    AllocatorStats, BigBlockAllocator, BlockAllocator, BlockSource, ChainedAllocator, SegmentedStore,
    SharedAllocator, SizeClassAllocator, TreeAllocator, WordAllocator,
};
pub use crate::config::{AllocatorConfig, MAX_BLOCK_LIMIT};
pub use crate::error::AllocError;
pub use crate::growth::Growth;
pub use crate::handle::{Handle, Target};
pub use crate::init::Initializer;
pub use crate::store::{Backing, FlatStore};

pub mod allocators;
mod config;
mod error;
mod freelist;
mod growth;
mod handle;
mod init;
mod store;
mod util;

/// The unit of storage: every allocator reads and writes 32-bit signed words.
pub type Word = i32;
