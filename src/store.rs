//! The word store: [`Backing`] trait and the single segment [`FlatStore`].
//!
//! A backing provisions whole blocks of `block_size` words. Block 0 is provisioned
//! like any other block but allocators never hand it out.

use std::fmt::Debug;

use static_assertions::const_assert;
use tracing::debug;

use crate::error::AllocError;
use crate::Word;

/// Size of a word in bytes.
pub const WORD_BYTES: usize = std::mem::size_of::<Word>();

/// Most words a single segment may hold.
pub const MAX_SEGMENT_WORDS: usize = Word::MAX as usize;

const_assert!(WORD_BYTES == 4);

/// Storage for fixed-size blocks that can only grow.
///
/// Growing must keep every provisioned block at the same id with the same content.
pub trait Backing: Debug {
    /// Words per block.
    fn block_size(&self) -> usize;

    /// Number of provisioned blocks, including the reserved block 0.
    fn blocks(&self) -> usize;

    /// Most blocks (including block 0) this backing can ever provision.
    fn max_blocks(&self) -> usize;

    /// Provisions blocks until [`blocks`](Backing::blocks) equals `blocks`.
    /// New blocks are zeroed. On failure nothing changes.
    fn grow_to(&mut self, blocks: usize) -> Result<(), AllocError>;

    fn block(&self, id: u32) -> &[Word];

    fn block_mut(&mut self, id: u32) -> &mut [Word];

    /// Number of words reserved from the host.
    fn reserved_words(&self) -> usize;

    /// Copies `len` words from block `src` to block `dst`. The ranges may overlap
    /// when `src == dst`.
    fn copy_words(&mut self, src: u32, src_offset: usize, dst: u32, dst_offset: usize, len: usize) {
        if src == dst {
            self.block_mut(src)
                .copy_within(src_offset..src_offset + len, dst_offset);
            return;
        }
        let tmp: Vec<Word> = self.block(src)[src_offset..src_offset + len].to_vec();
        self.block_mut(dst)[dst_offset..dst_offset + len].copy_from_slice(&tmp);
    }
}

/// A backing made of one contiguous `Vec`, grown by reallocation.
#[derive(Debug)]
pub struct FlatStore {
    words: Vec<Word>,
    block_size: usize,
}

impl FlatStore {
    /// Creates a store provisioning `blocks` blocks (block 0 included).
    pub fn new(block_size: usize, blocks: usize) -> Result<Self, AllocError> {
        let mut store = FlatStore { words: Vec::new(), block_size };
        store.grow_to(blocks)?;
        Ok(store)
    }

    #[inline(always)]
    fn range(&self, id: u32) -> std::ops::Range<usize> {
        let start = id as usize * self.block_size;
        start..start + self.block_size
    }
}

impl Backing for FlatStore {
    #[inline(always)]
    fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline(always)]
    fn blocks(&self) -> usize {
        self.words.len() / self.block_size
    }

    fn max_blocks(&self) -> usize {
        MAX_SEGMENT_WORDS / self.block_size
    }

    fn grow_to(&mut self, blocks: usize) -> Result<(), AllocError> {
        if blocks <= self.blocks() {
            return Ok(());
        }
        if blocks > self.max_blocks() {
            debug!(blocks, max = self.max_blocks(), "Segment would exceed its addressable size.");
            return Err(AllocError::OutOfMemory);
        }
        let new_len = blocks * self.block_size;
        self.words
            .try_reserve_exact(new_len - self.words.len())
            .map_err(|_| AllocError::OutOfMemory)?;
        self.words.resize(new_len, 0);
        Ok(())
    }

    #[inline]
    fn block(&self, id: u32) -> &[Word] {
        &self.words[self.range(id)]
    }

    #[inline]
    fn block_mut(&mut self, id: u32) -> &mut [Word] {
        let range = self.range(id);
        &mut self.words[range]
    }

    fn reserved_words(&self) -> usize {
        self.words.len()
    }

    fn copy_words(&mut self, src: u32, src_offset: usize, dst: u32, dst_offset: usize, len: usize) {
        let from = src as usize * self.block_size + src_offset;
        let to = dst as usize * self.block_size + dst_offset;
        self.words.copy_within(from..from + len, to);
    }
}
