//! The [`BigBlockAllocator`]: a [`BlockAllocator`] over a [`SegmentedStore`].
//!
//! A single segment can address at most [`MAX_SEGMENT_WORDS`] words. Splitting the
//! store into fixed-capacity segments lifts that limit on the total number of blocks.

use tracing::debug;

use super::BlockAllocator;
use crate::config::{AllocatorConfig, MAX_BLOCK_LIMIT};
use crate::error::AllocError;
use crate::store::{Backing, MAX_SEGMENT_WORDS};
use crate::Word;

/// A fixed-size block allocator whose store spans several segments.
///
/// ```
/// use word_malloc::{AllocatorConfig, BigBlockAllocator, WordAllocator};
///
/// let config = AllocatorConfig::new(2, 10).growth_factor(2.0).unwrap();
/// let mut blocks = BigBlockAllocator::with_segments(config, 4).unwrap();
/// let handles: Vec<_> = (0..20).map(|_| blocks.malloc(2).unwrap()).collect();
/// assert_eq!(handles.len(), 20);
/// assert!(blocks.store().segments() > 1);
/// ```
pub type BigBlockAllocator = BlockAllocator<SegmentedStore>;

impl BlockAllocator<SegmentedStore> {
    /// Creates an allocator whose segments hold `blocks_per_segment` blocks each.
    pub fn with_segments(config: AllocatorConfig, blocks_per_segment: usize) -> Result<Self, AllocError> {
        config.validate()?;
        let store = SegmentedStore::new(config.block_size, blocks_per_segment, config.blocks + 1)?;
        Ok(BlockAllocator::with_store(store, config))
    }
}

/// Blocks spread over segments of `blocks_per_segment` blocks.
///
/// Block `id` lives in segment `id / blocks_per_segment` at block offset
/// `id % blocks_per_segment`. Growth fills up the last segment before adding new
/// ones, so existing blocks never move between segments.
#[derive(Debug)]
pub struct SegmentedStore {
    segments: Vec<Vec<Word>>,
    block_size: usize,
    blocks_per_segment: usize,
    blocks: usize,
}

impl SegmentedStore {
    pub fn new(block_size: usize, blocks_per_segment: usize, blocks: usize) -> Result<Self, AllocError> {
        if blocks_per_segment == 0 {
            return Err(AllocError::IllegalConfig(
                "segments must hold at least one block".to_string(),
            ));
        }
        if block_size == 0 || blocks_per_segment > MAX_SEGMENT_WORDS / block_size {
            return Err(AllocError::IllegalConfig(format!(
                "{blocks_per_segment} blocks of {block_size} words do not fit a segment"
            )));
        }
        let mut store = SegmentedStore {
            segments: Vec::new(),
            block_size,
            blocks_per_segment,
            blocks: 0,
        };
        store.grow_to(blocks)?;
        Ok(store)
    }

    pub fn segments(&self) -> usize {
        self.segments.len()
    }

    pub fn blocks_per_segment(&self) -> usize {
        self.blocks_per_segment
    }

    /// Maps a block id to its segment and the word offset of the block inside it.
    #[inline(always)]
    pub fn locate(&self, id: u32) -> (usize, usize) {
        let id = id as usize;
        (id / self.blocks_per_segment, (id % self.blocks_per_segment) * self.block_size)
    }
}

impl Backing for SegmentedStore {
    #[inline(always)]
    fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline(always)]
    fn blocks(&self) -> usize {
        self.blocks
    }

    fn max_blocks(&self) -> usize {
        MAX_BLOCK_LIMIT + 1
    }

    fn grow_to(&mut self, blocks: usize) -> Result<(), AllocError> {
        if blocks <= self.blocks {
            return Ok(());
        }
        if blocks > self.max_blocks() {
            return Err(AllocError::OutOfMemory);
        }
        let segment_words = self.blocks_per_segment * self.block_size;
        let mut remaining = blocks - self.blocks;

        // Reserve everything before touching any segment so a failure changes nothing.
        let room = match self.segments.last() {
            Some(last) => (segment_words - last.len()) / self.block_size,
            None => 0,
        };
        let extend_last = remaining.min(room);
        if let Some(last) = self.segments.last_mut() {
            last.try_reserve_exact(extend_last * self.block_size)
                .map_err(|_| AllocError::OutOfMemory)?;
        }
        remaining -= extend_last;

        let mut fresh = Vec::new();
        while remaining > 0 {
            let n = remaining.min(self.blocks_per_segment);
            let mut segment = Vec::new();
            segment
                .try_reserve_exact(n * self.block_size)
                .map_err(|_| AllocError::OutOfMemory)?;
            segment.resize(n * self.block_size, 0);
            fresh.push(segment);
            remaining -= n;
        }

        if let Some(last) = self.segments.last_mut() {
            let len = last.len() + extend_last * self.block_size;
            last.resize(len, 0);
        }
        debug!(new_segments = fresh.len(), extended = extend_last, "Provisioned segments.");
        self.segments.extend(fresh);
        self.blocks = blocks;
        Ok(())
    }

    #[inline]
    fn block(&self, id: u32) -> &[Word] {
        let (segment, start) = self.locate(id);
        &self.segments[segment][start..start + self.block_size]
    }

    #[inline]
    fn block_mut(&mut self, id: u32) -> &mut [Word] {
        let (segment, start) = self.locate(id);
        &mut self.segments[segment][start..start + self.block_size]
    }

    fn reserved_words(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }

    fn copy_words(&mut self, src: u32, src_offset: usize, dst: u32, dst_offset: usize, len: usize) {
        let (src_segment, src_start) = self.locate(src);
        let (dst_segment, dst_start) = self.locate(dst);
        if src_segment == dst_segment {
            let from = src_start + src_offset;
            self.segments[src_segment].copy_within(from..from + len, dst_start + dst_offset);
            return;
        }
        let tmp: Vec<Word> = self.block(src)[src_offset..src_offset + len].to_vec();
        self.block_mut(dst)[dst_offset..dst_offset + len].copy_from_slice(&tmp);
    }
}
