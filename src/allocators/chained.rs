//! The [`ChainedAllocator`], serving variable-size requests with linked blocks.
//!
//! Requests that fit in one block get a plain block and a direct handle. Larger ones
//! get a singly linked chain: word 0 of every chain block holds the id of the next
//! block (or [`NIL`] at the tail) and the remaining `block_size - 1` words hold data.
//! The handle is the complement of the head id.

use std::cmp::Ordering;

use tracing::{debug, instrument, Level};

use super::claim::Claim;
use super::{fill_runs, read_runs, write_runs, BlockAllocator, BlockSource, Run, WordAllocator};
use crate::config::AllocatorConfig;
use crate::error::AllocError;
use crate::freelist::NIL;
use crate::handle::{Handle, Target};
use crate::util::ceil_div;
use crate::Word;

const LINK: usize = 0;
const HEADER_WORDS: usize = 1;

/// Smallest block size leaving room for data after the link word.
pub const MIN_BLOCK_SIZE: usize = HEADER_WORDS + 1;

/// A variable-size allocator chaining blocks of an underlying [`BlockSource`].
///
/// ```
/// use word_malloc::{AllocatorConfig, ChainedAllocator, WordAllocator};
///
/// let mut chains = ChainedAllocator::new(AllocatorConfig::new(5, 16)).unwrap();
/// let h = chains.malloc(12).unwrap();
/// assert!(h.raw() < 0);
///
/// let data: Vec<i32> = (0..12).collect();
/// chains.set_words(h, 0, &data).unwrap();
/// let h = chains.realloc(h, 6).unwrap();
///
/// let mut back = [0; 6];
/// chains.get_words(h, 0, &mut back).unwrap();
/// assert_eq!(back, [0, 1, 2, 3, 4, 5]);
/// ```
#[derive(Debug)]
pub struct ChainedAllocator<B: BlockSource = BlockAllocator> {
    blocks: B,
}

impl ChainedAllocator<BlockAllocator> {
    pub fn new(config: AllocatorConfig) -> Result<Self, AllocError> {
        config.validate_min_block_size(MIN_BLOCK_SIZE)?;
        ChainedAllocator::with_source(BlockAllocator::new(config)?)
    }
}

impl<B: BlockSource> ChainedAllocator<B> {
    /// Wraps an existing block source, which should not have live blocks.
    pub fn with_source(blocks: B) -> Result<Self, AllocError> {
        if blocks.block_size() < MIN_BLOCK_SIZE {
            return Err(AllocError::IllegalConfig(format!(
                "chained allocators need blocks of at least {MIN_BLOCK_SIZE} words"
            )));
        }
        Ok(ChainedAllocator { blocks })
    }

    pub fn source(&self) -> &B {
        &self.blocks
    }

    /// Data words held by each block of a chain.
    #[inline]
    pub fn data_words(&self) -> usize {
        self.blocks.block_size() - HEADER_WORDS
    }

    #[inline]
    fn next(&self, id: u32) -> Option<u32> {
        let link = self.blocks.block(id)[LINK];
        (link != NIL).then_some(link as u32)
    }

    /// Every block of the chain starting at `head`, in order.
    fn chain(&self, head: u32) -> Vec<u32> {
        let mut ids = vec![head];
        let mut id = head;
        while let Some(next) = self.next(id) {
            ids.push(next);
            id = next;
        }
        ids
    }

    fn chain_len(&self, head: u32) -> usize {
        let mut len = 1;
        let mut id = head;
        while let Some(next) = self.next(id) {
            len += 1;
            id = next;
        }
        len
    }

    /// Links `ids` in order and terminates the chain.
    fn link(&mut self, ids: &[u32]) {
        for pair in ids.windows(2) {
            self.blocks.block_mut(pair[0])[LINK] = pair[1] as Word;
        }
        if let Some(&last) = ids.last() {
            self.blocks.block_mut(last)[LINK] = NIL;
        }
    }

    /// Allocates a chain of `count` blocks, all or nothing.
    fn build(&mut self, count: usize) -> Result<u32, AllocError> {
        let ids = Claim::new(&mut self.blocks).take(count)?.commit();
        self.link(&ids);
        Ok(ids[0])
    }

    /// Turns a chain back into one plain block holding its first `block_size` words.
    /// The head block is kept, every other block is released.
    fn collapse(&mut self, ids: &[u32]) -> u32 {
        let head = ids[0];
        let dw = self.data_words();
        self.blocks.copy_words(head, HEADER_WORDS, head, 0, dw);
        if let Some(&second) = ids.get(1) {
            self.blocks.copy_words(second, HEADER_WORDS, head, dw, 1);
        }
        for &id in ids[1..].iter().rev() {
            self.blocks.release_block(id);
        }
        head
    }

    /// Resolves `offset` to a block and an offset inside it.
    fn locate(&self, handle: Handle, offset: usize) -> Result<(u32, usize), AllocError> {
        match handle.target() {
            Target::Block(id) => {
                let capacity = self.blocks.block_size();
                if offset >= capacity {
                    return Err(AllocError::OutOfBounds { offset, capacity });
                }
                Ok((id, offset))
            }
            Target::Index(head) => {
                let dw = self.data_words();
                let mut id = head;
                for _ in 0..offset / dw {
                    id = self.next(id).ok_or_else(|| AllocError::OutOfBounds {
                        offset,
                        capacity: self.chain_len(head) * dw,
                    })?;
                }
                Ok((id, HEADER_WORDS + offset % dw))
            }
        }
    }

    /// Splits `[offset, offset + len)` into per-block runs.
    fn runs(&self, handle: Handle, offset: usize, len: usize) -> Result<Vec<Run>, AllocError> {
        self.check_range(handle, offset, len)?;
        if len == 0 {
            return Ok(Vec::new());
        }
        let (mut id, mut start) = self.locate(handle, offset)?;
        let end_of_block = self.blocks.block_size();
        let mut runs = Vec::new();
        let mut left = len;
        loop {
            let n = left.min(end_of_block - start);
            runs.push(Run { block: id, start, len: n });
            left -= n;
            if left == 0 {
                return Ok(runs);
            }
            // The range was checked, so the chain continues.
            id = self.next(id).ok_or(AllocError::OutOfBounds { offset, capacity: offset + len - left })?;
            start = HEADER_WORDS;
        }
    }
}

impl<B: BlockSource> WordAllocator for ChainedAllocator<B> {
    #[instrument(level = "debug", skip(self), ret(level = Level::TRACE), err(level = Level::DEBUG))]
    fn malloc(&mut self, size: usize) -> Result<Handle, AllocError> {
        if size <= self.blocks.block_size() {
            return self.blocks.claim_block().map(Handle::direct);
        }
        let head = self.build(ceil_div(size, self.data_words()))?;
        Ok(Handle::indirect(head))
    }

    #[instrument(level = "debug", skip(self), ret(level = Level::TRACE), err(level = Level::DEBUG))]
    fn realloc(&mut self, handle: Handle, new_size: usize) -> Result<Handle, AllocError> {
        let block_size = self.blocks.block_size();
        let dw = self.data_words();
        match handle.target() {
            Target::Block(id) => {
                if new_size <= block_size {
                    return Ok(handle);
                }
                let head = self.build(ceil_div(new_size, dw))?;
                let mut copied = 0;
                for target in self.chain(head) {
                    let n = dw.min(block_size - copied);
                    if n == 0 {
                        break;
                    }
                    self.blocks.copy_words(id, copied, target, HEADER_WORDS, n);
                    copied += n;
                }
                self.blocks.release_block(id);
                debug!(from = id, to = head, "Moved block into a chain.");
                Ok(Handle::indirect(head))
            }
            Target::Index(head) => {
                let ids = self.chain(head);
                if new_size <= block_size {
                    debug!(blocks = ids.len(), "Collapsing chain into a single block.");
                    return Ok(Handle::direct(self.collapse(&ids)));
                }
                let target = ceil_div(new_size, dw);
                match target.cmp(&ids.len()) {
                    Ordering::Equal => {}
                    Ordering::Less => {
                        self.blocks.block_mut(ids[target - 1])[LINK] = NIL;
                        for &id in ids[target..].iter().rev() {
                            self.blocks.release_block(id);
                        }
                    }
                    Ordering::Greater => {
                        // Nothing is linked until every new block is claimed, so a
                        // failure leaves the chain exactly as it was.
                        let fresh = Claim::new(&mut self.blocks)
                            .take(target - ids.len())?
                            .commit();
                        let tail = ids[ids.len() - 1];
                        self.blocks.block_mut(tail)[LINK] = fresh[0] as Word;
                        self.link(&fresh);
                    }
                }
                Ok(handle)
            }
        }
    }

    #[instrument(level = "debug", skip(self))]
    fn free(&mut self, handle: Handle) {
        match handle.target() {
            Target::Block(id) => self.blocks.release_block(id),
            Target::Index(head) => {
                for id in self.chain(head).into_iter().rev() {
                    self.blocks.release_block(id);
                }
            }
        }
    }

    fn get_word(&self, handle: Handle, offset: usize) -> Result<Word, AllocError> {
        let (id, at) = self.locate(handle, offset)?;
        Ok(self.blocks.block(id)[at])
    }

    fn set_word(&mut self, handle: Handle, offset: usize, value: Word) -> Result<(), AllocError> {
        let (id, at) = self.locate(handle, offset)?;
        self.blocks.block_mut(id)[at] = value;
        Ok(())
    }

    fn maximum_capacity_for(&self, handle: Handle) -> usize {
        match handle.target() {
            Target::Block(_) => self.blocks.block_size(),
            Target::Index(head) => self.chain_len(head) * self.data_words(),
        }
    }

    fn initialize(&mut self, handle: Handle) {
        match handle.target() {
            Target::Block(id) => self.blocks.initialize_block(id),
            Target::Index(head) => {
                for id in self.chain(head) {
                    let link = self.blocks.block(id)[LINK];
                    self.blocks.initialize_block(id);
                    self.blocks.block_mut(id)[LINK] = link;
                }
            }
        }
    }

    fn dump(&self, handle: Handle) -> Result<String, AllocError> {
        if !self.blocks.is_debug() {
            return Err(AllocError::DebugDisabled);
        }
        Ok(match handle.target() {
            Target::Block(id) => format!("#{id}"),
            Target::Index(head) => {
                let ids: Vec<String> = self.chain(head).iter().map(|id| format!("#{id}")).collect();
                format!("chain[{}]", ids.join(" -> "))
            }
        })
    }

    fn block_size(&self) -> usize {
        self.blocks.block_size()
    }

    fn used_blocks(&self) -> usize {
        self.blocks.used_blocks()
    }

    fn free_blocks(&self) -> usize {
        self.blocks.free_blocks()
    }

    fn max_blocks(&self) -> usize {
        self.blocks.max_blocks()
    }

    fn compute_memory_usage(&self) -> usize {
        self.blocks.compute_memory_usage()
    }

    fn clear(&mut self) {
        self.blocks.clear()
    }

    fn get_words(&self, handle: Handle, offset: usize, buf: &mut [Word]) -> Result<(), AllocError> {
        let runs = self.runs(handle, offset, buf.len())?;
        read_runs(&self.blocks, &runs, buf);
        Ok(())
    }

    fn set_words(&mut self, handle: Handle, offset: usize, buf: &[Word]) -> Result<(), AllocError> {
        let runs = self.runs(handle, offset, buf.len())?;
        write_runs(&mut self.blocks, &runs, buf);
        Ok(())
    }

    fn mem_set(&mut self, handle: Handle, offset: usize, len: usize, value: Word) -> Result<(), AllocError> {
        let runs = self.runs(handle, offset, len)?;
        fill_runs(&mut self.blocks, &runs, value);
        Ok(())
    }
}
