//! The [`TreeAllocator`], serving variable-size requests with shallow index trees.
//!
//! Requests that fit in one block get a plain block and a direct handle. Larger ones
//! get an index node: word 0 holds the number of data blocks the node covers and the
//! other `block_size - 1` words are slots, each holding either a data block id or
//! the complement of a nested node's id. Data blocks hold `block_size` data words,
//! so all bookkeeping lives in the index nodes. See [`capacity`] for the shape rules.
//!
//! Growing or shrinking by one block touches a single root-to-leaf path and claims at
//! most two blocks, which is what makes `realloc` cheap compared to a chain copy.
//! Node ids never change once allocated: when a node has to grow a level its content
//! moves into a fresh block and the node becomes the new parent, and shrinking a
//! level moves it back.

use tracing::{debug, instrument, warn, Level};

use super::claim::Claim;
use super::{fill_runs, read_runs, write_runs, BlockAllocator, BlockSource, Run, WordAllocator};
use crate::config::AllocatorConfig;
use crate::error::AllocError;
use crate::handle::{decode_slot, encode_index, Handle, Target};
use crate::util::ceil_div;
use crate::Word;

pub mod capacity;

use capacity::{append_cost, blocks_for, capacity_per_child, child_counts, maximum_capacity_for_num_blocks};

const COUNT: usize = 0;
const HEADER_WORDS: usize = 1;
const EMPTY: Word = 0;

/// Smallest block size giving index nodes a fanout of two.
pub const MIN_BLOCK_SIZE: usize = HEADER_WORDS + 2;

/// A variable-size allocator indexing blocks of an underlying [`BlockSource`].
///
/// ```
/// use word_malloc::{AllocatorConfig, TreeAllocator, WordAllocator};
///
/// let mut trees = TreeAllocator::new(AllocatorConfig::new(4, 64)).unwrap();
/// let h = trees.malloc(10).unwrap();
/// trees.set_word(h, 9, 7).unwrap();
/// let h = trees.realloc(h, 40).unwrap();
/// assert_eq!(trees.get_word(h, 9), Ok(7));
/// assert_eq!(trees.maximum_capacity_for(h), 40);
/// ```
#[derive(Debug)]
pub struct TreeAllocator<B: BlockSource = BlockAllocator> {
    blocks: B,
}

impl TreeAllocator<BlockAllocator> {
    pub fn new(config: AllocatorConfig) -> Result<Self, AllocError> {
        config.validate_min_block_size(MIN_BLOCK_SIZE)?;
        TreeAllocator::with_source(BlockAllocator::new(config)?)
    }
}

impl<B: BlockSource> TreeAllocator<B> {
    /// Wraps an existing block source, which should not have live blocks.
    pub fn with_source(blocks: B) -> Result<Self, AllocError> {
        if blocks.block_size() < MIN_BLOCK_SIZE {
            return Err(AllocError::IllegalConfig(format!(
                "tree allocators need blocks of at least {MIN_BLOCK_SIZE} words"
            )));
        }
        Ok(TreeAllocator { blocks })
    }

    pub fn source(&self) -> &B {
        &self.blocks
    }

    /// Slots per index node.
    #[inline]
    pub fn fanout(&self) -> usize {
        self.blocks.block_size() - HEADER_WORDS
    }

    /// Index levels above the data blocks of an allocation.
    pub fn depth_of(&self, handle: Handle) -> usize {
        match handle.target() {
            Target::Block(_) => 0,
            Target::Index(root) => capacity::depth(self.fanout(), self.count(root)),
        }
    }

    #[inline]
    fn count(&self, node: u32) -> usize {
        self.blocks.block(node)[COUNT] as usize
    }

    #[inline]
    fn slot(&self, node: u32, j: usize) -> Word {
        self.blocks.block(node)[HEADER_WORDS + j]
    }

    #[inline]
    fn set_slot(&mut self, node: u32, j: usize, value: Word) {
        self.blocks.block_mut(node)[HEADER_WORDS + j] = value;
    }

    /// Clears `node` and makes it an index covering `count` blocks.
    fn reset_node(&mut self, node: u32, count: usize) {
        let block = self.blocks.block_mut(node);
        block.fill(EMPTY);
        block[COUNT] = count as Word;
    }

    fn nested(&self, node: u32, j: usize) -> u32 {
        match decode_slot(self.slot(node, j)) {
            Target::Index(child) => child,
            Target::Block(id) => panic!("slot {j} of node {node} holds data block {id}, expected an index"),
        }
    }

    fn children(&self, node: u32) -> Vec<Target> {
        let count = self.count(node);
        let per_child = capacity_per_child(self.fanout(), count);
        (0..ceil_div(count, per_child))
            .map(|j| decode_slot(self.slot(node, j)))
            .collect()
    }

    fn data_blocks_needed(&self, size: usize) -> usize {
        ceil_div(size, self.blocks.block_size()).max(1)
    }

    /// Fails unless the blocks a tree of `from` data blocks needs to reach `to` can all
    /// be claimed. Appending grows the store one step at a time, so oversized requests
    /// are turned away here before the first append.
    fn admit(&self, from: usize, to: usize) -> Result<(), AllocError> {
        let available = self.blocks.claimable_blocks();
        let fanout = self.fanout();
        // Data blocks alone are a lower bound, and keep `blocks_for` away from huge counts.
        if to - from > available || blocks_for(fanout, to) - blocks_for(fanout, from) > available {
            debug!(from, to, available, "Request exceeds the claimable blocks.");
            return Err(AllocError::OutOfMemory);
        }
        Ok(())
    }

    /// Allocates a complete tree over `n >= 2` data blocks, all or nothing.
    fn build(&mut self, n: usize) -> Result<u32, AllocError> {
        let total = blocks_for(self.fanout(), n);
        let mut fresh = Claim::new(&mut self.blocks).take(total)?.commit();
        let root = self.build_node(n, &mut fresh);
        debug_assert!(fresh.is_empty());
        Ok(root)
    }

    fn build_node(&mut self, n: usize, fresh: &mut Vec<u32>) -> u32 {
        let node = take(fresh);
        self.reset_node(node, n);
        for (j, m) in child_counts(self.fanout(), n).enumerate() {
            let slot = if m == 1 {
                take(fresh) as Word
            } else {
                encode_index(self.build_node(m, fresh))
            };
            self.set_slot(node, j, slot);
        }
        node
    }

    /// Resolves the `index`-th data block below `node`.
    fn data_block(&self, mut node: u32, mut index: usize) -> u32 {
        loop {
            let per_child = capacity_per_child(self.fanout(), self.count(node));
            let j = index / per_child;
            index %= per_child;
            match decode_slot(self.slot(node, j)) {
                Target::Block(id) => {
                    debug_assert_eq!(index, 0);
                    return id;
                }
                Target::Index(child) => node = child,
            }
        }
    }

    fn collect_data_blocks(&self, node: u32, out: &mut Vec<u32>) {
        for child in self.children(node) {
            match child {
                Target::Block(id) => out.push(id),
                Target::Index(nested) => self.collect_data_blocks(nested, out),
            }
        }
    }

    /// Adds one data block at the end of the tree rooted at `root`.
    /// Either succeeds or leaves the tree and the block source untouched.
    fn append_block(&mut self, root: u32) -> Result<(), AllocError> {
        let n = self.count(root);
        let needed = append_cost(self.fanout(), n);
        let mut fresh = Claim::new(&mut self.blocks).take(needed)?.commit();
        self.append_into(root, n, &mut fresh);
        debug_assert!(fresh.is_empty());
        Ok(())
    }

    fn append_into(&mut self, node: u32, n: usize, fresh: &mut Vec<u32>) {
        debug_assert_eq!(self.count(node), n);
        let fanout = self.fanout();
        let capacity = maximum_capacity_for_num_blocks(fanout, n);

        if n == capacity {
            // Full: the node's content moves down one level and gets a sibling.
            let moved = take(fresh);
            let data = take(fresh);
            self.blocks.copy_words(node, 0, moved, 0, self.blocks.block_size());
            self.reset_node(node, n + 1);
            self.set_slot(node, 0, encode_index(moved));
            self.set_slot(node, 1, data as Word);
            return;
        }

        let per_child = capacity / fanout;
        let j = n / per_child;
        match n % per_child {
            0 => {
                debug_assert_eq!(self.slot(node, j), EMPTY);
                let data = take(fresh);
                self.set_slot(node, j, data as Word);
            }
            1 => {
                // A lone data block gets wrapped together with the new one.
                let first = self.slot(node, j);
                let wrapper = take(fresh);
                let data = take(fresh);
                self.reset_node(wrapper, 2);
                self.set_slot(wrapper, 0, first);
                self.set_slot(wrapper, 1, data as Word);
                self.set_slot(node, j, encode_index(wrapper));
            }
            local => {
                let child = self.nested(node, j);
                self.append_into(child, local, fresh);
            }
        }
        self.blocks.block_mut(node)[COUNT] = (n + 1) as Word;
    }

    /// Removes the last data block below `node`, which covers `n >= 3` blocks.
    fn remove_block(&mut self, node: u32, n: usize) {
        debug_assert!(n >= 3);
        debug_assert_eq!(self.count(node), n);
        let per_child = capacity_per_child(self.fanout(), n);

        if n - 1 == per_child {
            // Only a full child and one lone block remain: the child takes over the node.
            let moved = self.nested(node, 0);
            let data = self.slot(node, 1) as u32;
            self.blocks.release_block(data);
            self.blocks.copy_words(moved, 0, node, 0, self.blocks.block_size());
            self.blocks.release_block(moved);
            return;
        }

        let last = n - 1;
        let j = last / per_child;
        match last % per_child {
            0 => {
                let data = self.slot(node, j) as u32;
                self.blocks.release_block(data);
                self.set_slot(node, j, EMPTY);
            }
            1 => {
                let wrapper = self.nested(node, j);
                let first = self.slot(wrapper, 0);
                let second = self.slot(wrapper, 1) as u32;
                self.blocks.release_block(second);
                self.blocks.release_block(wrapper);
                self.set_slot(node, j, first);
            }
            local => {
                let child = self.nested(node, j);
                self.remove_block(child, local + 1);
            }
        }
        self.blocks.block_mut(node)[COUNT] = (n - 1) as Word;
    }

    /// Appends until the root covers `to` blocks. On failure the tree is shrunk back
    /// to `from` blocks (or 2 if `from` is smaller) and the error is returned.
    fn grow_to(&mut self, root: u32, from: usize, to: usize) -> Result<(), AllocError> {
        for n in from..to {
            if let Err(e) = self.append_block(root) {
                warn!(from, reached = n, to, "Rolling back partial tree growth.");
                self.shrink_to(root, n, from);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Removes blocks until the root covers `max(to, 2)` blocks.
    fn shrink_to(&mut self, root: u32, from: usize, to: usize) {
        for n in (to.max(2) + 1..=from).rev() {
            self.remove_block(root, n);
        }
    }

    /// Frees a root covering at most two blocks and returns its first data block.
    fn collapse(&mut self, root: u32) -> u32 {
        let count = self.count(root);
        debug_assert!(count <= 2);
        let first = self.slot(root, 0) as u32;
        if count == 2 {
            let second = self.slot(root, 1) as u32;
            self.blocks.release_block(second);
        }
        self.blocks.release_block(root);
        first
    }

    fn free_node(&mut self, node: u32) {
        for child in self.children(node) {
            match child {
                Target::Block(id) => self.blocks.release_block(id),
                Target::Index(nested) => self.free_node(nested),
            }
        }
        self.blocks.release_block(node);
    }

    fn locate(&self, handle: Handle, offset: usize) -> Result<(u32, usize), AllocError> {
        let block_size = self.blocks.block_size();
        let capacity = self.maximum_capacity_for(handle);
        if offset >= capacity {
            return Err(AllocError::OutOfBounds { offset, capacity });
        }
        match handle.target() {
            Target::Block(id) => Ok((id, offset)),
            Target::Index(root) => Ok((self.data_block(root, offset / block_size), offset % block_size)),
        }
    }

    fn runs(&self, handle: Handle, offset: usize, len: usize) -> Result<Vec<Run>, AllocError> {
        self.check_range(handle, offset, len)?;
        let block_size = self.blocks.block_size();
        let mut runs = Vec::new();
        let mut at = offset;
        let end = offset + len;
        while at < end {
            let (block, start) = self.locate(handle, at)?;
            let n = (block_size - start).min(end - at);
            runs.push(Run { block, start, len: n });
            at += n;
        }
        Ok(runs)
    }

    fn format_node(&self, node: u32, out: &mut String) {
        out.push_str(&format!("#{node}({})[", self.count(node)));
        for (j, child) in self.children(node).into_iter().enumerate() {
            if j > 0 {
                out.push_str(", ");
            }
            match child {
                Target::Block(id) => out.push_str(&format!("#{id}")),
                Target::Index(nested) => self.format_node(nested, out),
            }
        }
        out.push(']');
    }
}

#[inline]
fn take(fresh: &mut Vec<u32>) -> u32 {
    fresh.pop().expect("fewer blocks claimed than the tree shape requires")
}

impl<B: BlockSource> WordAllocator for TreeAllocator<B> {
    #[instrument(level = "debug", skip(self), ret(level = Level::TRACE), err(level = Level::DEBUG))]
    fn malloc(&mut self, size: usize) -> Result<Handle, AllocError> {
        let n = self.data_blocks_needed(size);
        if n == 1 {
            return self.blocks.claim_block().map(Handle::direct);
        }
        self.admit(0, n)?;
        self.build(n).map(Handle::indirect)
    }

    #[instrument(level = "debug", skip(self), ret(level = Level::TRACE), err(level = Level::DEBUG))]
    fn realloc(&mut self, handle: Handle, new_size: usize) -> Result<Handle, AllocError> {
        let target = self.data_blocks_needed(new_size);
        match handle.target() {
            Target::Block(id) => {
                if target == 1 {
                    return Ok(handle);
                }
                self.admit(1, target)?;
                let root = Claim::new(&mut self.blocks).take(1)?.commit()[0];
                self.reset_node(root, 1);
                self.set_slot(root, 0, id as Word);
                if let Err(e) = self.grow_to(root, 1, target) {
                    self.collapse(root);
                    return Err(e);
                }
                debug!(block = id, root, blocks = target, "Moved block under an index.");
                Ok(Handle::indirect(root))
            }
            Target::Index(root) => {
                let n = self.count(root);
                if target > n {
                    self.admit(n, target)?;
                    self.grow_to(root, n, target)?;
                    Ok(handle)
                } else if target >= 2 {
                    self.shrink_to(root, n, target);
                    Ok(handle)
                } else {
                    self.shrink_to(root, n, 2);
                    debug!(root, "Collapsing tree into a single block.");
                    Ok(Handle::direct(self.collapse(root)))
                }
            }
        }
    }

    #[instrument(level = "debug", skip(self))]
    fn free(&mut self, handle: Handle) {
        match handle.target() {
            Target::Block(id) => self.blocks.release_block(id),
            Target::Index(root) => self.free_node(root),
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
        let block_size = self.blocks.block_size();
        match handle.target() {
            Target::Block(_) => block_size,
            Target::Index(root) => self.count(root) * block_size,
        }
    }

    fn initialize(&mut self, handle: Handle) {
        match handle.target() {
            Target::Block(id) => self.blocks.initialize_block(id),
            Target::Index(root) => {
                let mut ids = Vec::new();
                self.collect_data_blocks(root, &mut ids);
                for id in ids {
                    self.blocks.initialize_block(id);
                }
            }
        }
    }

    fn dump(&self, handle: Handle) -> Result<String, AllocError> {
        if !self.blocks.is_debug() {
            return Err(AllocError::DebugDisabled);
        }
        let mut out = String::new();
        match handle.target() {
            Target::Block(id) => out.push_str(&format!("#{id}")),
            Target::Index(root) => self.format_node(root, &mut out),
        }
        Ok(out)
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
