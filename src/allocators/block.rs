//! The fixed-size [`BlockAllocator`].
//!
//! The store is partitioned into blocks of `block_size` words and free blocks are
//! recycled through an intrusive [`Freelist`]. Block 0 is provisioned but never handed
//! out, which is what makes `0` and `-1` usable as sentinels everywhere else.
//!
//! The allocator is generic over its [`Backing`], the single segment [`FlatStore`] by
//! default. [`BigBlockAllocator`](super::BigBlockAllocator) is the same allocator over
//! a segmented store.

use bit_field::BitArray;
use tracing::{debug, instrument, warn, Level};

use super::{BlockSource, WordAllocator};
use crate::config::AllocatorConfig;
use crate::error::AllocError;
use crate::freelist::Freelist;
use crate::growth::Growth;
use crate::handle::{Handle, Target};
use crate::init::Initializer;
use crate::store::{Backing, FlatStore, WORD_BYTES};
use crate::util::ceil_div;
use crate::Word;

/// Hands out single blocks of a fixed size.
///
/// ```
/// use word_malloc::{AllocatorConfig, BlockAllocator, WordAllocator};
///
/// let mut blocks = BlockAllocator::new(AllocatorConfig::new(4, 2)).unwrap();
/// let a = blocks.malloc(4).unwrap();
/// blocks.set_word(a, 3, 42).unwrap();
/// assert_eq!(blocks.get_word(a, 3), Ok(42));
/// blocks.free(a);
/// assert_eq!(blocks.used_blocks(), 0);
/// ```
#[derive(Debug)]
pub struct BlockAllocator<S: Backing = FlatStore> {
    store: S,
    freelist: Freelist,
    /// One bit per provisioned block, set while the block is handed out.
    live: Vec<u64>,
    used: usize,
    growth: Growth,
    /// Most usable blocks growth may reach.
    limit: usize,
    initializer: Initializer,
    debug: bool,
}

impl BlockAllocator<FlatStore> {
    /// Creates an allocator with `config.blocks` usable blocks in one segment.
    pub fn new(config: AllocatorConfig) -> Result<Self, AllocError> {
        config.validate()?;
        let store = FlatStore::new(config.block_size, config.blocks + 1)?;
        Ok(BlockAllocator::with_store(store, config))
    }
}

impl<S: Backing> BlockAllocator<S> {
    /// Builds the allocator over an already provisioned store.
    pub(crate) fn with_store(store: S, config: AllocatorConfig) -> Self {
        debug_assert_eq!(store.block_size(), config.block_size);
        let live = vec![0; ceil_div(store.blocks(), 64)];
        BlockAllocator {
            store,
            freelist: Freelist::new(),
            live,
            used: 0,
            growth: config.growth,
            limit: config.block_limit,
            initializer: config.initializer,
            debug: config.debug,
        }
    }

    /// Takes one block and returns it as a direct handle.
    pub fn malloc_block(&mut self) -> Result<Handle, AllocError> {
        self.claim().map(Handle::direct)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn growth(&self) -> Growth {
        self.growth
    }

    /// Returns whether `id` is currently handed out.
    pub fn is_live(&self, id: u32) -> bool {
        (id as usize) < self.store.blocks() && self.live.get_bit(id as usize)
    }

    #[instrument(level = "trace", skip(self), ret(level = Level::TRACE), err(level = Level::DEBUG))]
    fn claim(&mut self) -> Result<u32, AllocError> {
        let id = match self.freelist.take(&self.store) {
            Some(id) => id,
            None => {
                self.grow()?;
                self.freelist.take(&self.store).ok_or(AllocError::OutOfMemory)?
            }
        };
        debug_assert!(!self.live.get_bit(id as usize), "Free list handed out live block {id}.");
        self.live.set_bit(id as usize, true);
        self.used += 1;
        self.initializer.apply(self.store.block_mut(id));
        Ok(id)
    }

    fn release(&mut self, id: u32) {
        assert!(id != 0, "freed the reserved block 0");
        assert!(self.is_live(id), "freed block {id} which is not allocated");
        self.live.set_bit(id as usize, false);
        self.freelist.push_front(&mut self.store, id);
        self.used -= 1;
    }

    /// Enlarges the store according to the growth policy. All-or-nothing.
    #[instrument(level = "debug", skip(self), err(level = Level::DEBUG))]
    fn grow(&mut self) -> Result<(), AllocError> {
        let current = self.store.blocks() - 1;
        let limit = self.limit.min(self.store.max_blocks() - 1);
        let Some(target) = self.growth.next_capacity(current, limit) else {
            warn!(blocks = current, growth = ?self.growth, "Block store exhausted.");
            return Err(AllocError::OutOfMemory);
        };
        self.store.grow_to(target + 1)?;
        self.live.resize(ceil_div(target + 1, 64), 0);
        debug!(from = current, to = target, "Grew block store.");
        Ok(())
    }

    /// Decodes a handle this allocator issued.
    #[inline]
    fn id_of(&self, handle: Handle) -> u32 {
        let Target::Block(id) = handle.target() else {
            panic!("block allocators only issue direct handles, got {handle}");
        };
        assert!(self.is_live(id), "used handle {handle} which is not allocated");
        id
    }

    #[inline]
    fn check_offset(&self, offset: usize) -> Result<(), AllocError> {
        let capacity = self.store.block_size();
        if offset < capacity {
            Ok(())
        } else {
            Err(AllocError::OutOfBounds { offset, capacity })
        }
    }
}

impl<S: Backing> BlockSource for BlockAllocator<S> {
    #[inline]
    fn claim_block(&mut self) -> Result<u32, AllocError> {
        self.claim()
    }

    fn claimable_blocks(&self) -> usize {
        let headroom = match self.growth {
            Growth::Disabled => 0,
            Growth::Factor(_) => {
                let limit = self.limit.min(self.store.max_blocks() - 1);
                limit.saturating_sub(self.store.blocks() - 1)
            }
        };
        self.free_blocks() + headroom
    }

    #[inline]
    fn release_block(&mut self, id: u32) {
        self.release(id)
    }

    #[inline]
    fn block(&self, id: u32) -> &[Word] {
        debug_assert!(self.is_live(id));
        self.store.block(id)
    }

    #[inline]
    fn block_mut(&mut self, id: u32) -> &mut [Word] {
        debug_assert!(self.is_live(id));
        self.store.block_mut(id)
    }

    fn copy_words(&mut self, src: u32, src_offset: usize, dst: u32, dst_offset: usize, len: usize) {
        self.store.copy_words(src, src_offset, dst, dst_offset, len)
    }

    fn initialize_block(&mut self, id: u32) {
        self.initializer.apply(self.store.block_mut(id))
    }

    fn is_debug(&self) -> bool {
        self.debug
    }
}

impl<S: Backing> WordAllocator for BlockAllocator<S> {
    #[instrument(level = "debug", skip(self), ret(level = Level::TRACE), err(level = Level::DEBUG))]
    fn malloc(&mut self, size: usize) -> Result<Handle, AllocError> {
        let limit = self.store.block_size();
        if size > limit {
            return Err(AllocError::TooLarge { requested: size, limit });
        }
        self.malloc_block()
    }

    fn realloc(&mut self, handle: Handle, new_size: usize) -> Result<Handle, AllocError> {
        self.id_of(handle);
        let limit = self.store.block_size();
        if new_size > limit {
            return Err(AllocError::TooLarge { requested: new_size, limit });
        }
        Ok(handle)
    }

    #[instrument(level = "debug", skip(self))]
    fn free(&mut self, handle: Handle) {
        let id = self.id_of(handle);
        self.release(id);
    }

    #[inline]
    fn get_word(&self, handle: Handle, offset: usize) -> Result<Word, AllocError> {
        let id = self.id_of(handle);
        self.check_offset(offset)?;
        Ok(self.store.block(id)[offset])
    }

    #[inline]
    fn set_word(&mut self, handle: Handle, offset: usize, value: Word) -> Result<(), AllocError> {
        let id = self.id_of(handle);
        self.check_offset(offset)?;
        self.store.block_mut(id)[offset] = value;
        Ok(())
    }

    fn maximum_capacity_for(&self, handle: Handle) -> usize {
        self.id_of(handle);
        self.store.block_size()
    }

    fn initialize(&mut self, handle: Handle) {
        let id = self.id_of(handle);
        self.initialize_block(id);
    }

    fn dump(&self, handle: Handle) -> Result<String, AllocError> {
        if !self.debug {
            return Err(AllocError::DebugDisabled);
        }
        let id = self.id_of(handle);
        Ok(format!("#{id}"))
    }

    fn block_size(&self) -> usize {
        self.store.block_size()
    }

    fn used_blocks(&self) -> usize {
        self.used
    }

    fn free_blocks(&self) -> usize {
        self.freelist.free_count(self.store.blocks())
    }

    fn max_blocks(&self) -> usize {
        self.store.blocks() - 1
    }

    fn compute_memory_usage(&self) -> usize {
        self.store.reserved_words() * WORD_BYTES
    }

    fn clear(&mut self) {
        self.freelist.reset();
        self.live.fill(0);
        self.used = 0;
    }

    fn get_words(&self, handle: Handle, offset: usize, buf: &mut [Word]) -> Result<(), AllocError> {
        let id = self.id_of(handle);
        self.check_range(handle, offset, buf.len())?;
        buf.copy_from_slice(&self.store.block(id)[offset..offset + buf.len()]);
        Ok(())
    }

    fn set_words(&mut self, handle: Handle, offset: usize, buf: &[Word]) -> Result<(), AllocError> {
        let id = self.id_of(handle);
        self.check_range(handle, offset, buf.len())?;
        self.store.block_mut(id)[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}
