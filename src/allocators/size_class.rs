//! The [`SizeClassAllocator`]: one [`BlockAllocator`] per registered block size.
//!
//! Handles carry their class in the high bits: with `n` classes the low
//! `32 - ceil(log2(n))` bits hold the block id and the rest hold the class index.
//! Every class gets a block limit low enough for its ids to fit, so a handle never
//! collides with the [`Handle::NULL`] or [`Handle::INVALID`] sentinels.

use tracing::{instrument, Level};

use super::{AllocatorStats, BlockAllocator, BlockSource, WordAllocator};
use crate::config::AllocatorConfig;
use crate::error::AllocError;
use crate::handle::Handle;
use crate::util::ceil_log2;
use crate::Word;

/// Routes each request to the smallest class that can hold it.
///
/// ```
/// use word_malloc::{AllocatorConfig, SizeClassAllocator, WordAllocator};
///
/// let mut classes = SizeClassAllocator::new(vec![
///     AllocatorConfig::new(2, 16),
///     AllocatorConfig::new(8, 16),
/// ])
/// .unwrap();
/// let h = classes.malloc(5).unwrap();
/// assert_eq!(classes.maximum_capacity_for(h), 8);
/// ```
#[derive(Debug)]
pub struct SizeClassAllocator {
    /// Sorted by block size, no duplicates.
    classes: Vec<BlockAllocator>,
    allocation_bits: u32,
}

impl SizeClassAllocator {
    /// Creates one block allocator per configuration. Order does not matter.
    pub fn new(mut configs: Vec<AllocatorConfig>) -> Result<Self, AllocError> {
        if configs.is_empty() {
            return Err(AllocError::IllegalConfig(
                "at least one size class is required".to_string(),
            ));
        }
        configs.sort_by_key(|c| c.block_size);
        if let Some(pair) = configs.windows(2).find(|w| w[0].block_size == w[1].block_size) {
            return Err(AllocError::IllegalConfig(format!(
                "size class {} registered twice",
                pair[0].block_size
            )));
        }

        let allocation_bits = Word::BITS - ceil_log2(configs.len());
        // Ids up to 2^bits - 2 keep the all-ones id, and with it -1, unused.
        let id_limit = ((1_u64 << allocation_bits) - 2) as usize;
        let classes = configs
            .into_iter()
            .map(|config| {
                let limit = config.block_limit.min(id_limit);
                BlockAllocator::new(config.block_limit(limit))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SizeClassAllocator {
            classes,
            allocation_bits,
        })
    }

    /// Same settings for every class, only the block size differs.
    pub fn from_template(sizes: &[usize], template: &AllocatorConfig) -> Result<Self, AllocError> {
        let configs = sizes
            .iter()
            .map(|&block_size| AllocatorConfig {
                block_size,
                ..template.clone()
            })
            .collect();
        SizeClassAllocator::new(configs)
    }

    /// Registered block sizes, ascending.
    pub fn class_sizes(&self) -> impl Iterator<Item = usize> + '_ {
        self.classes.iter().map(WordAllocator::block_size)
    }

    /// Per-class snapshot, ascending by block size.
    pub fn class_stats(&self) -> Vec<AllocatorStats> {
        self.classes.iter().map(WordAllocator::stats).collect()
    }

    /// Bits of a handle holding the block id.
    pub fn allocation_bits(&self) -> u32 {
        self.allocation_bits
    }

    /// Index of the smallest class holding at least `size` words.
    pub fn class_for(&self, size: usize) -> Option<usize> {
        let i = self.classes.partition_point(|c| c.block_size() < size);
        (i < self.classes.len()).then_some(i)
    }

    fn encode(&self, class: usize, id: u32) -> Handle {
        let raw = if self.allocation_bits == Word::BITS {
            id as u64
        } else {
            ((class as u64) << self.allocation_bits) | id as u64
        };
        Handle::from_raw(raw as u32 as Word)
    }

    fn decode(&self, handle: Handle) -> (usize, u32) {
        assert!(!handle.is_sentinel(), "sentinel handle {handle} passed to a size-class allocator");
        let raw = handle.raw() as u32;
        if self.allocation_bits == Word::BITS {
            return (0, raw);
        }
        let class = (raw >> self.allocation_bits) as usize;
        let id = raw & ((1_u32 << self.allocation_bits) - 1);
        assert!(class < self.classes.len(), "handle {handle} names no size class");
        (class, id)
    }

    fn route(&self, handle: Handle) -> (&BlockAllocator, Handle) {
        let (class, id) = self.decode(handle);
        (&self.classes[class], Handle::direct(id))
    }

    fn route_mut(&mut self, handle: Handle) -> (&mut BlockAllocator, Handle) {
        let (class, id) = self.decode(handle);
        (&mut self.classes[class], Handle::direct(id))
    }
}

impl WordAllocator for SizeClassAllocator {
    #[instrument(level = "debug", skip(self), ret(level = Level::TRACE), err(level = Level::DEBUG))]
    fn malloc(&mut self, size: usize) -> Result<Handle, AllocError> {
        let Some(class) = self.class_for(size) else {
            return Err(AllocError::TooLarge {
                requested: size,
                limit: self.block_size(),
            });
        };
        let id = self.classes[class].claim_block()?;
        Ok(self.encode(class, id))
    }

    fn realloc(&mut self, _handle: Handle, _new_size: usize) -> Result<Handle, AllocError> {
        Err(AllocError::Unsupported("realloc on a size-class allocator"))
    }

    #[instrument(level = "debug", skip(self))]
    fn free(&mut self, handle: Handle) {
        let (class, id) = self.decode(handle);
        self.classes[class].release_block(id);
    }

    fn get_word(&self, handle: Handle, offset: usize) -> Result<Word, AllocError> {
        let (class, direct) = self.route(handle);
        class.get_word(direct, offset)
    }

    fn set_word(&mut self, handle: Handle, offset: usize, value: Word) -> Result<(), AllocError> {
        let (class, direct) = self.route_mut(handle);
        class.set_word(direct, offset, value)
    }

    fn maximum_capacity_for(&self, handle: Handle) -> usize {
        let (class, _) = self.route(handle);
        class.block_size()
    }

    fn initialize(&mut self, handle: Handle) {
        let (class, direct) = self.route_mut(handle);
        class.initialize(direct)
    }

    fn dump(&self, handle: Handle) -> Result<String, AllocError> {
        let (class, direct) = self.route(handle);
        Ok(format!("class({})[{}]", class.block_size(), class.dump(direct)?))
    }

    /// The largest class.
    fn block_size(&self) -> usize {
        self.classes.last().map_or(0, WordAllocator::block_size)
    }

    fn used_blocks(&self) -> usize {
        self.classes.iter().map(WordAllocator::used_blocks).sum()
    }

    fn free_blocks(&self) -> usize {
        self.classes.iter().map(WordAllocator::free_blocks).sum()
    }

    fn max_blocks(&self) -> usize {
        self.classes.iter().map(WordAllocator::max_blocks).sum()
    }

    fn compute_memory_usage(&self) -> usize {
        self.classes.iter().map(WordAllocator::compute_memory_usage).sum()
    }

    fn clear(&mut self) {
        self.classes.iter_mut().for_each(WordAllocator::clear)
    }

    fn get_words(&self, handle: Handle, offset: usize, buf: &mut [Word]) -> Result<(), AllocError> {
        let (class, direct) = self.route(handle);
        class.get_words(direct, offset, buf)
    }

    fn set_words(&mut self, handle: Handle, offset: usize, buf: &[Word]) -> Result<(), AllocError> {
        let (class, direct) = self.route_mut(handle);
        class.set_words(direct, offset, buf)
    }
}
