//! [`AllocatorConfig`], the construction parameters shared by every allocator.

use crate::error::AllocError;
use crate::growth::Growth;
use crate::init::Initializer;
use crate::Word;

/// Largest number of usable blocks any allocator will manage.
///
/// Block ids have to fit in the non-negative half of a [`Handle`](crate::Handle).
pub const MAX_BLOCK_LIMIT: usize = Word::MAX as usize - 1;

/// Construction parameters of an allocator.
///
/// ```
/// use word_malloc::{AllocatorConfig, Initializer};
///
/// let config = AllocatorConfig::new(8, 64)
///     .growth_factor(2.0)
///     .unwrap()
///     .initializer(Initializer::Fill(-1))
///     .debug(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct AllocatorConfig {
    pub(crate) block_size: usize,
    pub(crate) blocks: usize,
    pub(crate) growth: Growth,
    pub(crate) debug: bool,
    pub(crate) initializer: Initializer,
    pub(crate) block_limit: usize,
}

impl AllocatorConfig {
    /// `block_size` words per block, `blocks` usable blocks up front.
    /// Growth is disabled until configured.
    pub fn new(block_size: usize, blocks: usize) -> Self {
        AllocatorConfig {
            block_size,
            blocks,
            growth: Growth::Disabled,
            debug: false,
            initializer: Initializer::default(),
            block_limit: MAX_BLOCK_LIMIT,
        }
    }

    /// Sets the growth policy from a raw factor, `0` disables growth.
    pub fn growth_factor(mut self, factor: f64) -> Result<Self, AllocError> {
        self.growth = Growth::from_factor(factor)?;
        Ok(self)
    }

    pub fn growth(mut self, growth: Growth) -> Self {
        self.growth = growth;
        self
    }

    /// Enables structural dumps.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn initializer(mut self, initializer: Initializer) -> Self {
        self.initializer = initializer;
        self
    }

    /// Caps the number of usable blocks growth may reach.
    pub fn block_limit(mut self, limit: usize) -> Self {
        self.block_limit = limit.min(MAX_BLOCK_LIMIT);
        self
    }

    pub fn block_size_words(&self) -> usize {
        self.block_size
    }

    pub fn initial_blocks(&self) -> usize {
        self.blocks
    }

    pub fn growth_policy(&self) -> Growth {
        self.growth
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn limit(&self) -> usize {
        self.block_limit
    }

    /// Rejects configurations no allocator can run with.
    pub fn validate(&self) -> Result<(), AllocError> {
        self.validate_min_block_size(1)
    }

    /// Same as [`validate`](Self::validate) with a per-allocator lower bound on the block size.
    pub(crate) fn validate_min_block_size(&self, min: usize) -> Result<(), AllocError> {
        if self.block_size < min {
            return Err(AllocError::IllegalConfig(format!(
                "block size must be at least {min}, got {}",
                self.block_size
            )));
        }
        if self.blocks == 0 {
            return Err(AllocError::IllegalConfig(
                "block count must be positive".to_string(),
            ));
        }
        if self.blocks > self.block_limit {
            return Err(AllocError::IllegalConfig(format!(
                "block count {} exceeds the block limit {}",
                self.blocks, self.block_limit
            )));
        }
        self.growth.validate()?;
        match self.initializer.prototype_len() {
            Some(len) if len != self.block_size => Err(AllocError::IllegalConfig(format!(
                "prototype has {len} words but blocks have {}",
                self.block_size
            ))),
            _ => Ok(()),
        }
    }
}
