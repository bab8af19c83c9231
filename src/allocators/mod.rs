//! The allocator implementations and the contract they share.
//!
//! Every allocator implements [`WordAllocator`], which is all a container built on
//! top of this crate ever needs. The variable-size allocators ([`ChainedAllocator`]
//! and [`TreeAllocator`]) are generic over a [`BlockSource`], which both
//! [`BlockAllocator`] and [`BigBlockAllocator`] implement.

use crate::error::AllocError;
use crate::handle::Handle;
use crate::util::{
    ceil_div, join_long, lower_short, split_long, upper_short, with_lower_short, with_upper_short,
};
use crate::Word;

pub mod big_block;
pub mod block;
pub mod chained;
mod claim;
pub mod shared;
pub mod size_class;
pub mod tree;

pub use big_block::{BigBlockAllocator, SegmentedStore};
pub use block::BlockAllocator;
pub use chained::ChainedAllocator;
pub use shared::SharedAllocator;
pub use size_class::SizeClassAllocator;
pub use tree::TreeAllocator;

/// A snapshot of an allocator's block accounting.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AllocatorStats {
    pub block_size: usize,
    pub used_blocks: usize,
    pub free_blocks: usize,
    pub max_blocks: usize,
    pub memory_usage: usize,
}

/// The uniform allocation contract.
///
/// Handles are only meaningful to the allocator that issued them. Passing a sentinel
/// handle, a freed handle or a foreign handle to any method is a programming error
/// and panics where it can be detected.
pub trait WordAllocator {
    /// Allocates room for at least `size` words.
    fn malloc(&mut self, size: usize) -> Result<Handle, AllocError>;

    /// Resizes an allocation, possibly returning a different handle.
    ///
    /// On error the allocation behind `handle` is left exactly as it was.
    fn realloc(&mut self, handle: Handle, new_size: usize) -> Result<Handle, AllocError>;

    /// Returns every block of the allocation to the allocator.
    fn free(&mut self, handle: Handle);

    fn get_word(&self, handle: Handle, offset: usize) -> Result<Word, AllocError>;

    fn set_word(&mut self, handle: Handle, offset: usize, value: Word) -> Result<(), AllocError>;

    /// Upper bound of usable words for the allocation.
    fn maximum_capacity_for(&self, handle: Handle) -> usize;

    /// Runs the configured initializer over every data block of the allocation.
    fn initialize(&mut self, handle: Handle);

    /// Human readable structure of the allocation, made of block ids only.
    /// Fails with [`AllocError::DebugDisabled`] unless the debug flag is set.
    fn dump(&self, handle: Handle) -> Result<String, AllocError>;

    fn block_size(&self) -> usize;

    fn used_blocks(&self) -> usize;

    fn free_blocks(&self) -> usize;

    /// Current number of usable blocks, used or not.
    fn max_blocks(&self) -> usize;

    /// Bytes reserved for the word store, independent of usage.
    fn compute_memory_usage(&self) -> usize;

    /// Frees every allocation at once. Issued handles become invalid.
    fn clear(&mut self);

    fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            block_size: self.block_size(),
            used_blocks: self.used_blocks(),
            free_blocks: self.free_blocks(),
            max_blocks: self.max_blocks(),
            memory_usage: self.compute_memory_usage(),
        }
    }

    /// Fails unless `[offset, offset + len)` lies inside the allocation.
    fn check_range(&self, handle: Handle, offset: usize, len: usize) -> Result<(), AllocError> {
        let capacity = self.maximum_capacity_for(handle);
        match offset.checked_add(len) {
            Some(end) if end <= capacity => Ok(()),
            _ => Err(AllocError::OutOfBounds {
                offset: offset.max(capacity),
                capacity,
            }),
        }
    }

    /// Reads two words as one 64-bit value, high word first.
    fn get_long(&self, handle: Handle, offset: usize) -> Result<i64, AllocError> {
        self.check_range(handle, offset, 2)?;
        let high = self.get_word(handle, offset)?;
        let low = self.get_word(handle, offset + 1)?;
        Ok(join_long(high, low))
    }

    fn set_long(&mut self, handle: Handle, offset: usize, value: i64) -> Result<(), AllocError> {
        self.check_range(handle, offset, 2)?;
        let (high, low) = split_long(value);
        self.set_word(handle, offset, high)?;
        self.set_word(handle, offset + 1, low)
    }

    fn get_float(&self, handle: Handle, offset: usize) -> Result<f32, AllocError> {
        self.get_word(handle, offset).map(|w| f32::from_bits(w as u32))
    }

    fn set_float(&mut self, handle: Handle, offset: usize, value: f32) -> Result<(), AllocError> {
        self.set_word(handle, offset, value.to_bits() as Word)
    }

    fn get_double(&self, handle: Handle, offset: usize) -> Result<f64, AllocError> {
        self.get_long(handle, offset).map(|l| f64::from_bits(l as u64))
    }

    fn set_double(&mut self, handle: Handle, offset: usize, value: f64) -> Result<(), AllocError> {
        self.set_long(handle, offset, value.to_bits() as i64)
    }

    fn get_upper_short(&self, handle: Handle, offset: usize) -> Result<u16, AllocError> {
        self.get_word(handle, offset).map(upper_short)
    }

    fn set_upper_short(&mut self, handle: Handle, offset: usize, value: u16) -> Result<(), AllocError> {
        let word = self.get_word(handle, offset)?;
        self.set_word(handle, offset, with_upper_short(word, value))
    }

    fn get_lower_short(&self, handle: Handle, offset: usize) -> Result<u16, AllocError> {
        self.get_word(handle, offset).map(lower_short)
    }

    fn set_lower_short(&mut self, handle: Handle, offset: usize, value: u16) -> Result<(), AllocError> {
        let word = self.get_word(handle, offset)?;
        self.set_word(handle, offset, with_lower_short(word, value))
    }

    /// Fills `buf` with the words starting at `offset`.
    fn get_words(&self, handle: Handle, offset: usize, buf: &mut [Word]) -> Result<(), AllocError> {
        self.check_range(handle, offset, buf.len())?;
        for (i, w) in buf.iter_mut().enumerate() {
            *w = self.get_word(handle, offset + i)?;
        }
        Ok(())
    }

    /// Writes `buf` starting at `offset`. Nothing is written if the range is out of bounds.
    fn set_words(&mut self, handle: Handle, offset: usize, buf: &[Word]) -> Result<(), AllocError> {
        self.check_range(handle, offset, buf.len())?;
        for (i, w) in buf.iter().enumerate() {
            self.set_word(handle, offset + i, *w)?;
        }
        Ok(())
    }

    /// Reads `out.len()` characters packed two per word, the first one in the upper half.
    fn get_chars(&self, handle: Handle, offset: usize, out: &mut [u16]) -> Result<(), AllocError> {
        let mut words = vec![0; ceil_div(out.len(), 2)];
        self.get_words(handle, offset, &mut words)?;
        for (i, c) in out.iter_mut().enumerate() {
            let word = words[i / 2];
            *c = if i % 2 == 0 { upper_short(word) } else { lower_short(word) };
        }
        Ok(())
    }

    /// Packs `chars` two per word starting at `offset`. An odd trailing character only
    /// replaces the upper half of its word.
    fn set_chars(&mut self, handle: Handle, offset: usize, chars: &[u16]) -> Result<(), AllocError> {
        let len = ceil_div(chars.len(), 2);
        self.check_range(handle, offset, len)?;
        let mut words: Vec<Word> = chars
            .chunks(2)
            .map(|pair| with_lower_short(with_upper_short(0, pair[0]), pair.get(1).copied().unwrap_or(0)))
            .collect();
        if chars.len() % 2 == 1 {
            let last = self.get_word(handle, offset + len - 1)?;
            words[len - 1] = with_upper_short(last, chars[chars.len() - 1]);
        }
        self.set_words(handle, offset, &words)
    }

    /// Sets `len` words starting at `offset` to `value`.
    fn mem_set(&mut self, handle: Handle, offset: usize, len: usize, value: Word) -> Result<(), AllocError> {
        self.check_range(handle, offset, len)?;
        for i in 0..len {
            self.set_word(handle, offset + i, value)?;
        }
        Ok(())
    }

    /// Copies `len` words between two allocations of this allocator (or within one,
    /// overlapping ranges behave like `memmove`).
    fn mem_copy(
        &mut self,
        src: Handle,
        src_offset: usize,
        dst: Handle,
        dst_offset: usize,
        len: usize,
    ) -> Result<(), AllocError> {
        self.check_range(dst, dst_offset, len)?;
        let mut tmp = vec![0; len];
        self.get_words(src, src_offset, &mut tmp)?;
        self.set_words(dst, dst_offset, &tmp)
    }
}

/// Block-level allocation, the layer the variable-size allocators are built on.
///
/// Block ids handed out are never 0. Methods taking an id assume it is live unless
/// stated otherwise. Accounting (`used_blocks`, `max_blocks`, ...) comes from the
/// [`WordAllocator`] supertrait.
pub trait BlockSource: WordAllocator {
    /// Takes one block, growing the store if allowed. The block is initialized.
    fn claim_block(&mut self) -> Result<u32, AllocError>;

    /// Blocks that can still be claimed: the free ones plus what growth may add
    /// before reaching the block limit.
    fn claimable_blocks(&self) -> usize;

    /// Returns a block to the free list.
    ///
    /// # Panics
    /// Panics if `id` is 0 or not live.
    fn release_block(&mut self, id: u32);

    fn block(&self, id: u32) -> &[Word];

    fn block_mut(&mut self, id: u32) -> &mut [Word];

    /// Copies words between (or within) blocks.
    fn copy_words(&mut self, src: u32, src_offset: usize, dst: u32, dst_offset: usize, len: usize);

    /// Runs the initializer over a block.
    fn initialize_block(&mut self, id: u32);

    fn is_debug(&self) -> bool;
}

/// A contiguous range of words inside one block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Run {
    pub block: u32,
    pub start: usize,
    pub len: usize,
}

pub(crate) fn read_runs<B: BlockSource>(source: &B, runs: &[Run], out: &mut [Word]) {
    let mut at = 0;
    for run in runs {
        out[at..at + run.len].copy_from_slice(&source.block(run.block)[run.start..run.start + run.len]);
        at += run.len;
    }
}

pub(crate) fn write_runs<B: BlockSource>(source: &mut B, runs: &[Run], buf: &[Word]) {
    let mut at = 0;
    for run in runs {
        source.block_mut(run.block)[run.start..run.start + run.len].copy_from_slice(&buf[at..at + run.len]);
        at += run.len;
    }
}

pub(crate) fn fill_runs<B: BlockSource>(source: &mut B, runs: &[Run], value: Word) {
    for run in runs {
        source.block_mut(run.block)[run.start..run.start + run.len].fill(value);
    }
}

#[cfg(test)]
mod tests;
