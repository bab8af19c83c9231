//! Block [`Initializer`] strategies.

use std::sync::Arc;

use crate::Word;

/// Sets the starting content of blocks handed out by an allocator.
///
/// The initializer runs on every block a block-level `malloc` returns, whether the
/// block was freshly minted or recycled from the free list, and again whenever
/// `initialize(handle)` is called.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Initializer {
    /// Leave whatever the block last held (including free-list links).
    Keep,
    /// Fill the block with zeroes.
    #[default]
    Zero,
    /// Fill the block with a fixed word.
    Fill(Word),
    /// Copy a prototype block. Its length must equal the block size.
    Prototype(Arc<[Word]>),
}

impl Initializer {
    /// Applies the strategy to a block's words.
    #[inline]
    pub fn apply(&self, block: &mut [Word]) {
        match self {
            Initializer::Keep => {}
            Initializer::Zero => block.fill(0),
            Initializer::Fill(w) => block.fill(*w),
            Initializer::Prototype(p) => block.copy_from_slice(&p[..block.len()]),
        }
    }

    pub(crate) fn prototype_len(&self) -> Option<usize> {
        match self {
            Initializer::Prototype(p) => Some(p.len()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies() {
        let mut block = [7; 4];
        Initializer::Keep.apply(&mut block);
        assert_eq!(block, [7; 4]);
        Initializer::Fill(-3).apply(&mut block);
        assert_eq!(block, [-3; 4]);
        Initializer::Prototype(Arc::from([1, 2, 3, 4])).apply(&mut block);
        assert_eq!(block, [1, 2, 3, 4]);
        Initializer::Zero.apply(&mut block);
        assert_eq!(block, [0; 4]);
    }
}
