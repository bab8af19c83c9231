//! Utility functions.

use crate::Word;

/// Returns `ceil(x / y)`.
///
/// # Panics
/// Panics if `y` is 0.
#[inline]
pub(crate) fn ceil_div(x: usize, y: usize) -> usize {
    x / y + usize::from(x % y != 0)
}

/// Returns the smallest `b` such that `2^b >= x`, with `ceil_log2(0) == ceil_log2(1) == 0`.
#[inline]
pub(crate) fn ceil_log2(x: usize) -> u32 {
    if x <= 1 {
        0
    } else {
        usize::BITS - (x - 1).leading_zeros()
    }
}

/// Splits a 64-bit value into its (high, low) words.
#[inline(always)]
pub(crate) fn split_long(value: i64) -> (Word, Word) {
    ((value >> 32) as Word, value as Word)
}

/// Inverse of [`split_long`].
#[inline(always)]
pub(crate) fn join_long(high: Word, low: Word) -> i64 {
    ((high as i64) << 32) | (low as u32 as i64)
}

#[inline(always)]
pub(crate) fn upper_short(word: Word) -> u16 {
    (word as u32 >> 16) as u16
}

#[inline(always)]
pub(crate) fn lower_short(word: Word) -> u16 {
    word as u32 as u16
}

#[inline(always)]
pub(crate) fn with_upper_short(word: Word, value: u16) -> Word {
    ((word as u32 & 0x0000_ffff) | ((value as u32) << 16)) as Word
}

#[inline(always)]
pub(crate) fn with_lower_short(word: Word, value: u16) -> Word {
    ((word as u32 & 0xffff_0000) | value as u32) as Word
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_div() {
        assert_eq!(ceil_div(0, 4), 0);
        assert_eq!(ceil_div(1, 4), 1);
        assert_eq!(ceil_div(4, 4), 1);
        assert_eq!(ceil_div(5, 4), 2);
        assert_eq!(ceil_div(12, 4), 3);
    }

    #[test]
    #[should_panic]
    fn test_ceil_div_zero() {
        ceil_div(3, 0);
    }

    #[test]
    fn test_ceil_log2() {
        let expected = [(0, 0), (1, 0), (2, 1), (3, 2), (4, 2), (5, 3), (8, 3), (9, 4)];
        for (x, b) in expected {
            assert_eq!(ceil_log2(x), b, "ceil_log2({x})");
        }
    }

    #[test]
    fn test_long_halves() {
        for v in [0_i64, 1, -1, i64::MAX, i64::MIN, 0x1234_5678_9abc_def0] {
            let (h, l) = split_long(v);
            assert_eq!(join_long(h, l), v);
        }
        assert_eq!(split_long(-1), (-1, -1));
    }

    #[test]
    fn test_shorts() {
        let w = with_lower_short(with_upper_short(0, 0xbeef), 0xcafe);
        assert_eq!(upper_short(w), 0xbeef);
        assert_eq!(lower_short(w), 0xcafe);
        assert_eq!(upper_short(with_lower_short(w, 1)), 0xbeef);
    }
}
