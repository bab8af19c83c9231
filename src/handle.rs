//! Defines the [`Handle`] type and its sign encoding.

use static_assertions::assert_eq_size;

use crate::Word;

assert_eq_size!(Handle, Word);

/// An opaque token naming one allocation.
///
/// # Encoding
/// Handles have to fit in a single word so that containers can store them
/// inside other allocations. The sign of the raw value tells the two kinds apart:
/// a non-negative value is the id of the one block holding the allocation,
/// a negative value is the bitwise complement of the id of an index root
/// (a chain head or a tree root) which has to be walked before touching data.
///
/// Block 0 is never handed out by any allocator, so the raw values `0` and `-1`
/// (which is `!0`) never name a live allocation and serve as [`Handle::NULL`] and
/// [`Handle::INVALID`].
///
/// The size-class allocator reuses this type with its own layout
/// (class index in the high bits, see [`SizeClassAllocator`]).
///
/// [`SizeClassAllocator`]: crate::allocators::SizeClassAllocator
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Handle(Word);

/// What a [`Handle`] points at once decoded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// The allocation lives in exactly this block.
    Block(u32),
    /// The allocation is reached through the index root with this id.
    Index(u32),
}

impl Handle {
    pub const NULL: Handle = Handle(0);
    pub const INVALID: Handle = Handle(-1);

    /// Creates a handle addressing a single block.
    #[inline(always)]
    pub fn direct(block: u32) -> Handle {
        debug_assert!(block <= Word::MAX as u32, "block id {block} does not fit a handle");
        Handle(block as Word)
    }

    /// Creates a handle addressing an index root.
    #[inline(always)]
    pub fn indirect(root: u32) -> Handle {
        debug_assert!(root <= Word::MAX as u32, "root id {root} does not fit a handle");
        Handle(!(root as Word))
    }

    /// Reinterprets a raw word (typically read back from an allocation) as a handle.
    #[inline(always)]
    pub const fn from_raw(raw: Word) -> Handle {
        Handle(raw)
    }

    /// Returns the raw word, suitable for storing inside an allocation.
    #[inline(always)]
    pub const fn raw(self) -> Word {
        self.0
    }

    /// Returns whether this is one of the two sentinel values.
    #[inline(always)]
    pub const fn is_sentinel(self) -> bool {
        self.0 == 0 || self.0 == -1
    }

    /// Decodes the handle.
    ///
    /// # Panics
    /// Panics if the handle is a sentinel.
    #[inline]
    pub fn target(self) -> Target {
        assert!(!self.is_sentinel(), "dereferenced sentinel handle {}", self.0);
        if self.0 >= 0 {
            Target::Block(self.0 as u32)
        } else {
            Target::Index(!self.0 as u32)
        }
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            0 => write!(f, "null"),
            -1 => write!(f, "invalid"),
            raw if raw > 0 => write!(f, "#{raw}"),
            raw => write!(f, "~#{}", !raw),
        }
    }
}

/// Encodes a link to a nested index node as stored inside a parent block.
#[inline(always)]
pub(crate) fn encode_index(id: u32) -> Word {
    !(id as Word)
}

/// Decodes a slot written by [`encode_index`] or holding a plain block id.
#[inline(always)]
pub(crate) fn decode_slot(word: Word) -> Target {
    if word >= 0 {
        Target::Block(word as u32)
    } else {
        Target::Index(!word as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_1() {
        let h = Handle::direct(5);
        assert_eq!(h.raw(), 5);
        assert_eq!(h.target(), Target::Block(5));
    }

    #[test]
    fn test_2() {
        let h = Handle::indirect(5);
        assert!(h.raw() < 0);
        assert_eq!(h.target(), Target::Index(5));
        assert_eq!(Handle::from_raw(h.raw()), h);
    }

    #[test]
    fn test_3() {
        assert!(Handle::NULL.is_sentinel());
        assert!(Handle::INVALID.is_sentinel());
        assert_eq!(Handle::indirect(0), Handle::INVALID);
        assert!(!Handle::direct(1).is_sentinel());
        assert!(!Handle::indirect(1).is_sentinel());
    }

    #[test]
    #[should_panic]
    fn test_4() {
        let _ = Handle::NULL.target();
    }

    #[test]
    fn test_5() {
        assert_eq!(decode_slot(encode_index(9)), Target::Index(9));
        assert_eq!(decode_slot(9), Target::Block(9));
        assert_eq!(Handle::indirect(3).to_string(), "~#3");
        assert_eq!(Handle::direct(3).to_string(), "#3");
    }
}
