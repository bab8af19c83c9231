//! Defines the [`Freelist`] struct and associated constants.

use crate::store::Backing;
use crate::Word;

/// Link value terminating the list.
pub const NIL: Word = -1;

/// An intrusive singly linked list of free block ids.
///
/// The link to the next free block lives in word 0 of each free block, so the list
/// costs no memory besides its head. Blocks at or above the `watermark` have never
/// been handed out and are not threaded at all, they are minted on demand instead.
/// This keeps construction and growth O(1) in the number of new blocks.
#[derive(Debug, Clone)]
pub struct Freelist {
    head: Word,
    len: usize,
    watermark: u32,
}

impl Freelist {
    /// Creates an empty list. Block 0 is never minted.
    #[inline]
    pub const fn new() -> Self {
        Freelist { head: NIL, len: 0, watermark: 1 }
    }

    /// Pushes `id` to the front of the list by overwriting its first word.
    /// This operation has a time complexity of *O*(1).
    #[inline]
    pub fn push_front<B: Backing + ?Sized>(&mut self, store: &mut B, id: u32) {
        debug_assert!(id != 0 && id < self.watermark);
        store.block_mut(id)[0] = self.head;
        self.head = id as Word;
        self.len += 1;
    }

    /// Removes and returns the front of the list, or `None` if the list is empty.
    /// This operation has a time complexity of *O*(1).
    #[inline]
    pub fn pop_front<B: Backing + ?Sized>(&mut self, store: &B) -> Option<u32> {
        if self.head == NIL {
            return None;
        }
        let id = self.head as u32;
        self.head = store.block(id)[0];
        self.len -= 1;
        Some(id)
    }

    /// Returns a free block id, recycling before minting.
    /// `None` means all `capacity` blocks of the store are in use.
    #[inline]
    pub fn take<B: Backing + ?Sized>(&mut self, store: &B) -> Option<u32> {
        if let Some(id) = self.pop_front(store) {
            return Some(id);
        }
        if (self.watermark as usize) < store.blocks() {
            let id = self.watermark;
            self.watermark += 1;
            return Some(id);
        }
        None
    }

    /// Number of blocks that could still be taken from a store with `capacity` blocks.
    #[inline]
    pub fn free_count(&self, capacity: usize) -> usize {
        self.len + capacity.saturating_sub(self.watermark as usize)
    }

    /// Returns the head of the list or `None` if the list is empty.
    #[cfg(test)]
    pub fn head(&self) -> Option<u32> {
        (self.head != NIL).then_some(self.head as u32)
    }

    /// Next id that would be minted.
    #[cfg(test)]
    pub fn watermark(&self) -> u32 {
        self.watermark
    }

    /// Forgets every block, making all of them mintable again.
    pub fn reset(&mut self) {
        *self = Freelist::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FlatStore;

    #[test]
    fn test_1() {
        assert!(Freelist::new().head().is_none(), "List should be empty");
        assert_eq!(Freelist::new().watermark(), 1);
    }

    #[test]
    fn test_2() {
        let mut store = FlatStore::new(2, 1001).unwrap();
        let mut list = Freelist::new();
        let count = 1000;

        for i in 1..=count {
            assert_eq!(list.take(&store), Some(i));
        }
        assert_eq!(list.take(&store), None);

        for i in 1..=count {
            list.push_front(&mut store, i);
        }

        for i in (1..=count).rev() {
            assert_eq!(list.head(), Some(i), "The list head should be {i}.");
            assert_eq!(list.pop_front(&store), Some(i));
        }
        assert!(list.head().is_none());
    }

    #[test]
    fn test_3() {
        let mut store = FlatStore::new(1, 6).unwrap();
        let mut list = Freelist::new();

        let a = list.take(&store).unwrap();
        let b = list.take(&store).unwrap();
        assert_eq!(list.free_count(store.blocks()), 3);

        list.push_front(&mut store, a);
        list.push_front(&mut store, b);
        assert_eq!(list.free_count(store.blocks()), 5);
        assert_eq!(store.block(b)[0], a as Word);
        assert_eq!(store.block(a)[0], NIL);

        // Recycled blocks come first, then minting resumes.
        assert_eq!(list.take(&store), Some(b));
        assert_eq!(list.take(&store), Some(a));
        assert_eq!(list.take(&store), Some(3));
    }

    #[test]
    fn test_4() {
        let mut store = FlatStore::new(1, 3).unwrap();
        let mut list = Freelist::new();
        while list.take(&store).is_some() {}
        store.grow_to(5).unwrap();
        assert_eq!(list.take(&store), Some(3));
        assert_eq!(list.take(&store), Some(4));
        list.reset();
        assert_eq!(list.free_count(store.blocks()), 4);
    }
}
