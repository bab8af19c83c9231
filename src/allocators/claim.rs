//! [`Claim`], a scope guard for multi-block requests.

use tracing::{debug, warn};

use super::BlockSource;
use crate::error::AllocError;

/// Blocks claimed on behalf of one request.
///
/// Unless [`commit`](Claim::commit) is called, every claimed block goes back to the
/// source when the guard is dropped, in reverse order so the free list ends up as it
/// was before the request. Multi-block operations claim everything they need up front
/// and only then touch existing structures, which makes them all-or-nothing.
///
/// A request larger than [`claimable_blocks`](BlockSource::claimable_blocks) fails
/// before anything is claimed, so it cannot grow the store either.
pub(crate) struct Claim<'a, B: BlockSource + ?Sized> {
    source: &'a mut B,
    ids: Vec<u32>,
}

impl<'a, B: BlockSource + ?Sized> Claim<'a, B> {
    pub fn new(source: &'a mut B) -> Self {
        Claim { source, ids: Vec::new() }
    }

    /// Claims `count` blocks or none at all.
    pub fn take(mut self, count: usize) -> Result<Self, AllocError> {
        let available = self.source.claimable_blocks();
        if count > available {
            debug!(count, available, "Request exceeds the claimable blocks.");
            return Err(AllocError::OutOfMemory);
        }
        self.ids.try_reserve_exact(count).map_err(|_| AllocError::OutOfMemory)?;
        for _ in 0..count {
            let id = self.source.claim_block()?;
            self.ids.push(id);
        }
        Ok(self)
    }

    /// Keeps the claimed blocks, returning their ids in claim order.
    pub fn commit(mut self) -> Vec<u32> {
        std::mem::take(&mut self.ids)
    }
}

impl<B: BlockSource + ?Sized> Drop for Claim<'_, B> {
    fn drop(&mut self) {
        if self.ids.is_empty() {
            return;
        }
        warn!(count = self.ids.len(), "Releasing blocks of a failed request.");
        while let Some(id) = self.ids.pop() {
            self.source.release_block(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::{BlockAllocator, WordAllocator};
    use crate::AllocatorConfig;

    #[test]
    fn failed_claim_releases_everything() {
        let mut blocks = BlockAllocator::new(AllocatorConfig::new(2, 4)).unwrap();
        let kept = Claim::new(&mut blocks).take(1).unwrap().commit();
        assert_eq!(kept.len(), 1);

        assert_eq!(Claim::new(&mut blocks).take(4).err(), Some(AllocError::OutOfMemory));
        assert_eq!(blocks.used_blocks(), 1);
        assert_eq!(blocks.free_blocks(), 3);
    }

    #[test]
    fn dropped_claim_restores_free_list_order() {
        let mut blocks = BlockAllocator::new(AllocatorConfig::new(2, 4)).unwrap();
        let ids = Claim::new(&mut blocks).take(3).unwrap().commit();
        for id in ids.iter().rev() {
            blocks.release_block(*id);
        }
        drop(Claim::new(&mut blocks).take(2).unwrap());
        let again = Claim::new(&mut blocks).take(2).unwrap().commit();
        assert_eq!(again, ids[..2]);
    }

    #[test]
    fn oversized_claim_neither_claims_nor_grows() {
        let config = AllocatorConfig::new(2, 4).growth_factor(2.0).unwrap().block_limit(6);
        let mut blocks = BlockAllocator::new(config).unwrap();
        assert_eq!(blocks.claimable_blocks(), 6);

        assert_eq!(Claim::new(&mut blocks).take(7).err(), Some(AllocError::OutOfMemory));
        assert_eq!(Claim::new(&mut blocks).take(usize::MAX).err(), Some(AllocError::OutOfMemory));
        assert_eq!(blocks.max_blocks(), 4);
        assert_eq!(blocks.free_blocks(), 4);

        let ids = Claim::new(&mut blocks).take(6).unwrap().commit();
        assert_eq!(ids.len(), 6);
        assert_eq!(blocks.max_blocks(), 6);
        assert_eq!(blocks.claimable_blocks(), 0);
    }
}
