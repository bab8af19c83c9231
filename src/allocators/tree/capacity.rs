//! Shape arithmetic of index trees, independent of any store.
//!
//! A node covering `n` data blocks has `fanout` slots. It is as shallow as possible:
//! its capacity is the smallest `fanout^d` (with `d >= 1`) not below `n`, and each of
//! its children covers `capacity / fanout` blocks, except the last one which covers
//! what is left. A child covering a single block is stored as a plain data block id,
//! anything bigger is a nested node with the same layout.

use crate::util::ceil_div;

/// Smallest `fanout^d`, `d >= 1`, that is at least `n`.
pub fn maximum_capacity_for_num_blocks(fanout: usize, n: usize) -> usize {
    debug_assert!(fanout >= 2);
    let mut capacity = fanout;
    while capacity < n {
        capacity = capacity.saturating_mul(fanout);
    }
    capacity
}

/// Blocks covered by each (but the last) child of a node covering `n` blocks.
#[inline]
pub fn capacity_per_child(fanout: usize, n: usize) -> usize {
    maximum_capacity_for_num_blocks(fanout, n) / fanout
}

/// Number of data blocks covered by each child of a node covering `n` blocks.
pub fn child_counts(fanout: usize, n: usize) -> impl Iterator<Item = usize> {
    let per_child = capacity_per_child(fanout, n);
    (0..ceil_div(n, per_child)).map(move |j| per_child.min(n - j * per_child))
}

/// Total blocks, data and index, used by an allocation of `n` data blocks.
/// A single block needs no index.
pub fn blocks_for(fanout: usize, n: usize) -> usize {
    if n <= 1 {
        return n;
    }
    let per_child = capacity_per_child(fanout, n);
    let full = n / per_child;
    let rest = n % per_child;
    1 + full * blocks_for(fanout, per_child) + blocks_for(fanout, rest)
}

/// Index levels above the data blocks of an allocation of `n` data blocks.
pub fn depth(fanout: usize, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let mut depth = 1;
    let mut capacity = fanout;
    while capacity < n {
        capacity = capacity.saturating_mul(fanout);
        depth += 1;
    }
    depth
}

/// Blocks an append to a node covering `n` blocks has to claim: 2 when the node or
/// the child receiving the block needs a new index block, 1 otherwise.
pub fn append_cost(fanout: usize, n: usize) -> usize {
    let capacity = maximum_capacity_for_num_blocks(fanout, n);
    if n == capacity {
        return 2;
    }
    let local = n % (capacity / fanout);
    match local {
        0 => 1,
        1 => 2,
        _ => append_cost(fanout, local),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacities() {
        assert_eq!(maximum_capacity_for_num_blocks(3, 1), 3);
        assert_eq!(maximum_capacity_for_num_blocks(3, 3), 3);
        assert_eq!(maximum_capacity_for_num_blocks(3, 4), 9);
        assert_eq!(maximum_capacity_for_num_blocks(3, 10), 27);
        assert_eq!(capacity_per_child(3, 3), 1);
        assert_eq!(capacity_per_child(3, 4), 3);
        assert_eq!(capacity_per_child(2, 5), 4);
    }

    #[test]
    fn children() {
        assert_eq!(child_counts(3, 2).collect::<Vec<_>>(), [1, 1]);
        assert_eq!(child_counts(3, 7).collect::<Vec<_>>(), [3, 3, 1]);
        assert_eq!(child_counts(2, 5).collect::<Vec<_>>(), [4, 1]);
        assert_eq!(child_counts(2, 7).collect::<Vec<_>>(), [4, 3]);
    }

    #[test]
    fn block_totals() {
        assert_eq!(blocks_for(3, 0), 0);
        assert_eq!(blocks_for(3, 1), 1);
        assert_eq!(blocks_for(3, 3), 4);
        // Root over [3, 1]: root + (node + 3) + 1.
        assert_eq!(blocks_for(3, 4), 6);
        // Fanout 2 splits 7 into [4, 3]: root, 7 blocks for the full child, 5 for the rest.
        assert_eq!(blocks_for(2, 7), 1 + 7 + 5);
    }

    #[test]
    fn depths() {
        assert_eq!(depth(3, 1), 0);
        assert_eq!(depth(3, 3), 1);
        assert_eq!(depth(3, 4), 2);
        assert_eq!(depth(3, 27), 3);
        assert_eq!(depth(3, 28), 4);
    }

    #[test]
    fn append_costs_match_block_totals() {
        for fanout in 2..6 {
            for n in 2..200 {
                assert_eq!(
                    blocks_for(fanout, n) + append_cost(fanout, n),
                    blocks_for(fanout, n + 1),
                    "fanout {fanout}, n {n}"
                );
            }
        }
    }
}
