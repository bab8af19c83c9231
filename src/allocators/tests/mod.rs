use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use self::format::init_logging;

use super::*;
use super::tree::capacity::blocks_for;
use crate::{AllocatorConfig, Initializer};


fn config(block_size: usize, blocks: usize) -> AllocatorConfig {
    AllocatorConfig::new(block_size, blocks).debug(true)
}

fn growing(block_size: usize, blocks: usize) -> AllocatorConfig {
    config(block_size, blocks).growth_factor(2.0).unwrap()
}

fn pattern(len: usize, seed: Word) -> Vec<Word> {
    (0..len as Word).map(|i| i.wrapping_mul(7919) ^ seed).collect()
}

fn read(a: &impl WordAllocator, h: Handle, len: usize) -> Vec<Word> {
    let mut buf = vec![0; len];
    a.get_words(h, 0, &mut buf).unwrap();
    buf
}

/// Allocates until exhaustion, checking no handle is a sentinel or handed out twice.
fn exhaust(a: &mut impl WordAllocator, size: usize) -> Vec<Handle> {
    let mut handles = Vec::new();
    loop {
        match a.malloc(size) {
            Ok(h) => {
                assert!(!h.is_sentinel(), "sentinel {h} returned");
                assert!(!handles.contains(&h), "{h} handed out twice");
                handles.push(h);
            }
            Err(AllocError::OutOfMemory) => return handles,
            Err(e) => panic!("unexpected {e}"),
        }
    }
}

fn free_all(a: &mut impl WordAllocator, handles: Vec<Handle>) {
    for h in handles {
        a.free(h);
    }
    assert_eq!(a.used_blocks(), 0);
}

#[test]
fn sentinels_are_never_returned() {
    init_logging();
    let mut block = BlockAllocator::new(config(2, 40)).unwrap();
    let handles = exhaust(&mut block, 2);
    assert_eq!(handles.len(), 40);
    free_all(&mut block, handles);

    let mut big = BigBlockAllocator::with_segments(config(2, 40), 7).unwrap();
    let handles = exhaust(&mut big, 1);
    assert_eq!(handles.len(), 40);
    free_all(&mut big, handles);

    let mut chained = ChainedAllocator::new(config(3, 40)).unwrap();
    let handles = exhaust(&mut chained, 5);
    assert_eq!(handles.len(), 13);
    free_all(&mut chained, handles);

    let mut tree = TreeAllocator::new(config(3, 40)).unwrap();
    let handles = exhaust(&mut tree, 5);
    assert_eq!(handles.len(), 40 / blocks_for(2, 2));
    free_all(&mut tree, handles);

    let mut classes = SizeClassAllocator::new(vec![config(1, 3), config(2, 3)]).unwrap();
    let handles = exhaust(&mut classes, 2);
    assert_eq!(handles.len(), 3);
    free_all(&mut classes, handles);
}

fn bulk_round_trip(a: &mut impl WordAllocator) {
    let bs = a.block_size();
    for len in 1..=4 * bs + 1 {
        let h = a.malloc(len).unwrap();
        assert!(a.maximum_capacity_for(h) >= len);
        let words = pattern(len, len as Word);
        a.set_words(h, 0, &words).unwrap();
        assert_eq!(read(a, h, len), words, "len {len}");
        // Unaligned partial reads agree with word reads.
        if len > 2 {
            let mut mid = vec![0; len - 2];
            a.get_words(h, 1, &mut mid).unwrap();
            assert_eq!(mid, words[1..len - 1]);
        }
        a.free(h);
    }
    assert_eq!(a.used_blocks(), 0);
}

#[test]
fn bulk_round_trips() {
    init_logging();
    bulk_round_trip(&mut ChainedAllocator::new(growing(4, 4)).unwrap());
    bulk_round_trip(&mut TreeAllocator::new(growing(4, 4)).unwrap());
    bulk_round_trip(&mut TreeAllocator::new(growing(3, 4)).unwrap());
    let big = BigBlockAllocator::with_segments(growing(5, 2), 3).unwrap();
    bulk_round_trip(&mut ChainedAllocator::with_source(big).unwrap());
}

fn growth_preserves_content(a: &mut impl WordAllocator, size: usize) {
    let initial = a.max_blocks();
    let mut live = Vec::new();
    for i in 0..40 {
        let h = a.malloc(size).unwrap();
        a.set_words(h, 0, &pattern(size, i)).unwrap();
        live.push(h);
    }
    assert!(a.max_blocks() > initial);
    for (i, h) in live.iter().enumerate() {
        assert_eq!(read(a, *h, size), pattern(size, i as Word));
    }
    assert!(a.compute_memory_usage() >= a.max_blocks() * a.block_size() * 4);
}

#[test]
fn growth_keeps_handles_valid() {
    init_logging();
    growth_preserves_content(&mut BlockAllocator::new(growing(3, 2)).unwrap(), 3);
    growth_preserves_content(&mut BigBlockAllocator::with_segments(growing(3, 2), 5).unwrap(), 3);
    growth_preserves_content(&mut ChainedAllocator::new(growing(3, 2)).unwrap(), 7);
    growth_preserves_content(&mut TreeAllocator::new(growing(3, 2)).unwrap(), 11);
}

#[test]
fn growth_is_capped_by_block_limit() {
    let mut a = BlockAllocator::new(growing(1, 2).block_limit(5)).unwrap();
    let handles = exhaust(&mut a, 1);
    assert_eq!(handles.len(), 5);
    assert_eq!(a.max_blocks(), 5);
}

/// Same realloc sequence on a chain and a tree: same visible content.
#[test]
fn chained_and_tree_agree() {
    init_logging();
    let mut rng = StdRng::seed_from_u64(7);
    let mut chained = ChainedAllocator::new(growing(4, 8)).unwrap();
    let mut tree = TreeAllocator::new(growing(4, 8)).unwrap();
    let mut hc = chained.malloc(1).unwrap();
    let mut ht = tree.malloc(1).unwrap();
    let mut len = 1;

    for step in 0..200 {
        let new_len = rng.gen_range(1..120);
        hc = chained.realloc(hc, new_len).unwrap();
        ht = tree.realloc(ht, new_len).unwrap();
        let known = len.min(new_len);
        assert_eq!(read(&chained, hc, known), read(&tree, ht, known), "step {step}");

        // Words past the old length are unspecified, so the write covers them.
        let offset = rng.gen_range(0..=known);
        let words = pattern(new_len - offset, step);
        chained.set_words(hc, offset, &words).unwrap();
        tree.set_words(ht, offset, &words).unwrap();
        len = new_len;
        assert_eq!(read(&chained, hc, len), read(&tree, ht, len));
    }
    chained.free(hc);
    tree.free(ht);
    assert_eq!(chained.used_blocks() + tree.used_blocks(), 0);
}

fn chars_round_trip(a: &mut impl WordAllocator) {
    let h = a.malloc(8).unwrap();
    a.mem_set(h, 0, 8, -1).unwrap();
    let text: Vec<u16> = "tree!".encode_utf16().collect();
    a.set_chars(h, 1, &text).unwrap();
    let mut out = vec![0; text.len()];
    a.get_chars(h, 1, &mut out).unwrap();
    assert_eq!(out, text);
    // The odd tail keeps the lower half of its word.
    assert_eq!(a.get_lower_short(h, 3), Ok(0xffff));
    assert_eq!(a.get_upper_short(h, 1), Ok('t' as u16));
    assert_eq!(a.get_word(h, 0), Ok(-1));
    assert_eq!(a.get_word(h, 4), Ok(-1));
    a.free(h);
}

#[test]
fn chars_pack_two_per_word() {
    chars_round_trip(&mut BlockAllocator::new(config(8, 2)).unwrap());
    chars_round_trip(&mut ChainedAllocator::new(config(3, 8)).unwrap());
    chars_round_trip(&mut TreeAllocator::new(config(3, 8)).unwrap());
}

fn typed_access(a: &mut impl WordAllocator) {
    let h = a.malloc(6).unwrap();
    a.set_long(h, 1, i64::MIN + 3).unwrap();
    a.set_double(h, 3, -2.5).unwrap();
    a.set_float(h, 5, 0.25).unwrap();
    assert_eq!(a.get_long(h, 1), Ok(i64::MIN + 3));
    assert_eq!(a.get_double(h, 3), Ok(-2.5));
    assert_eq!(a.get_float(h, 5), Ok(0.25));
    assert!(matches!(a.get_long(h, 5), Err(AllocError::OutOfBounds { .. })));
    a.free(h);
}

#[test]
fn typed_values_span_block_boundaries() {
    typed_access(&mut ChainedAllocator::new(config(3, 8)).unwrap());
    typed_access(&mut TreeAllocator::new(config(3, 8)).unwrap());
}

fn overlapping_copy(a: &mut impl WordAllocator) {
    let h = a.malloc(10).unwrap();
    let words = pattern(10, 1);
    a.set_words(h, 0, &words).unwrap();
    a.mem_copy(h, 0, h, 3, 7).unwrap();
    let mut expected = words.clone();
    expected.copy_within(0..7, 3);
    assert_eq!(read(a, h, 10), expected);

    a.set_words(h, 0, &words).unwrap();
    a.mem_copy(h, 3, h, 0, 7).unwrap();
    let mut expected = words;
    expected.copy_within(3..10, 0);
    assert_eq!(read(a, h, 10), expected);
    a.free(h);
}

#[test]
fn mem_copy_handles_overlap() {
    overlapping_copy(&mut ChainedAllocator::new(config(4, 8)).unwrap());
    overlapping_copy(&mut TreeAllocator::new(config(4, 8)).unwrap());
}

#[test]
fn prototype_initializer_reaches_every_data_block() {
    let prototype: std::sync::Arc<[Word]> = vec![9, 8, 7].into();
    let config = config(3, 32).initializer(Initializer::Prototype(prototype));
    let mut tree = TreeAllocator::new(config.clone()).unwrap();
    let h = tree.malloc(12).unwrap();
    assert_eq!(read(&tree, h, 12), [9, 8, 7].repeat(4));

    let mut chained = ChainedAllocator::new(config).unwrap();
    let h = chained.malloc(3).unwrap();
    chained.set_words(h, 0, &[0, 0, 0]).unwrap();
    chained.initialize(h);
    assert_eq!(read(&chained, h, 3), [9, 8, 7]);
}

#[test]
fn stats_snapshot() {
    let mut tree = TreeAllocator::new(config(4, 16)).unwrap();
    let h = tree.malloc(12).unwrap();
    let stats = tree.stats();
    assert_eq!(stats.block_size, 4);
    assert_eq!(stats.used_blocks, 4);
    assert_eq!(stats.free_blocks, 12);
    assert_eq!(stats.max_blocks, 16);
    assert_eq!(stats.memory_usage, 17 * 4 * 4);
    tree.free(h);
    tree.clear();
    assert_eq!(tree.stats().free_blocks, 16);
}

#[test]
fn dump_needs_debug() {
    let mut tree = TreeAllocator::new(AllocatorConfig::new(4, 4)).unwrap();
    let h = tree.malloc(1).unwrap();
    assert_eq!(tree.dump(h), Err(AllocError::DebugDisabled));
}
