#![allow(dead_code)]

use gdx_kernels::{KernelContext, ResultBuffer, ResultPair, SortKeyComparator};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Comparator over an in-memory key column, indexed by item id.
pub struct ColumnOrder {
    pub keys: Vec<i64>,
}

impl SortKeyComparator for ColumnOrder {
    fn compare(&self, _cx: &KernelContext, x: ResultPair, y: ResultPair) -> i32 {
        let a = self.keys[x.item_id as usize];
        let b = self.keys[y.item_id as usize];
        if a < b {
            -1
        } else if a > b {
            1
        } else {
            0
        }
    }
}

/// Verify that the buffer still holds exactly the pairs `(chunk_id, 0..n)`.
pub fn verify_pairs_preserved(buf: &ResultBuffer, chunk_id: u32, n: usize) -> bool {
    if buf.len() != n {
        return false;
    }
    let mut seen = vec![false; n];
    for pair in buf.pairs() {
        if pair.chunk_id != chunk_id {
            return false;
        }
        let i = pair.item_id as usize;
        if i >= n || seen[i] {
            return false;
        }
        seen[i] = true;
    }
    true
}

/// Verify keys[item] is non-decreasing across the buffer.
pub fn verify_sorted(buf: &ResultBuffer, keys: &[i64]) -> bool {
    buf.pairs()
        .windows(2)
        .all(|w| keys[w[0].item_id as usize] <= keys[w[1].item_id as usize])
}
