#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use gdx_core::{GpuTask, Result, TaskProgram, TaskSource};
use gdx_kernels::{
    ExecutionGroup, KernelContext, ResultBuffer, ResultPair, SortKeyComparator, bitonic, errcode,
};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

pub type RowStore = Arc<Vec<Vec<i64>>>;

pub fn random_store(seed: u64, sizes: &[usize]) -> RowStore {
    let mut rng = seeded_rng(seed);
    Arc::new(
        sizes
            .iter()
            .map(|&n| (0..n).map(|_| rng.gen_range(-10_000..10_000)).collect())
            .collect(),
    )
}

/// Per-query generated comparator: orders rows by their key column in the
/// backing store.
pub struct StoreOrder {
    pub store: RowStore,
}

impl SortKeyComparator for StoreOrder {
    fn compare(&self, _cx: &KernelContext, x: ResultPair, y: ResultPair) -> i32 {
        let a = self.store[x.chunk_id as usize][x.item_id as usize];
        let b = self.store[y.chunk_id as usize][y.item_id as usize];
        if a < b {
            -1
        } else if a > b {
            1
        } else {
            0
        }
    }
}

/// Comparator that reports data-store corruption for one poisoned chunk.
pub struct CorruptOrder {
    pub store: RowStore,
    pub bad_chunk: u32,
}

impl SortKeyComparator for CorruptOrder {
    fn compare(&self, cx: &KernelContext, x: ResultPair, y: ResultPair) -> i32 {
        if x.chunk_id == self.bad_chunk || y.chunk_id == self.bad_chunk {
            gdx_kernels::set_kernel_error!(cx, errcode::DATA_STORE_CORRUPTION);
            return 0;
        }
        let a = self.store[x.chunk_id as usize][x.item_id as usize];
        let b = self.store[y.chunk_id as usize][y.item_id as usize];
        if a < b {
            -1
        } else {
            (a > b) as i32
        }
    }
}

/// Sort program with an artificial device delay, for exercising in-flight
/// completions.
pub struct SlowSort<C> {
    pub comparator: C,
    pub delay: Duration,
}

impl<C: SortKeyComparator> TaskProgram for SlowSort<C> {
    fn exec_sort(&self, _cx: &KernelContext, results: &mut ResultBuffer, group: &ExecutionGroup) {
        thread::sleep(self.delay);
        bitonic::bitonic_sort(group, results, &self.comparator);
    }

    fn fallback(&self, _cx: &KernelContext, results: &mut ResultBuffer) {
        bitonic::host_sort(results, &self.comparator);
    }
}

/// Task source over an in-memory chunk store. Rows are `(chunk_id, key)`.
pub struct StoreSource {
    pub store: RowStore,
    pub queue: VecDeque<usize>,
    pub released: Arc<AtomicUsize>,
    /// Optional final-phase flush: `(chunk index, is_ready)`.
    pub terminate_flush: Option<(usize, bool)>,
    pub terminate_calls: Arc<AtomicUsize>,
}

impl StoreSource {
    pub fn new(store: RowStore, chunks: impl IntoIterator<Item = usize>) -> Self {
        Self {
            store,
            queue: chunks.into_iter().collect(),
            released: Arc::new(AtomicUsize::new(0)),
            terminate_flush: None,
            terminate_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn task_for_chunk(&self, id: usize) -> GpuTask {
        GpuTask::new(ResultBuffer::for_chunk(id as u32, self.store[id].len() as u32))
    }
}

impl TaskSource for StoreSource {
    type Row = (u32, i64);

    fn produce_next(&mut self) -> Result<Option<GpuTask>> {
        Ok(self.queue.pop_front().map(|id| self.task_for_chunk(id)))
    }

    fn next_row(&mut self, task: &GpuTask, index: usize) -> Option<(u32, i64)> {
        let pair = task.results.pairs().get(index)?;
        Some((
            pair.chunk_id,
            self.store[pair.chunk_id as usize][pair.item_id as usize],
        ))
    }

    fn release_task(&mut self, _task: GpuTask) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    fn terminate(&mut self) -> Option<(GpuTask, bool)> {
        self.terminate_calls.fetch_add(1, Ordering::Relaxed);
        self.terminate_flush
            .take()
            .map(|(id, is_ready)| (self.task_for_chunk(id), is_ready))
    }
}

/// Split consumed rows into consecutive per-chunk runs.
pub fn chunk_runs(rows: &[(u32, i64)]) -> Vec<(u32, Vec<i64>)> {
    let mut runs: Vec<(u32, Vec<i64>)> = Vec::new();
    for &(chunk, key) in rows {
        match runs.last_mut() {
            Some((id, keys)) if *id == chunk => keys.push(key),
            _ => runs.push((chunk, vec![key])),
        }
    }
    runs
}

/// Each run must be sorted and hold exactly its chunk's key multiset.
pub fn assert_runs_sorted_and_complete(runs: &[(u32, Vec<i64>)], store: &[Vec<i64>]) {
    for (chunk, keys) in runs {
        assert!(
            keys.windows(2).all(|w| w[0] <= w[1]),
            "chunk {} rows not sorted",
            chunk
        );
        let mut got = keys.clone();
        got.sort_unstable();
        let mut want = store[*chunk as usize].clone();
        want.sort_unstable();
        assert_eq!(got, want, "chunk {} key multiset changed", chunk);
    }
}
