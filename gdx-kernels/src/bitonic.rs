//
// Licensed to the Apache Software Foundation (ASF) under one or more
// contributor license agreements.  See the NOTICE file distributed with
// this work for additional information regarding copyright ownership.
// The ASF licenses this file to You under the Apache License, Version 2.0
// (the "License"); you may not use this file except in compliance with
// the License.  You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Partitioned bitonic sort over a result-index array.
//!
//! Three kernels cooperate, keyed to the execution-group width `W`:
//!
//! 1. [`bitonic_local`]: partitions of `2W` entries are sorted entirely
//!    inside one group (every block size from 2 up to the partition size,
//!    every unit size from the block size down to 2, one barrier per unit
//!    sweep).
//! 2. [`bitonic_step`]: a single compare-exchange pass for unit sizes larger
//!    than one group. Steps must be issued in strictly decreasing unit order
//!    and never concurrently over overlapping ranges; that ordering is the
//!    contract this interface exposes to its caller.
//! 3. [`bitonic_merge`]: once the unit size is back inside one group, the
//!    remaining merge runs group-locally (each half-partition is already
//!    sorted, so there is no block-size outer loop).
//!
//! [`bitonic_sort`] drives the full schedule. Array length does not need to
//! be a power of two: lanes whose upper index falls past the end are skipped,
//! which is equivalent to padding with virtual +infinity keys.
//!
//! Ties are only stable within a single compare-exchange; the whole sort is
//! NOT stable.

use rayon::prelude::*;

use crate::group::ExecutionGroup;
use crate::{KernelContext, KernelTag, ResultBuffer, ResultPair, errcode};

/// Per-query sort-key comparison, generated by the kernel-compiler
/// collaborator. The implementor owns its row-store handle; `compare`
/// evaluates the key ordering of two rows identified by index pairs.
///
/// Corrupted source rows must be reported via
/// [`set_error`](KernelContext::set_error) (typically
/// `errcode::DATA_STORE_CORRUPTION`) and an arbitrary ordering returned; the
/// engine aborts after the current launch.
pub trait SortKeyComparator: Send + Sync {
    fn compare(&self, cx: &KernelContext, x: ResultPair, y: ResultPair) -> i32;
}

/// One global compare-exchange step: the unit size (a power of two) and
/// whether the mirrored "reversing" pairing is used. Reversing pairs lane
/// `idx0` with its bit-complement inside the unit (the descending half of the
/// bitonic merge); forward pairs it with `idx0 + unit/2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortStep {
    pub unit_size: u32,
    pub reversing: bool,
}

impl SortStep {
    pub fn forward(unit_size: u32) -> Self {
        Self {
            unit_size,
            reversing: false,
        }
    }

    pub fn reversed(unit_size: u32) -> Self {
        Self {
            unit_size,
            reversing: true,
        }
    }

    /// Decode the legacy signed encoding: the magnitude is the unit size and
    /// a negative sign means reversing.
    pub fn from_encoded(raw: i32) -> Self {
        Self {
            unit_size: raw.unsigned_abs(),
            reversing: raw < 0,
        }
    }

    /// Legacy signed encoding of this step.
    pub fn encoded(&self) -> i32 {
        if self.reversing {
            -(self.unit_size as i32)
        } else {
            self.unit_size as i32
        }
    }
}

/// Shared view of the pair array for lane-parallel compare-exchange sweeps.
/// Safety: the bitonic schedule pairs every index with exactly one partner
/// per sweep, so lanes of one sweep never touch the same slot.
struct SharedPairs {
    ptr: *mut ResultPair,
    len: usize,
}

unsafe impl Send for SharedPairs {}
unsafe impl Sync for SharedPairs {}

impl SharedPairs {
    fn new(pairs: &mut [ResultPair]) -> Self {
        Self {
            ptr: pairs.as_mut_ptr(),
            len: pairs.len(),
        }
    }

    #[inline]
    fn load(&self, index: usize) -> ResultPair {
        debug_assert!(index < self.len);
        unsafe { *self.ptr.add(index) }
    }

    #[inline]
    fn store(&self, index: usize, value: ResultPair) {
        debug_assert!(index < self.len);
        unsafe {
            *self.ptr.add(index) = value;
        }
    }
}

#[inline]
fn compare_exchange(
    cx: &KernelContext,
    cmp: &dyn SortKeyComparator,
    pairs: &SharedPairs,
    lo: usize,
    hi: usize,
) {
    let x = pairs.load(lo);
    let y = pairs.load(hi);
    if cmp.compare(cx, x, y) > 0 {
        pairs.store(lo, y);
        pairs.store(hi, x);
    }
}

/// Sort every `2W` partition independently inside one execution group. The
/// tail partition is bounded by `local_entry`; out-of-range slots stay
/// untouched.
pub fn bitonic_local(group: &ExecutionGroup, buf: &mut ResultBuffer, cmp: &dyn SortKeyComparator) {
    let cx = KernelContext::new(KernelTag::BitonicLocal, buf.params());
    let nitems = buf.len();
    if nitems > 1 {
        let width = group.width();
        let prt_size = group.partition_size();
        let nprt = nitems.div_ceil(prt_size);
        let pairs = SharedPairs::new(buf.pairs_mut());

        let mut block_size = 2;
        while block_size <= prt_size {
            let mut unit_size = block_size;
            while unit_size >= 2 {
                let half = unit_size / 2;
                let mask = unit_size - 1;
                let reversing = unit_size == block_size;
                group.sweep(nprt * width, |lane| {
                    let prt_pos = (lane / width) * prt_size;
                    let local_id = lane % width;
                    let local_entry = prt_size.min(nitems - prt_pos);
                    let idx0 = (local_id / half) * unit_size + local_id % half;
                    let idx1 = if reversing {
                        (idx0 & !mask) | (!idx0 & mask)
                    } else {
                        idx0 + half
                    };
                    if idx1 < local_entry {
                        compare_exchange(&cx, cmp, &pairs, prt_pos + idx0, prt_pos + idx1);
                    }
                });
                unit_size /= 2;
            }
            block_size *= 2;
        }
    }
    cx.writeback(buf.error());
}

/// One global compare-exchange step without any group-size restriction.
/// Lanes whose upper index falls past the array end are skipped.
pub fn bitonic_step(buf: &mut ResultBuffer, step: SortStep, cmp: &dyn SortKeyComparator) {
    let cx = KernelContext::new(KernelTag::BitonicStep, buf.params());
    let nitems = buf.len();
    let unit_size = step.unit_size as usize;
    if unit_size < 2 || !unit_size.is_power_of_two() {
        crate::set_kernel_error!(cx, errcode::INVALID_VALUE);
    } else if nitems > 1 {
        let half = unit_size / 2;
        let mask = unit_size - 1;
        let reversing = step.reversing;
        // Lanes cover the padded power-of-two extent; the idx1 bound drops
        // the pairs that fall into the virtual padding.
        let lanes = nitems.next_power_of_two() / 2;
        let pairs = SharedPairs::new(buf.pairs_mut());
        (0..lanes).into_par_iter().for_each(|lane| {
            let idx0 = (lane / half) * unit_size + lane % half;
            let idx1 = if reversing {
                (idx0 & !mask) | (!idx0 & mask)
            } else {
                idx0 + half
            };
            if idx1 < nitems {
                compare_exchange(&cx, cmp, &pairs, idx0, idx1);
            }
        });
    }
    cx.writeback(buf.error());
}

/// Group-local merge once the unit size has shrunk back to partition size.
/// Mirrors the barrier structure of [`bitonic_local`] but without the
/// block-size outer loop: each half-partition is already sorted.
pub fn bitonic_merge(group: &ExecutionGroup, buf: &mut ResultBuffer, cmp: &dyn SortKeyComparator) {
    let cx = KernelContext::new(KernelTag::BitonicMerge, buf.params());
    let nitems = buf.len();
    if nitems > 1 {
        let width = group.width();
        let prt_size = group.partition_size();
        let nprt = nitems.div_ceil(prt_size);
        let pairs = SharedPairs::new(buf.pairs_mut());

        let mut unit_size = prt_size;
        while unit_size >= 2 {
            let half = unit_size / 2;
            group.sweep(nprt * width, |lane| {
                let prt_pos = (lane / width) * prt_size;
                let local_id = lane % width;
                let local_entry = prt_size.min(nitems - prt_pos);
                let idx0 = (local_id / half) * unit_size + local_id % half;
                let idx1 = idx0 + half;
                if idx1 < local_entry {
                    compare_exchange(&cx, cmp, &pairs, prt_pos + idx0, prt_pos + idx1);
                }
            });
            unit_size /= 2;
        }
    }
    cx.writeback(buf.error());
}

/// Full sort: local phase, then for every doubling block size the global
/// steps in strictly decreasing unit order (reversing on the first step of
/// each block) followed by a group-local merge. Aborts between launches as
/// soon as the buffer's error slot reports a failure.
pub fn bitonic_sort(group: &ExecutionGroup, buf: &mut ResultBuffer, cmp: &dyn SortKeyComparator) {
    let nitems = buf.len();
    if nitems <= 1 {
        return;
    }
    bitonic_local(group, buf, cmp);
    if buf.error().status() != errcode::SUCCESS {
        return;
    }
    let prt_size = group.partition_size();
    if nitems <= prt_size {
        return;
    }
    let npow2 = nitems.next_power_of_two();
    let mut block_size = prt_size * 2;
    while block_size <= npow2 {
        let mut unit_size = block_size;
        while unit_size > prt_size {
            let step = SortStep {
                unit_size: unit_size as u32,
                reversing: unit_size == block_size,
            };
            bitonic_step(buf, step, cmp);
            if buf.error().status() != errcode::SUCCESS {
                return;
            }
            unit_size /= 2;
        }
        bitonic_merge(group, buf, cmp);
        if buf.error().status() != errcode::SUCCESS {
            return;
        }
        block_size *= 2;
    }
}

/// CPU fallback: evaluate the same ordering on the host. Unlike the device
/// network this path is stable.
pub fn host_sort(buf: &mut ResultBuffer, cmp: &dyn SortKeyComparator) {
    let cx = KernelContext::new(KernelTag::Host, buf.params());
    buf.pairs_mut()
        .sort_by(|x, y| cmp.compare(&cx, *x, *y).cmp(&0));
    cx.writeback(buf.error());
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Compares rows by an in-memory key column, the shape the generated
    /// per-query comparator takes in production.
    struct KeyOrder {
        keys: Vec<i64>,
    }

    impl SortKeyComparator for KeyOrder {
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

    fn buffer_keys(buf: &ResultBuffer, keys: &[i64]) -> Vec<i64> {
        buf.pairs()
            .iter()
            .map(|p| keys[p.item_id as usize])
            .collect()
    }

    fn descending(n: u32) -> (ResultBuffer, KeyOrder) {
        let keys: Vec<i64> = (0..n as i64).rev().collect();
        (ResultBuffer::for_chunk(0, n), KeyOrder { keys })
    }

    #[test]
    fn step_forward_direction() {
        let (mut buf, cmp) = descending(8);
        bitonic_step(&mut buf, SortStep::forward(8), &cmp);
        assert_eq!(buf.error().status(), errcode::SUCCESS);
        assert_eq!(buffer_keys(&buf, &cmp.keys), vec![3, 2, 1, 0, 7, 6, 5, 4]);
    }

    #[test]
    fn step_reversing_direction() {
        let (mut buf, cmp) = descending(8);
        bitonic_step(&mut buf, SortStep::reversed(8), &cmp);
        assert_eq!(buf.error().status(), errcode::SUCCESS);
        assert_eq!(buffer_keys(&buf, &cmp.keys), vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn step_encoded_form_matches_explicit() {
        assert_eq!(SortStep::from_encoded(-8), SortStep::reversed(8));
        assert_eq!(SortStep::from_encoded(8), SortStep::forward(8));
        assert_eq!(SortStep::reversed(16).encoded(), -16);
        assert_eq!(SortStep::forward(4).encoded(), 4);

        let (mut a, cmp) = descending(8);
        let (mut b, _) = descending(8);
        bitonic_step(&mut a, SortStep::from_encoded(-8), &cmp);
        bitonic_step(&mut b, SortStep::reversed(8), &cmp);
        assert_eq!(a.pairs(), b.pairs());
    }

    #[test]
    fn step_skips_lanes_past_the_end() {
        let keys = vec![3, 2, 1];
        let cmp = KeyOrder { keys: keys.clone() };
        let mut buf = ResultBuffer::for_chunk(0, 3);
        bitonic_step(&mut buf, SortStep::forward(4), &cmp);
        // Lane (1, 3) is skipped; only (0, 2) exchanges.
        assert_eq!(buffer_keys(&buf, &keys), vec![1, 2, 3]);
    }

    #[test]
    fn step_rejects_invalid_unit_size() {
        for unit in [0, 1, 3, 6] {
            let (mut buf, cmp) = descending(8);
            bitonic_step(&mut buf, SortStep::forward(unit), &cmp);
            let err = buf.error().get().unwrap();
            assert_eq!(err.code, errcode::INVALID_VALUE);
            assert_eq!(err.kernel, KernelTag::BitonicStep);
        }
    }

    #[test]
    fn local_sorts_one_partition_completely() {
        let group = ExecutionGroup::new(2).unwrap();
        let keys = vec![3, 1, 2, 0];
        let cmp = KeyOrder { keys: keys.clone() };
        let mut buf = ResultBuffer::for_chunk(0, 4);
        bitonic_local(&group, &mut buf, &cmp);
        assert_eq!(buf.error().status(), errcode::SUCCESS);
        assert_eq!(buffer_keys(&buf, &keys), vec![0, 1, 2, 3]);
    }

    #[test]
    fn local_sorts_partitions_independently() {
        let group = ExecutionGroup::new(2).unwrap();
        let keys = vec![9, 4, 7, 1, 8, 2];
        let cmp = KeyOrder { keys: keys.clone() };
        let mut buf = ResultBuffer::for_chunk(0, 6);
        bitonic_local(&group, &mut buf, &cmp);
        assert_eq!(buf.error().status(), errcode::SUCCESS);
        // Partition [0..4) and tail partition [4..6) each sorted in place.
        assert_eq!(buffer_keys(&buf, &keys), vec![1, 4, 7, 9, 2, 8]);
    }

    #[test]
    fn merge_completes_a_reversed_step() {
        let group = ExecutionGroup::new(4).unwrap();
        let keys = vec![1, 3, 5, 7, 0, 2, 4, 6];
        let cmp = KeyOrder { keys: keys.clone() };
        let mut buf = ResultBuffer::for_chunk(0, 8);
        bitonic_step(&mut buf, SortStep::reversed(8), &cmp);
        bitonic_merge(&group, &mut buf, &cmp);
        assert_eq!(buf.error().status(), errcode::SUCCESS);
        assert_eq!(buffer_keys(&buf, &keys), vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn sort_handles_all_small_sizes() {
        let group = ExecutionGroup::new(2).unwrap();
        for n in 0..=33u32 {
            // Distinct keys in a shuffled deterministic pattern.
            let keys: Vec<i64> = (0..n as i64).map(|i| (i * 13 + 5) % n.max(1) as i64).collect();
            let cmp = KeyOrder { keys: keys.clone() };
            let mut buf = ResultBuffer::for_chunk(0, n);
            bitonic_sort(&group, &mut buf, &cmp);
            assert_eq!(buf.error().status(), errcode::SUCCESS);

            let mut expected = keys.clone();
            expected.sort_unstable();
            assert_eq!(buffer_keys(&buf, &keys), expected, "n = {}", n);
        }
    }

    #[test]
    fn sorting_a_sorted_array_is_identity() {
        let group = ExecutionGroup::new(4).unwrap();
        let keys: Vec<i64> = (0..100).collect();
        let cmp = KeyOrder { keys };
        let mut buf = ResultBuffer::for_chunk(0, 100);
        bitonic_sort(&group, &mut buf, &cmp);
        let first = buf.pairs().to_vec();
        bitonic_sort(&group, &mut buf, &cmp);
        assert_eq!(buf.pairs(), &first[..]);
    }

    #[test]
    fn host_sort_is_stable() {
        let keys = vec![5, 3, 5, 3, 5];
        let cmp = KeyOrder { keys: keys.clone() };
        let mut buf = ResultBuffer::for_chunk(0, 5);
        host_sort(&mut buf, &cmp);
        let items: Vec<u32> = buf.pairs().iter().map(|p| p.item_id).collect();
        assert_eq!(items, vec![1, 3, 0, 2, 4]);
    }

    struct CorruptAt {
        keys: Vec<i64>,
        bad_item: u32,
    }

    impl SortKeyComparator for CorruptAt {
        fn compare(&self, cx: &KernelContext, x: ResultPair, y: ResultPair) -> i32 {
            if x.item_id == self.bad_item || y.item_id == self.bad_item {
                crate::set_kernel_error!(cx, errcode::DATA_STORE_CORRUPTION);
                return 0;
            }
            let a = self.keys[x.item_id as usize];
            let b = self.keys[y.item_id as usize];
            if a < b { -1 } else { (a > b) as i32 }
        }
    }

    #[test]
    fn comparator_corruption_reaches_the_error_slot() {
        let group = ExecutionGroup::new(2).unwrap();
        let cmp = CorruptAt {
            keys: (0..16).rev().collect(),
            bad_item: 11,
        };
        let mut buf = ResultBuffer::for_chunk(0, 16);
        bitonic_sort(&group, &mut buf, &cmp);
        let err = buf.error().get().unwrap();
        assert_eq!(err.code, errcode::DATA_STORE_CORRUPTION);
    }
}
