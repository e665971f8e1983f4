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

//! Parallel-scan cooperation: a shared descriptor allocated once by the
//! coordinator. Every worker runs its own state machine over disjoint block
//! ranges handed out by the descriptor's cursor, and merges its per-scan
//! counters back into the shared statistics when it releases its scan.

use std::sync::Mutex;

use crate::metrics::ScanMetrics;

#[derive(Debug)]
struct BlockCursor {
    next_block: u64,
    nblocks: u64,
}

#[derive(Debug)]
pub struct ParallelScanDesc {
    cursor: Mutex<BlockCursor>,
    stats: Mutex<ScanMetrics>,
}

impl ParallelScanDesc {
    pub fn new(nblocks: u64) -> Self {
        Self {
            cursor: Mutex::new(BlockCursor {
                next_block: 0,
                nblocks,
            }),
            stats: Mutex::new(ScanMetrics::default()),
        }
    }

    /// Claim the next block to scan. Monotonically increasing,
    /// read-and-incremented under the lock; `None` once the range is
    /// exhausted.
    pub fn next_block(&self) -> Option<u64> {
        let mut cursor = self.cursor.lock().unwrap();
        if cursor.next_block < cursor.nblocks {
            let block = cursor.next_block;
            cursor.next_block += 1;
            Some(block)
        } else {
            None
        }
    }

    pub fn nblocks(&self) -> u64 {
        self.cursor.lock().unwrap().nblocks
    }

    /// Rewind the shared cursor for a rescan without reallocating the
    /// descriptor.
    pub fn reinitialize(&self) {
        self.cursor.lock().unwrap().next_block = 0;
    }

    /// Merge one worker's counters; called when a worker releases its scan.
    pub fn merge_statistics(&self, metrics: &ScanMetrics) {
        self.stats.lock().unwrap().merge(metrics);
    }

    pub fn worker_statistics(&self) -> ScanMetrics {
        *self.stats.lock().unwrap()
    }
}
