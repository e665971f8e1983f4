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

//! Execution group: a fixed-size cohort of parallel lanes that synchronize at
//! a barrier between compare-exchange passes.
//!
//! This is the portable stand-in for an accelerator thread group. One
//! [`sweep`](ExecutionGroup::sweep) runs every lane of one barrier-delimited
//! pass; the join at the end of the sweep IS the barrier. Lanes of a single
//! pass must write disjoint slots, which is exactly what the bitonic schedule
//! guarantees.

use rayon::prelude::*;

use crate::{KernelError, KernelTag, errcode};

/// A cohort of `width` lanes; the local sort granularity. Each group sorts a
/// partition of `2 * width` entries entirely inside one launch.
#[derive(Clone, Copy, Debug)]
pub struct ExecutionGroup {
    width: usize,
}

impl ExecutionGroup {
    pub const DEFAULT_WIDTH: usize = 256;

    /// Width must be a power of two (>= 2) so the bitonic network's index
    /// arithmetic stays exact.
    pub fn new(width: usize) -> Result<Self, KernelError> {
        if width < 2 || !width.is_power_of_two() {
            return Err(KernelError {
                code: errcode::INVALID_VALUE,
                kernel: KernelTag::Host,
                line: line!(),
            });
        }
        Ok(Self { width })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Partition size handled by one group: two entries per lane.
    pub fn partition_size(&self) -> usize {
        self.width * 2
    }

    /// Run one barrier-delimited pass over `lanes` lanes. Returns only after
    /// every lane finished, so consecutive sweeps observe each other's writes.
    pub fn sweep<F>(&self, lanes: usize, body: F)
    where
        F: Fn(usize) + Send + Sync,
    {
        if lanes == 0 {
            return;
        }
        (0..lanes).into_par_iter().for_each(body);
    }
}
