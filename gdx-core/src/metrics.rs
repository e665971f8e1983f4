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

//! Read-only diagnostic counters for an external reporting facility.
//! Recoverable conditions (CPU fallback, stale-revision discards) are silent
//! to the consumer but countable here.

/// Per-scan counters, owned by one `GpuTaskState` and merged into the shared
/// worker statistics when a parallel worker releases its scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanMetrics {
    pub tasks_produced: u64,
    pub tasks_consumed: u64,
    pub rows_returned: u64,
    pub cpu_fallback_tasks: u64,
    pub stale_discards: u64,
}

impl ScanMetrics {
    pub fn merge(&mut self, other: &ScanMetrics) {
        self.tasks_produced += other.tasks_produced;
        self.tasks_consumed += other.tasks_consumed;
        self.rows_returned += other.rows_returned;
        self.cpu_fallback_tasks += other.cpu_fallback_tasks;
        self.stale_discards += other.stale_discards;
    }
}

/// Context-wide snapshot across every scan sharing one `SharedGpuContext`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContextMetrics {
    pub running_tasks: usize,
    /// High-water mark of the global running counter. May exceed
    /// `max_async_tasks` by at most the number of forced submissions.
    pub peak_running_tasks: usize,
    /// Starvation-guard submissions that bypassed the admission limits.
    pub forced_submissions: u64,
    pub completed_tasks: u64,
    pub cpu_fallback_tasks: u64,
    pub stale_discards: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_adds_every_counter() {
        let mut a = ScanMetrics {
            tasks_produced: 1,
            tasks_consumed: 2,
            rows_returned: 3,
            cpu_fallback_tasks: 4,
            stale_discards: 5,
        };
        let b = ScanMetrics {
            tasks_produced: 10,
            tasks_consumed: 20,
            rows_returned: 30,
            cpu_fallback_tasks: 40,
            stale_discards: 50,
        };
        a.merge(&b);
        assert_eq!(
            a,
            ScanMetrics {
                tasks_produced: 11,
                tasks_consumed: 22,
                rows_returned: 33,
                cpu_fallback_tasks: 44,
                stale_discards: 55,
            }
        );
    }
}
