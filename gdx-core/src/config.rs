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

//! Scheduler configuration: admission limits, worker pool size, execution
//! group width, completion poll interval. Env override with clamped parse.
//!
//! **Env:** `GDX_MAX_ASYNC_TASKS` (1-256), `GDX_LOCAL_TASK_LIMIT` (1-32),
//! `GDX_DEVICE_WORKERS` (0-64; 0 = no device, CPU fallback mode),
//! `GDX_GROUP_WIDTH` (power of two, 2-4096), `GDX_POLL_INTERVAL_MS`
//! (10-10000).

use std::time::Duration;

use gdx_kernels::ExecutionGroup;

use crate::error::{GdxError, Result};

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Global bound on running tasks across every scan sharing one context.
    pub max_async_tasks: usize,
    /// Per-scan bound on running + ready tasks.
    pub local_task_limit: usize,
    /// Device-server worker threads. 0 means no device connection: every
    /// task is flagged for CPU fallback instead.
    pub device_workers: usize,
    /// Execution-group width (lanes per group); partition size is twice this.
    pub group_width: usize,
    /// Bounded wait used while blocking for a completion, so shutdown or a
    /// dead worker is noticed promptly.
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_async_tasks: 8,
            local_task_limit: 3,
            device_workers: 2,
            group_width: ExecutionGroup::DEFAULT_WIDTH,
            poll_interval: Duration::from_millis(500),
        }
    }
}

fn env_clamped(name: &str, lo: usize, hi: usize) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(|n: usize| n.clamp(lo, hi))
}

impl SchedulerConfig {
    /// Defaults overridden from the environment. Parse failure leaves the
    /// default in place.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_async_tasks: env_clamped("GDX_MAX_ASYNC_TASKS", 1, 256)
                .unwrap_or(defaults.max_async_tasks),
            local_task_limit: env_clamped("GDX_LOCAL_TASK_LIMIT", 1, 32)
                .unwrap_or(defaults.local_task_limit),
            device_workers: env_clamped("GDX_DEVICE_WORKERS", 0, 64)
                .unwrap_or(defaults.device_workers),
            group_width: env_clamped("GDX_GROUP_WIDTH", 2, 4096).unwrap_or(defaults.group_width),
            poll_interval: env_clamped("GDX_POLL_INTERVAL_MS", 10, 10_000)
                .map(|ms| Duration::from_millis(ms as u64))
                .unwrap_or(defaults.poll_interval),
        }
    }

    /// Drop the device connection: every task takes the CPU-fallback path.
    pub fn offline(mut self) -> Self {
        self.device_workers = 0;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_async_tasks == 0 {
            return Err(GdxError::ConfigurationFault(
                "max_async_tasks must be at least 1".to_string(),
            ));
        }
        if self.local_task_limit == 0 {
            return Err(GdxError::ConfigurationFault(
                "local_task_limit must be at least 1".to_string(),
            ));
        }
        if self.group_width < 2 || !self.group_width.is_power_of_two() {
            return Err(GdxError::ConfigurationFault(format!(
                "group_width must be a power of two >= 2, got {}",
                self.group_width
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(GdxError::ConfigurationFault(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
