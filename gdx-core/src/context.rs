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

//! Session-wide shared context: the global pending queue feeding the
//! device-server worker pool, the global running-task counter, and the
//! context-level diagnostics.
//!
//! The context is an explicitly passed, reference-counted resource; every
//! scan holds an `Arc` to it and there is no process-wide singleton. Dropping
//! the last reference closes the pending queue and joins the worker pool.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, unbounded};
use gdx_kernels::ExecutionGroup;

use crate::config::SchedulerConfig;
use crate::error::{GdxError, Result};
use crate::metrics::ContextMetrics;
use crate::server;
use crate::task::GpuTask;

/// A task travelling to the device server, together with the channel that
/// returns it to the owning scan on completion. The send on that channel is
/// the wake signal the scan blocks on.
pub(crate) struct PendingTask {
    pub task: GpuTask,
    pub reply: Sender<GpuTask>,
}

#[derive(Debug, Default)]
pub(crate) struct ContextCounters {
    pub running: AtomicUsize,
    pub peak_running: AtomicUsize,
    pub forced: AtomicU64,
    pub completed: AtomicU64,
    pub cpu_fallback: AtomicU64,
    pub stale_discards: AtomicU64,
    pub shutdown: AtomicBool,
}

pub struct SharedGpuContext {
    config: SchedulerConfig,
    device_online: bool,
    /// `None` once shutdown started; closing the channel is what drains the
    /// worker pool.
    pending_tx: Option<Sender<PendingTask>>,
    counters: Arc<ContextCounters>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl SharedGpuContext {
    /// Validate the config, then spawn `device_workers` named worker threads
    /// servicing the shared pending queue. With zero workers the context runs
    /// without a device connection and every task takes the CPU-fallback
    /// path.
    pub fn new(config: SchedulerConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let group = Arc::new(ExecutionGroup::new(config.group_width).map_err(GdxError::from)?);
        let counters = Arc::new(ContextCounters::default());
        let device_online = config.device_workers > 0;
        let (pending_tx, pending_rx) = unbounded::<PendingTask>();

        let mut workers = Vec::with_capacity(config.device_workers);
        for id in 0..config.device_workers {
            let rx = pending_rx.clone();
            let group = Arc::clone(&group);
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("gdx-device-worker-{id}"))
                .spawn(move || server::worker_loop(id, rx, group, counters))
                .map_err(|e| {
                    GdxError::ResourceExhaustion(format!("failed to spawn device worker: {e}"))
                })?;
            workers.push(handle);
        }
        log::debug!(
            "gdx context online: {} device workers, global limit {}",
            config.device_workers,
            config.max_async_tasks
        );

        Ok(Arc::new(Self {
            config,
            device_online,
            pending_tx: Some(pending_tx),
            counters,
            workers: Mutex::new(workers),
        }))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Whether a device connection exists. When false, tasks cannot be
    /// processed by the device and are re-evaluated on the CPU instead.
    pub fn device_online(&self) -> bool {
        self.device_online
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    /// Global running-task count across every scan sharing this context.
    pub fn running_tasks(&self) -> usize {
        self.counters.running.load(Ordering::Acquire)
    }

    pub fn is_shutdown(&self) -> bool {
        self.counters.shutdown.load(Ordering::Acquire)
    }

    /// Request teardown: in-flight work is unwound without cleanup guarantees
    /// beyond resource-manager teardown; blocked scans notice within one poll
    /// interval.
    pub fn shutdown(&self) {
        self.counters.shutdown.store(true, Ordering::Release);
    }

    /// Attach a task to the global pending queue and wake one worker. Always
    /// succeeds in normal operation; a closed queue means the server was shut
    /// down, which is fatal for the submitting scan.
    pub(crate) fn submit(&self, pending: PendingTask, forced: bool) -> Result<()> {
        let Some(tx) = self.pending_tx.as_ref() else {
            return Err(GdxError::DeviceRuntimeFault {
                code: 0,
                message: "device server is shut down".to_string(),
            });
        };
        let running = self.counters.running.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.peak_running.fetch_max(running, Ordering::AcqRel);
        if forced {
            self.counters.forced.fetch_add(1, Ordering::Relaxed);
        }
        if tx.send(pending).is_err() {
            self.counters.running.fetch_sub(1, Ordering::AcqRel);
            return Err(GdxError::DeviceRuntimeFault {
                code: 0,
                message: "device server is shut down".to_string(),
            });
        }
        Ok(())
    }

    /// The consumer received one completion: it owns the matching decrement
    /// of the global running counter.
    pub(crate) fn note_completion_received(&self) {
        self.counters.running.fetch_sub(1, Ordering::AcqRel);
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_cpu_fallback(&self) {
        self.counters.cpu_fallback.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_stale_discard(&self) {
        self.counters.stale_discards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> ContextMetrics {
        ContextMetrics {
            running_tasks: self.counters.running.load(Ordering::Acquire),
            peak_running_tasks: self.counters.peak_running.load(Ordering::Acquire),
            forced_submissions: self.counters.forced.load(Ordering::Relaxed),
            completed_tasks: self.counters.completed.load(Ordering::Relaxed),
            cpu_fallback_tasks: self.counters.cpu_fallback.load(Ordering::Relaxed),
            stale_discards: self.counters.stale_discards.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SharedGpuContext {
    fn drop(&mut self) {
        self.counters.shutdown.store(true, Ordering::Release);
        // Closing the pending queue is what lets the workers drain out.
        self.pending_tx = None;
        if let Ok(mut workers) = self.workers.lock() {
            for handle in workers.drain(..) {
                let _ = handle.join();
            }
        }
    }
}
