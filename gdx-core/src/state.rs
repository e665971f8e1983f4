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

//! Task state machine: one `GpuTaskState` per scan/operator instance.
//!
//! The state machine produces tasks through the source callbacks, admits
//! them against the local and global limits, hands completed tasks to the
//! row consumer in production order, and realizes rescans by revision
//! stamping: in-flight device work is never cancelled, its result is simply
//! discarded when it comes back with a stale revision.

use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use gdx_kernels::{KernelContext, KernelTag, ParamBuffer, errcode};

use crate::context::{PendingTask, SharedGpuContext};
use crate::error::{GdxError, Result};
use crate::metrics::ScanMetrics;
use crate::parallel::ParallelScanDesc;
use crate::task::{GpuTask, TaskKind, TaskProgram};

/// Collaborator callbacks the state machine is polymorphic over. The host
/// executor implements this per operator; the state machine owns the
/// instance for the lifetime of the scan.
pub trait TaskSource {
    type Row;

    /// Supply the next unit of work; `None` means the source is exhausted.
    /// A resource-allocation failure here is fatal, not retryable.
    fn produce_next(&mut self) -> Result<Option<GpuTask>>;

    /// Extract the row at `index` from the task's result set; `None` means
    /// the task is exhausted.
    fn next_row(&mut self, task: &GpuTask, index: usize) -> Option<Self::Row>;

    /// Observer notified when a new task becomes current.
    fn on_task_switch(&mut self, _task: &GpuTask) {}

    /// Return the task's resources to its kind-specific pool.
    fn release_task(&mut self, task: GpuTask);

    /// Final-phase hook, invoked once when running and ready counts reach
    /// zero (e.g. flushing a partial aggregation). `true` in the pair means
    /// the task is already ready for consumption; `false` sends it to the
    /// device first.
    fn terminate(&mut self) -> Option<(GpuTask, bool)> {
        None
    }
}

pub struct GpuTaskState<S: TaskSource> {
    context: Arc<SharedGpuContext>,
    source: S,
    kind: TaskKind,
    program: Arc<dyn TaskProgram>,
    params: Arc<ParamBuffer>,
    revision: u32,
    scan_done: bool,
    terminated: bool,
    curr_task: Option<GpuTask>,
    curr_index: usize,
    /// Completed tasks keyed by production order; delivery follows
    /// `next_deliver_seq` so rows come out in the order tasks were produced.
    ready_tasks: BTreeMap<u64, GpuTask>,
    num_running: usize,
    task_seq: u64,
    next_deliver_seq: u64,
    completion_tx: Sender<GpuTask>,
    completion_rx: Receiver<GpuTask>,
    metrics: ScanMetrics,
    parallel: Option<Arc<ParallelScanDesc>>,
}

impl<S: TaskSource> GpuTaskState<S> {
    pub fn new(
        context: Arc<SharedGpuContext>,
        kind: TaskKind,
        program: Arc<dyn TaskProgram>,
        params: ParamBuffer,
        source: S,
    ) -> Self {
        let (completion_tx, completion_rx) = unbounded();
        Self {
            context,
            source,
            kind,
            program,
            params: Arc::new(params),
            revision: 1,
            scan_done: false,
            terminated: false,
            curr_task: None,
            curr_index: 0,
            ready_tasks: BTreeMap::new(),
            num_running: 0,
            task_seq: 0,
            next_deliver_seq: 0,
            completion_tx,
            completion_rx,
            metrics: ScanMetrics::default(),
            parallel: None,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn context(&self) -> &Arc<SharedGpuContext> {
        &self.context
    }

    pub fn metrics(&self) -> &ScanMetrics {
        &self.metrics
    }

    pub fn num_ready_tasks(&self) -> usize {
        self.ready_tasks.len()
    }

    pub fn num_running_tasks(&self) -> usize {
        self.num_running
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Join a parallel scan: block ranges come from the shared descriptor and
    /// this scan's counters are merged into it on release.
    pub fn set_parallel_desc(&mut self, desc: Arc<ParallelScanDesc>) {
        self.parallel = Some(desc);
    }

    pub fn parallel_desc(&self) -> Option<&Arc<ParallelScanDesc>> {
        self.parallel.as_ref()
    }

    /// Stamp a freshly produced task with this scan's identity.
    fn init_task(&mut self, task: &mut GpuTask) {
        task.kind = self.kind;
        task.revision = self.revision;
        task.cpu_fallback = false;
        task.program = Some(Arc::clone(&self.program));
        task.seq = self.task_seq;
        self.task_seq += 1;
        task.results.set_params(Arc::clone(&self.params));
    }

    fn submit(&mut self, task: GpuTask, forced: bool) -> Result<()> {
        self.num_running += 1;
        let pending = PendingTask {
            task,
            reply: self.completion_tx.clone(),
        };
        if let Err(e) = self.context.submit(pending, forced) {
            self.num_running -= 1;
            return Err(e);
        }
        Ok(())
    }

    /// Produce one task and send it to the device queue. `Ok(false)` means
    /// the source reported end-of-input.
    fn produce_and_submit(&mut self, forced: bool) -> Result<bool> {
        match self.source.produce_next()? {
            Some(mut task) => {
                self.init_task(&mut task);
                self.metrics.tasks_produced += 1;
                self.submit(task, forced)?;
                Ok(true)
            }
            None => {
                self.scan_done = true;
                Ok(false)
            }
        }
    }

    /// Account one received completion. Stale-revision tasks are released
    /// here, unconsumed: this is how a rescan cancels in-flight work without
    /// any device-side abort.
    fn note_completion(&mut self, task: GpuTask) {
        self.num_running = self.num_running.saturating_sub(1);
        self.context.note_completion_received();
        if task.revision != self.revision {
            self.metrics.stale_discards += 1;
            self.context.note_stale_discard();
            self.source.release_task(task);
            return;
        }
        self.ready_tasks.insert(task.seq, task);
    }

    fn drain_completions(&mut self) {
        while let Ok(task) = self.completion_rx.try_recv() {
            self.note_completion(task);
        }
    }

    /// Bounded wait for one completion; a timeout is not an error unless the
    /// context was shut down in the meantime.
    fn wait_completion(&mut self) -> Result<()> {
        match self.completion_rx.recv_timeout(self.context.poll_interval()) {
            Ok(task) => {
                self.note_completion(task);
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                if self.context.is_shutdown() {
                    Err(GdxError::DeviceRuntimeFault {
                        code: 0,
                        message: "device server shut down while tasks were in flight".to_string(),
                    })
                } else {
                    Ok(())
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(GdxError::DeviceRuntimeFault {
                code: 0,
                message: "completion channel closed".to_string(),
            }),
        }
    }

    fn next_ready_in_order(&self) -> bool {
        self.ready_tasks.contains_key(&self.next_deliver_seq)
    }

    /// Re-evaluate a CPU-fallback task on the host.
    fn run_fallback(&mut self, task: &mut GpuTask) -> Result<()> {
        self.metrics.cpu_fallback_tasks += 1;
        self.context.note_cpu_fallback();
        if let Some(program) = task.program() {
            let cx = KernelContext::new(KernelTag::Host, task.results.params());
            program.fallback(&cx, &mut task.results);
            cx.writeback(task.results.error());
        }
        if let Some(err) = task.results.error().get() {
            return Err(err.into());
        }
        Ok(())
    }

    /// Blocking acquire of the next consumable task.
    ///
    /// Policy, evaluated in order while the scan is live:
    /// produce while local (running + ready) and global limits allow; if the
    /// scan has nothing running and nothing ready, force one task through
    /// anyway (starvation guard: without it a scan whose budget is consumed
    /// by siblings would wait forever); prefer draining an available ready
    /// task over waiting; otherwise block on the completion signal with a
    /// bounded poll. After end-of-input, drain until a ready task appears or
    /// the running count reaches zero, fire the terminate hook once, then
    /// report end-of-scan.
    pub fn fetch_next_task(&mut self) -> Result<Option<GpuTask>> {
        // No device connection: the task cannot be processed by the device,
        // so it is produced, flagged, and re-evaluated on the CPU directly.
        if !self.context.device_online() {
            return match self.source.produce_next()? {
                Some(mut task) => {
                    self.init_task(&mut task);
                    task.cpu_fallback = true;
                    self.metrics.tasks_produced += 1;
                    self.run_fallback(&mut task)?;
                    Ok(Some(task))
                }
                None => Ok(None),
            };
        }

        loop {
            self.drain_completions();

            while !self.scan_done {
                let local_load = self.num_running + self.ready_tasks.len();
                let has_capacity = local_load < self.context.config().local_task_limit
                    && self.context.running_tasks() < self.context.config().max_async_tasks;
                if has_capacity {
                    if !self.produce_and_submit(false)? {
                        break;
                    }
                } else if self.num_running == 0 && self.ready_tasks.is_empty() {
                    // Starvation guard: every limit is consumed by sibling
                    // scans and this one has no work in flight. Force one
                    // task through, bypassing both limits.
                    if !self.produce_and_submit(true)? {
                        break;
                    }
                } else if self.next_ready_in_order() {
                    // Limits reached but work is already available; prefer
                    // draining over waiting.
                    break;
                } else {
                    // Something is running (or the next-in-order completion
                    // is still outstanding): bounded wait, then re-evaluate.
                    self.wait_completion()?;
                }
                self.drain_completions();
            }

            // Final drain: either a ready task shows up or the running count
            // reaches zero, at which point the terminate hook gets its one
            // chance before end-of-scan.
            while !self.next_ready_in_order() {
                if self.num_running == 0 {
                    if !self.ready_tasks.is_empty() {
                        return Err(GdxError::Starvation(
                            "ready queue holds tasks but the next one in production order \
                             is neither ready nor running"
                                .to_string(),
                        ));
                    }
                    if !self.terminated {
                        self.terminated = true;
                        if let Some((mut task, is_ready)) = self.source.terminate() {
                            self.init_task(&mut task);
                            self.metrics.tasks_produced += 1;
                            if is_ready {
                                self.ready_tasks.insert(task.seq, task);
                            } else {
                                self.submit(task, false)?;
                            }
                            continue;
                        }
                    }
                    return Ok(None);
                }
                self.wait_completion()?;
            }

            let Some(task) = self.ready_tasks.remove(&self.next_deliver_seq) else {
                continue;
            };
            self.next_deliver_seq += 1;

            // Kernel errors surface only at pickup. A CPU re-check is not an
            // error: the task is flagged and re-evaluated on the host.
            if let Some(err) = task.results.error().get() {
                if err.code == errcode::CPU_RECHECK {
                    let mut task = task;
                    task.cpu_fallback = true;
                    task.results.error().reset();
                    self.run_fallback(&mut task)?;
                    return Ok(Some(task));
                }
                self.source.release_task(task);
                return Err(err.into());
            }

            return Ok(Some(task));
        }
    }

    /// Deliver the next row: advance the current task's cursor, or release
    /// the exhausted task, fetch the next one, notify the switch observer and
    /// retry. `Ok(None)` is end-of-scan.
    pub fn next_row(&mut self) -> Result<Option<S::Row>> {
        loop {
            if let Some(task) = self.curr_task.as_ref() {
                if let Some(row) = self.source.next_row(task, self.curr_index) {
                    self.curr_index += 1;
                    self.metrics.rows_returned += 1;
                    return Ok(Some(row));
                }
            }
            if let Some(done) = self.curr_task.take() {
                self.curr_index = 0;
                self.source.release_task(done);
            }
            match self.fetch_next_task()? {
                Some(task) => {
                    self.metrics.tasks_consumed += 1;
                    self.source.on_task_switch(&task);
                    self.curr_task = Some(task);
                    self.curr_index = 0;
                }
                None => return Ok(None),
            }
        }
    }

    /// Bulk variant of [`next_row`]: drain up to `max_rows` rows across task
    /// boundaries into one chunk. An empty result means end-of-scan.
    pub fn next_chunk(&mut self, max_rows: usize) -> Result<Vec<S::Row>> {
        let mut rows = Vec::new();
        while rows.len() < max_rows {
            match self.next_row()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    /// Plan rewind. Bumping the revision is what invalidates every task still
    /// in flight; ready but unconsumed tasks are released immediately.
    pub fn rescan(&mut self) {
        self.revision = self.revision.wrapping_add(1);
        self.task_seq = 0;
        self.next_deliver_seq = 0;
        while let Some((_, task)) = self.ready_tasks.pop_first() {
            self.source.release_task(task);
        }
        if let Some(task) = self.curr_task.take() {
            self.source.release_task(task);
        }
        self.curr_index = 0;
        self.scan_done = false;
        self.terminated = false;
    }

    /// End of life: drain and release everything still held, then merge this
    /// scan's counters into the shared worker statistics when cooperating in
    /// a parallel scan. Tasks still in flight are dropped by the device
    /// server once their delivery fails.
    pub fn release(mut self) {
        while let Some((_, task)) = self.ready_tasks.pop_first() {
            self.source.release_task(task);
        }
        if let Some(task) = self.curr_task.take() {
            self.source.release_task(task);
        }
        if let Some(desc) = self.parallel.take() {
            desc.merge_statistics(&self.metrics);
        }
    }
}
