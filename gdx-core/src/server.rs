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

//! Device-server side: worker threads servicing the shared pending queue.
//!
//! Each worker receives a pending task, dispatches it once by kind to the
//! task's program, runs the completion hook, then delivers the task back to
//! the owning scan's completion channel. The per-task error slot is written
//! here and read by the consumer at pickup; errors never cross this boundary
//! as panics.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crossbeam_channel::Receiver;

use gdx_kernels::{ExecutionGroup, KernelContext, KernelError, KernelTag, errcode};

use crate::context::{ContextCounters, PendingTask};
use crate::task::{GpuTask, TaskKind};

pub(crate) fn worker_loop(
    id: usize,
    rx: Receiver<PendingTask>,
    group: Arc<ExecutionGroup>,
    counters: Arc<ContextCounters>,
) {
    log::debug!("device worker {id}: online");
    while let Ok(pending) = rx.recv() {
        if counters.shutdown.load(Ordering::Acquire) {
            // Fatal teardown: unwind without draining the queue.
            counters.running.fetch_sub(1, Ordering::AcqRel);
            break;
        }
        let PendingTask { mut task, reply } = pending;
        process_task(&mut task, &group);
        if reply.send(task).is_err() {
            // The owning scan was released while this task was in flight;
            // the consumer-side decrement will never happen, so repair the
            // global counter here and drop the task.
            counters.running.fetch_sub(1, Ordering::AcqRel);
            counters.completed.fetch_add(1, Ordering::Relaxed);
            log::debug!("device worker {id}: completion had no consumer, task dropped");
        }
    }
    log::debug!("device worker {id}: offline");
}

/// Dispatch one task to its program, exactly once, by kind.
fn process_task(task: &mut GpuTask, group: &ExecutionGroup) {
    let Some(program) = task.program() else {
        task.results.error().set(KernelError {
            code: errcode::INVALID_VALUE,
            kernel: KernelTag::Host,
            line: line!(),
        });
        return;
    };
    let cx = KernelContext::new(task.kind.kernel_tag(), task.results.params());
    match task.kind {
        TaskKind::Scan => program.exec_scan(&cx, &mut task.results, group),
        TaskKind::Join => program.exec_join(&cx, &mut task.results, group),
        TaskKind::PreAgg => program.exec_preagg(&cx, &mut task.results, group),
        TaskKind::Sort => program.exec_sort(&cx, &mut task.results, group),
        TaskKind::Custom => program.exec_custom(&cx, &mut task.results, group),
    }
    cx.writeback(task.results.error());
    program.complete(&mut task.results);
}
