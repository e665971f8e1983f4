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

//! Task object and the per-kind kernel dispatch contract.
//!
//! A task is one schedulable unit of accelerator work, owned by exactly one
//! queue at a time (pending, running, ready, then consumed or released).
//! Kind polymorphism is a tagged variant dispatched once per task; the actual
//! device code is a per-query generated [`TaskProgram`] capability.

use std::sync::Arc;

use gdx_kernels::{
    ExecutionGroup, KernelContext, KernelError, KernelTag, ResultBuffer, SortKeyComparator,
    bitonic, errcode,
};

/// Relational operator kinds a task can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Scan,
    Join,
    PreAgg,
    Sort,
    Custom,
}

impl TaskKind {
    /// Kernel tag used for error reports originating from this kind's main
    /// entry point.
    pub fn kernel_tag(self) -> KernelTag {
        match self {
            TaskKind::Scan => KernelTag::ScanMain,
            TaskKind::Join => KernelTag::JoinMain,
            TaskKind::PreAgg => KernelTag::PreAggMain,
            TaskKind::Sort => KernelTag::SortMain,
            TaskKind::Custom => KernelTag::CustomMain,
        }
    }
}

fn invalid_dispatch(cx: &KernelContext) {
    gdx_kernels::set_kernel_error!(cx, errcode::INVALID_VALUE);
}

/// Per-query generated device code, injected as an opaque capability. Each
/// entry point handles one task kind; the defaults report an invalid-dispatch
/// error so a mismatched kind surfaces as a `ConfigurationFault` instead of
/// silently doing nothing.
pub trait TaskProgram: Send + Sync {
    fn exec_scan(&self, cx: &KernelContext, _results: &mut ResultBuffer, _group: &ExecutionGroup) {
        invalid_dispatch(cx);
    }

    fn exec_join(&self, cx: &KernelContext, _results: &mut ResultBuffer, _group: &ExecutionGroup) {
        invalid_dispatch(cx);
    }

    fn exec_preagg(
        &self,
        cx: &KernelContext,
        _results: &mut ResultBuffer,
        _group: &ExecutionGroup,
    ) {
        invalid_dispatch(cx);
    }

    fn exec_sort(&self, cx: &KernelContext, _results: &mut ResultBuffer, _group: &ExecutionGroup) {
        invalid_dispatch(cx);
    }

    fn exec_custom(
        &self,
        cx: &KernelContext,
        _results: &mut ResultBuffer,
        _group: &ExecutionGroup,
    ) {
        invalid_dispatch(cx);
    }

    /// Completion hook, run by the device worker after the kernel finishes
    /// and before the task is handed back.
    fn complete(&self, _results: &mut ResultBuffer) {}

    /// Host-side re-evaluation for CPU-fallback tasks. The default does
    /// nothing: sources that re-check rows on the host handle the
    /// `cpu_fallback` flag themselves when consuming.
    fn fallback(&self, _cx: &KernelContext, _results: &mut ResultBuffer) {}
}

/// Ready-made program for sort tasks: wires a generated key comparator to the
/// bitonic engine on the device path and to the stable host sort on the
/// fallback path.
pub struct SortProgram<C> {
    comparator: C,
}

impl<C: SortKeyComparator> SortProgram<C> {
    pub fn new(comparator: C) -> Self {
        Self { comparator }
    }

    pub fn comparator(&self) -> &C {
        &self.comparator
    }
}

impl<C: SortKeyComparator> TaskProgram for SortProgram<C> {
    fn exec_sort(&self, _cx: &KernelContext, results: &mut ResultBuffer, group: &ExecutionGroup) {
        bitonic::bitonic_sort(group, results, &self.comparator);
    }

    fn fallback(&self, _cx: &KernelContext, results: &mut ResultBuffer) {
        bitonic::host_sort(results, &self.comparator);
    }
}

/// One unit of accelerator work.
///
/// Created by the owning scan's produce callback, stamped by the state
/// machine (kind, revision, program, params, queue position), executed by a
/// device worker, and finally consumed or released. A task whose stamped
/// revision no longer matches its scan is discarded unconsumed.
pub struct GpuTask {
    pub kind: TaskKind,
    /// Revision of the owning scan at stamp time; a mismatch at completion
    /// means the scan was rewound and the result must be discarded.
    pub revision: u32,
    /// Set when this task must be re-evaluated on the CPU (no device
    /// connection, or the kernel requested a re-check).
    pub cpu_fallback: bool,
    pub results: ResultBuffer,
    pub(crate) program: Option<Arc<dyn TaskProgram>>,
    /// Production order within the owning scan; completed tasks are handed
    /// back to the consumer in this order.
    pub(crate) seq: u64,
}

impl GpuTask {
    pub fn new(results: ResultBuffer) -> Self {
        Self {
            kind: TaskKind::Custom,
            revision: 0,
            cpu_fallback: false,
            results,
            program: None,
            seq: 0,
        }
    }

    /// Kernel error recorded during execution, if any.
    pub fn error(&self) -> Option<KernelError> {
        self.results.error().get()
    }

    pub fn num_items(&self) -> usize {
        self.results.len()
    }

    pub(crate) fn program(&self) -> Option<Arc<dyn TaskProgram>> {
        self.program.clone()
    }
}

impl std::fmt::Debug for GpuTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuTask")
            .field("kind", &self.kind)
            .field("revision", &self.revision)
            .field("cpu_fallback", &self.cpu_fallback)
            .field("num_items", &self.results.len())
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}
