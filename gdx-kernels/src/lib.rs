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

//! Device-side kernel support for the gdx scheduler.
//!
//! This crate owns everything that runs "on the device": the execution-group
//! abstraction, the partitioned bitonic sort network, and the error-writeback
//! conventions shared with the host crate. Kernels never panic across the
//! device/host boundary; failures are written once into a task's shared
//! [`ErrorSlot`] and surfaced by the host when the task is picked up.

pub mod bitonic;
pub mod group;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

pub use bitonic::{
    SortKeyComparator, SortStep, bitonic_local, bitonic_merge, bitonic_sort, bitonic_step,
    host_sort,
};
pub use group::ExecutionGroup;

/// Kernel-level error codes.
///
/// Codes below [`DEVICE_RUNTIME_BASE`](errcode::DEVICE_RUNTIME_BASE) are
/// engine conditions; codes at or above it carry a raw accelerator runtime
/// code offset by the base, reported verbatim for diagnosis.
pub mod errcode {
    pub const SUCCESS: i32 = 0;
    /// Not an error: the task must be re-evaluated on the CPU.
    pub const CPU_RECHECK: i32 = 1;
    pub const OUT_OF_MEMORY: i32 = 2;
    pub const DATA_STORE_CORRUPTION: i32 = 3;
    pub const DATA_STORE_NO_SPACE: i32 = 4;
    pub const DATA_STORE_OUT_OF_RANGE: i32 = 5;
    pub const INVALID_VALUE: i32 = 6;
    pub const SANITY_CHECK_VIOLATION: i32 = 7;
    /// Raw device runtime codes are reported as `DEVICE_RUNTIME_BASE + code`.
    pub const DEVICE_RUNTIME_BASE: i32 = 1000;
}

/// String form of a kernel error code. Unknown codes keep the raw value so
/// they stay diagnosable.
pub fn error_label(code: i32) -> String {
    match code {
        errcode::SUCCESS => "success".to_string(),
        errcode::CPU_RECHECK => "cpu re-check".to_string(),
        errcode::OUT_OF_MEMORY => "out of memory".to_string(),
        errcode::DATA_STORE_CORRUPTION => "data store corruption".to_string(),
        errcode::DATA_STORE_NO_SPACE => "data store no space".to_string(),
        errcode::DATA_STORE_OUT_OF_RANGE => "data store out of range".to_string(),
        errcode::INVALID_VALUE => "invalid value".to_string(),
        errcode::SANITY_CHECK_VIOLATION => "sanity check violation".to_string(),
        c if c >= errcode::DEVICE_RUNTIME_BASE => {
            format!("device runtime error {}", c - errcode::DEVICE_RUNTIME_BASE)
        }
        c => format!("unexpected error {}", c),
    }
}

/// Registry of kernels that can originate an error report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelTag {
    Host,
    ScanMain,
    JoinMain,
    PreAggMain,
    SortMain,
    CustomMain,
    BitonicLocal,
    BitonicStep,
    BitonicMerge,
}

impl KernelTag {
    pub fn name(self) -> &'static str {
        match self {
            KernelTag::Host => "host",
            KernelTag::ScanMain => "scan_main",
            KernelTag::JoinMain => "join_main",
            KernelTag::PreAggMain => "preagg_main",
            KernelTag::SortMain => "sort_main",
            KernelTag::CustomMain => "custom_main",
            KernelTag::BitonicLocal => "bitonic_local",
            KernelTag::BitonicStep => "bitonic_step",
            KernelTag::BitonicMerge => "bitonic_merge",
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            KernelTag::Host => 0,
            KernelTag::ScanMain => 1,
            KernelTag::JoinMain => 2,
            KernelTag::PreAggMain => 3,
            KernelTag::SortMain => 4,
            KernelTag::CustomMain => 5,
            KernelTag::BitonicLocal => 6,
            KernelTag::BitonicStep => 7,
            KernelTag::BitonicMerge => 8,
        }
    }

    fn from_u32(v: u32) -> KernelTag {
        match v {
            1 => KernelTag::ScanMain,
            2 => KernelTag::JoinMain,
            3 => KernelTag::PreAggMain,
            4 => KernelTag::SortMain,
            5 => KernelTag::CustomMain,
            6 => KernelTag::BitonicLocal,
            7 => KernelTag::BitonicStep,
            8 => KernelTag::BitonicMerge,
            _ => KernelTag::Host,
        }
    }
}

/// Structured kernel error: code + originating kernel + line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelError {
    pub code: i32,
    pub kernel: KernelTag,
    pub line: u32,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {}",
            self.kernel.name(),
            self.line,
            error_label(self.code)
        )
    }
}

/// Write-once error slot shared between the executing worker and the
/// consumer. The first non-success writer wins; later reports are dropped.
/// Each task's slot is written by one worker and read by one consumer; the
/// atomics only arbitrate the first-writer race between lanes of a launch.
#[derive(Debug, Default)]
pub struct ErrorSlot {
    code: AtomicI32,
    kernel: AtomicU32,
    line: AtomicU32,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error unless one is already present.
    pub fn set(&self, err: KernelError) {
        if err.code == errcode::SUCCESS {
            return;
        }
        if self
            .code
            .compare_exchange(
                errcode::SUCCESS,
                err.code,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.kernel.store(err.kernel.as_u32(), Ordering::Release);
            self.line.store(err.line, Ordering::Release);
        } else {
            log::debug!("secondary kernel error dropped: {err}");
        }
    }

    /// Current code; `errcode::SUCCESS` when clean.
    pub fn status(&self) -> i32 {
        self.code.load(Ordering::Acquire)
    }

    pub fn get(&self) -> Option<KernelError> {
        let code = self.status();
        if code == errcode::SUCCESS {
            return None;
        }
        Some(KernelError {
            code,
            kernel: KernelTag::from_u32(self.kernel.load(Ordering::Acquire)),
            line: self.line.load(Ordering::Acquire),
        })
    }

    /// Host-side reset, used after a `CPU_RECHECK` report has been consumed.
    pub fn reset(&self) {
        self.code.store(errcode::SUCCESS, Ordering::Release);
        self.kernel
            .store(KernelTag::Host.as_u32(), Ordering::Release);
        self.line.store(0, Ordering::Release);
    }
}

/// Opaque per-query parameter buffer (Const/Param values marshalled by the
/// planner collaborator). The engine only stamps and transports it; the
/// contents are a serialization contract between the planner and the
/// generated kernel code.
#[derive(Clone, Debug, Default)]
pub struct ParamBuffer {
    bytes: Vec<u8>,
}

impl ParamBuffer {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Per-launch kernel context handed to generated code: the originating kernel
/// tag, a local set-once error, and the query parameters. Call
/// [`writeback`](KernelContext::writeback) after the launch to propagate the
/// local error into the task's shared slot.
pub struct KernelContext {
    kernel: KernelTag,
    err: ErrorSlot,
    params: Arc<ParamBuffer>,
}

impl KernelContext {
    pub fn new(kernel: KernelTag, params: Arc<ParamBuffer>) -> Self {
        Self {
            kernel,
            err: ErrorSlot::new(),
            params,
        }
    }

    pub fn kernel(&self) -> KernelTag {
        self.kernel
    }

    pub fn params(&self) -> &ParamBuffer {
        &self.params
    }

    pub fn set_error(&self, code: i32, line: u32) {
        self.err.set(KernelError {
            code,
            kernel: self.kernel,
            line,
        });
    }

    pub fn status(&self) -> i32 {
        self.err.status()
    }

    /// Propagate the context's error (if any) into the shared slot.
    pub fn writeback(&self, slot: &ErrorSlot) {
        if let Some(err) = self.err.get() {
            slot.set(err);
        }
    }
}

/// Record an error on a [`KernelContext`] with the current source line.
#[macro_export]
macro_rules! set_kernel_error {
    ($cx:expr, $code:expr) => {
        $cx.set_error($code, line!())
    };
}

/// One row's identity in a task's result set: which chunk it lives in and its
/// index within that chunk. The sort kernels permute pairs in place; the
/// multiset of pairs is invariant across every step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResultPair {
    pub chunk_id: u32,
    pub item_id: u32,
}

/// Result buffer of one task: the index pairs, the shared error slot, and the
/// query parameters, packed together like the on-device task chunk so a task
/// travels as one unit.
#[derive(Debug, Default)]
pub struct ResultBuffer {
    pairs: Vec<ResultPair>,
    params: Arc<ParamBuffer>,
    error: ErrorSlot,
}

impl ResultBuffer {
    pub fn new(pairs: Vec<ResultPair>) -> Self {
        Self {
            pairs,
            params: Arc::new(ParamBuffer::default()),
            error: ErrorSlot::new(),
        }
    }

    /// Initial identity mapping for one chunk: `(chunk_id, 0..nitems)`.
    pub fn for_chunk(chunk_id: u32, nitems: u32) -> Self {
        Self::new(
            (0..nitems)
                .map(|item_id| ResultPair { chunk_id, item_id })
                .collect(),
        )
    }

    pub fn set_params(&mut self, params: Arc<ParamBuffer>) {
        self.params = params;
    }

    pub fn params(&self) -> Arc<ParamBuffer> {
        Arc::clone(&self.params)
    }

    pub fn pairs(&self) -> &[ResultPair] {
        &self.pairs
    }

    pub fn pairs_mut(&mut self) -> &mut [ResultPair] {
        &mut self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn error(&self) -> &ErrorSlot {
        &self.error
    }
}
