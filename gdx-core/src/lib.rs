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

//! Asynchronous GPU task scheduler for relational operator offload.
//!
//! The engine keeps GPU devices saturated with operator tasks (scan, join,
//! pre-aggregation, sort) while respecting a per-scan and a global
//! concurrency limit, coordinates CPU-side row consumption with asynchronous
//! device completion, and degrades to CPU fallback when no device is
//! available.
//!
//! Data flow: the row consumer pulls from a [`GpuTaskState`]; when the
//! current task is exhausted the state machine asks the admission logic for
//! the next one, producing and submitting new tasks into the
//! [`SharedGpuContext`]'s pending queue as the limits allow; device workers
//! execute each task's kernels (the sort operator runs the bitonic engine
//! from `gdx-kernels`) and hand completed tasks back to the owning scan.
//! A rescan invalidates in-flight work by revision stamping, never by
//! device-side cancellation.

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod parallel;
mod server;
pub mod state;
pub mod task;

pub use config::SchedulerConfig;
pub use context::SharedGpuContext;
pub use error::{GdxError, Result};
pub use metrics::{ContextMetrics, ScanMetrics};
pub use parallel::ParallelScanDesc;
pub use state::{GpuTaskState, TaskSource};
pub use task::{GpuTask, SortProgram, TaskKind, TaskProgram};

// Kernel-side types that appear in this crate's public API.
pub use gdx_kernels::{
    ErrorSlot, ExecutionGroup, KernelContext, KernelError, KernelTag, ParamBuffer, ResultBuffer,
    ResultPair, SortKeyComparator, errcode,
};
