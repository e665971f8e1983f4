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

//! Host-side error taxonomy.
//!
//! Kernel-level failures travel through the per-task error slot and are
//! converted here when the consumer picks the task up; they are never thrown
//! across the device/host boundary.

use gdx_kernels::{KernelError, errcode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GdxError {
    /// Out of host or device memory. Non-retryable at this layer.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// Malformed row data encountered mid-kernel.
    #[error("data store corruption: {0}")]
    DataCorruption(String),

    /// Underlying accelerator/driver fault. Unknown codes keep the raw value
    /// for diagnosis.
    #[error("device runtime fault (code {code}): {message}")]
    DeviceRuntimeFault { code: i32, message: String },

    /// Mismatched types or an invalid task-kind dispatch.
    #[error("configuration fault: {0}")]
    ConfigurationFault(String),

    /// Admission invariant violated; should not happen.
    #[error("admission invariant violated: {0}")]
    Starvation(String),
}

pub type Result<T> = std::result::Result<T, GdxError>;

impl From<KernelError> for GdxError {
    fn from(err: KernelError) -> Self {
        match err.code {
            errcode::OUT_OF_MEMORY | errcode::DATA_STORE_NO_SPACE => {
                GdxError::ResourceExhaustion(err.to_string())
            }
            errcode::DATA_STORE_CORRUPTION | errcode::DATA_STORE_OUT_OF_RANGE => {
                GdxError::DataCorruption(err.to_string())
            }
            errcode::INVALID_VALUE => GdxError::ConfigurationFault(err.to_string()),
            code => GdxError::DeviceRuntimeFault {
                code,
                message: err.to_string(),
            },
        }
    }
}
