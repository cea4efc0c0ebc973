// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Execution error kinds surfaced to pipeline drivers.

use arrow::error::ArrowError;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// A group-by (or other) expression failed to evaluate against a chunk.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Hash table growth could not allocate.
    #[error("memory exhausted: {0}")]
    OutOfMemory(String),

    /// The operator does not implement the requested call.
    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("internal: {0}")]
    Internal(String),

    #[error(transparent)]
    Arrow(#[from] ArrowError),
}

impl ExecError {
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, ExecError::OutOfMemory(_))
    }
}

impl From<hashbrown::TryReserveError> for ExecError {
    fn from(err: hashbrown::TryReserveError) -> Self {
        ExecError::OutOfMemory(format!("{err:?}"))
    }
}

impl From<std::collections::TryReserveError> for ExecError {
    fn from(err: std::collections::TryReserveError) -> Self {
        ExecError::OutOfMemory(err.to_string())
    }
}

pub type Result<T, E = ExecError> = std::result::Result<T, E>;

macro_rules! internal {
    ($($arg:tt)*) => {
        $crate::common::error::ExecError::Internal(std::format!($($arg)*))
    };
}
pub(crate) use internal;

macro_rules! eval_error {
    ($($arg:tt)*) => {
        $crate::common::error::ExecError::Evaluation(std::format!($($arg)*))
    };
}
pub(crate) use eval_error;
