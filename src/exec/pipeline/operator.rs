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
//! Core operator traits.
//!
//! Responsibilities:
//! - Defines processor execution contracts (push/pull/finish/reset) shared by sinks and sources.
//! - Used by drivers to orchestrate cooperative operator execution steps.
//!
//! Key exported interfaces:
//! - Types: `Operator`, `ProcessorOperator`.

use crate::common::error::{ExecError, Result};
use crate::exec::chunk::Chunk;
use crate::exec::pipeline::schedule::observer::Observable;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::profile::OperatorProfiles;
use crate::runtime::runtime_state::RuntimeState;
use std::sync::Arc;

/// Base operator contract implemented by source/processor/sink operator implementations.
pub trait Operator: Send {
    fn name(&self) -> &str;

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        let _ = tracker;
    }

    fn set_profiles(&mut self, profiles: OperatorProfiles) {
        let _ = profiles;
    }

    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_finished(&self) -> bool {
        false
    }

    fn as_processor_mut(&mut self) -> Option<&mut dyn ProcessorOperator> {
        None
    }

    fn as_processor_ref(&self) -> Option<&dyn ProcessorOperator> {
        None
    }
}

/// Extended operator contract for processor stages with push/pull semantics.
///
/// A driver calls `push_chunk` only while `need_input` is true and
/// `pull_chunk` only while `has_output` is true. `set_finishing` marks the
/// end of input and may be called more than once.
pub trait ProcessorOperator: Operator {
    fn need_input(&self) -> bool;

    fn has_output(&self) -> bool;

    fn push_chunk(&mut self, state: &RuntimeState, chunk: Chunk) -> Result<()>;

    fn pull_chunk(&mut self, state: &RuntimeState) -> Result<Option<Chunk>>;

    fn set_finishing(&mut self, state: &RuntimeState) -> Result<()>;

    /// Return to the accepting state and replay `refill_chunks` as fresh input.
    fn reset_state(&mut self, state: &RuntimeState, refill_chunks: Vec<Chunk>) -> Result<()> {
        let _ = (state, refill_chunks);
        Err(ExecError::NotSupported(format!(
            "{} does not support reset_state",
            self.name()
        )))
    }

    /// Observable for source-side readiness (has_output becomes true).
    fn source_observable(&self) -> Option<Arc<Observable>> {
        None
    }

    /// Observable for sink-side readiness (need_input becomes true).
    fn sink_observable(&self) -> Option<Arc<Observable>> {
        None
    }
}
