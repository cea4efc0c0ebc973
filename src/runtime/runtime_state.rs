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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::common::config;
use crate::runtime::mem_tracker::MemTracker;

/// Per-fragment-instance execution context, similar to StarRocks BE RuntimeState.
///
/// Clones share the cancellation flag and memory tracker, so every
/// driver of one fragment observes a cancel issued through any of them.
#[derive(Clone, Debug)]
pub struct RuntimeState {
    chunk_size: usize,
    cancelled: Arc<AtomicBool>,
    mem_tracker: Option<Arc<MemTracker>>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new(config::chunk_size(), None)
    }
}

impl RuntimeState {
    pub fn new(chunk_size: usize, mem_tracker: Option<Arc<MemTracker>>) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            cancelled: Arc::new(AtomicBool::new(false)),
            mem_tracker,
        }
    }

    /// Return the maximum row count per in-memory chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn mem_tracker(&self) -> Option<Arc<MemTracker>> {
        self.mem_tracker.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_cancellation() {
        let state = RuntimeState::new(0, None);
        assert_eq!(state.chunk_size(), 1);
        let other = state.clone();
        assert!(!other.is_cancelled());
        state.cancel();
        assert!(other.is_cancelled());
    }
}
