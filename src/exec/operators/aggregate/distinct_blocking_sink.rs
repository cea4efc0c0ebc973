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
//! Blocking sink for `SELECT DISTINCT`-style aggregation.
//!
//! Responsibilities:
//! - Inserts the group-by keys of every pushed chunk into the shared aggregator.
//! - Stops early once a LIMIT is satisfied, locally or through a countdown
//!   shared by every parallel sink of the fragment.
//! - On finishing, positions the output cursor and wakes the paired source.
//!
//! Key exported interfaces:
//! - Types: `AggregateDistinctBlockingSinkFactory`.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::common::config;
use crate::common::error::{ExecError, Result, internal};
use crate::common::ids::DriverId;
use crate::exec::chunk::Chunk;
use crate::exec::pipeline::operator::{Operator, ProcessorOperator};
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::exec::pipeline::schedule::observer::Observable;
use crate::novarocks_logging::debug;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::profile::{OperatorProfiles, RuntimeProfile, TUnit, attach_mem_tracker_tree};
use crate::runtime::runtime_state::RuntimeState;

use super::aggregator::{Aggregator, AggregatorFactory, AggregatorPtr, lock_aggregator};

const OPERATOR_NAME: &str = "AGGREGATE_DISTINCT_BLOCKING_SINK";

/// Factory for distinct blocking sinks; one instance per pipeline driver.
pub struct AggregateDistinctBlockingSinkFactory {
    name: String,
    aggregator_factory: Arc<AggregatorFactory>,
    shared_limit_countdown: Arc<AtomicI64>,
    enable_share_limit: bool,
}

impl AggregateDistinctBlockingSinkFactory {
    pub fn new(aggregator_factory: Arc<AggregatorFactory>, node_id: i32) -> Self {
        let name = if node_id >= 0 {
            format!("{OPERATOR_NAME} (id={node_id})")
        } else {
            OPERATOR_NAME.to_string()
        };
        let limit = aggregator_factory.params().limit;
        Self {
            name,
            aggregator_factory,
            shared_limit_countdown: Arc::new(AtomicI64::new(limit)),
            enable_share_limit: limit != -1 && config::enable_pipeline_share_limit(),
        }
    }

    /// Override the configured share-limit switch. Ignored without a limit.
    pub fn with_shared_limit(mut self, enable: bool) -> Self {
        self.enable_share_limit = enable && self.aggregator_factory.params().limit != -1;
        self
    }

    pub fn enable_share_limit(&self) -> bool {
        self.enable_share_limit
    }

    /// Keys still allowed before the fragment-wide limit is reached.
    pub fn shared_limit_countdown(&self) -> Arc<AtomicI64> {
        Arc::clone(&self.shared_limit_countdown)
    }

    /// Build a sink without boxing it, for callers that drive it directly.
    pub fn create_sink(&self, driver_id: DriverId) -> AggregateDistinctBlockingSinkOperator {
        let aggregator = self.aggregator_factory.get_or_create(driver_id);
        let source_observable = lock_aggregator(&aggregator).source_observable();
        AggregateDistinctBlockingSinkOperator {
            name: self.name.clone(),
            aggregator,
            source_observable,
            shared_limit_countdown: Arc::clone(&self.shared_limit_countdown),
            enable_share_limit: self.enable_share_limit,
            state: SinkState::Open,
            finishing_once: false,
            mem_tracker: None,
            profiles: None,
        }
    }
}

impl OperatorFactory for AggregateDistinctBlockingSinkFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _dop: i32, driver_id: DriverId) -> Box<dyn Operator> {
        Box::new(self.create_sink(driver_id))
    }

    fn is_sink(&self) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkState {
    Open,
    Accepting,
    Finishing,
    Finished,
    Closed,
}

pub struct AggregateDistinctBlockingSinkOperator {
    name: String,
    aggregator: AggregatorPtr,
    source_observable: Arc<Observable>,
    shared_limit_countdown: Arc<AtomicI64>,
    enable_share_limit: bool,
    state: SinkState,
    finishing_once: bool,
    mem_tracker: Option<Arc<MemTracker>>,
    profiles: Option<OperatorProfiles>,
}

impl AggregateDistinctBlockingSinkOperator {
    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn aggregator(&self) -> &AggregatorPtr {
        &self.aggregator
    }

    fn unique_metrics(&self) -> Option<&RuntimeProfile> {
        self.profiles.as_ref().map(|p| &p.unique)
    }

    fn limit_reached(&self) -> bool {
        let aggregator = lock_aggregator(&self.aggregator);
        let limit = aggregator.limit();
        if limit == -1 {
            return false;
        }
        let size = i64::try_from(aggregator.hash_set_size()).unwrap_or(i64::MAX);
        size >= limit
            || (self.enable_share_limit && self.shared_limit_countdown.load(Ordering::Relaxed) <= 0)
    }

    /// Finalize the key set unless the query was cancelled. The caller records
    /// the bookkeeping regardless of the outcome.
    fn finalize_hash_set(
        aggregator: &mut Aggregator,
        state: &RuntimeState,
        unique: Option<&RuntimeProfile>,
    ) -> Result<()> {
        if state.is_cancelled() {
            debug!("distinct sink finishing on cancelled query, skip cursor positioning");
            return Ok(());
        }
        let size = aggregator.hash_set_size();
        if let Some(unique) = unique {
            unique.counter_set(
                "HashTableSize",
                TUnit::Unit,
                i64::try_from(size).unwrap_or(i64::MAX),
            );
        }
        if size == 0 {
            aggregator.set_ht_eos();
        }
        aggregator.position_cursor()
    }
}

impl Operator for AggregateDistinctBlockingSinkOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        self.mem_tracker = Some(tracker);
    }

    fn set_profiles(&mut self, profiles: OperatorProfiles) {
        self.profiles = Some(profiles);
    }

    fn prepare(&mut self) -> Result<()> {
        if self.state != SinkState::Open {
            return Err(internal!("{} prepared twice (state={:?})", self.name, self.state));
        }
        let hash_set_tracker = self
            .mem_tracker
            .as_ref()
            .map(|parent| MemTracker::new_child("HashSet", parent));
        lock_aggregator(&self.aggregator).prepare(hash_set_tracker)?;
        self.state = SinkState::Accepting;
        debug!("{} prepared", self.name);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.state == SinkState::Closed {
            return Ok(());
        }
        let mut aggregator = lock_aggregator(&self.aggregator);
        if let Some(unique) = self.unique_metrics() {
            unique.counter_set(
                "HashTableMemoryUsage",
                TUnit::Bytes,
                i64::try_from(aggregator.hash_set_memory_usage()).unwrap_or(i64::MAX),
            );
        }
        aggregator.unref();
        drop(aggregator);
        if let (Some(profiles), Some(tracker)) = (self.profiles.as_ref(), self.mem_tracker.as_ref()) {
            attach_mem_tracker_tree(&profiles.operator, tracker);
        }
        self.state = SinkState::Closed;
        debug!("{} closed", self.name);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        matches!(self.state, SinkState::Finished | SinkState::Closed)
    }

    fn as_processor_mut(&mut self) -> Option<&mut dyn ProcessorOperator> {
        Some(self)
    }

    fn as_processor_ref(&self) -> Option<&dyn ProcessorOperator> {
        Some(self)
    }
}

impl ProcessorOperator for AggregateDistinctBlockingSinkOperator {
    fn need_input(&self) -> bool {
        self.state == SinkState::Accepting
    }

    fn has_output(&self) -> bool {
        false
    }

    fn push_chunk(&mut self, state: &RuntimeState, chunk: Chunk) -> Result<()> {
        if self.state != SinkState::Accepting {
            return Err(internal!(
                "{} received a chunk in state {:?}",
                self.name,
                self.state
            ));
        }
        debug_assert!(chunk.len() <= state.chunk_size());

        if self.limit_reached() {
            debug!("{} reached its limit, finishing early", self.name);
            return self.set_finishing(state);
        }

        let _timer = self
            .unique_metrics()
            .map(|unique| unique.scoped_timer("HashTableBuildTime"));
        let num_rows = chunk.len();
        let mut aggregator = lock_aggregator(&self.aggregator);
        aggregator.evaluate_group_keys(&chunk)?;
        let inserted = aggregator.build_hash_set(num_rows)?;
        if self.enable_share_limit {
            self.shared_limit_countdown.fetch_sub(
                i64::try_from(inserted).unwrap_or(i64::MAX),
                Ordering::Relaxed,
            );
        }
        aggregator.try_convert_to_two_level_set()?;
        aggregator.update_num_input_rows(num_rows);
        Ok(())
    }

    fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>> {
        Err(ExecError::NotSupported(format!(
            "{} does not produce output",
            self.name
        )))
    }

    fn set_finishing(&mut self, state: &RuntimeState) -> Result<()> {
        if self.finishing_once {
            return Ok(());
        }
        self.finishing_once = true;
        // Dropped last, after the aggregator lock is released.
        let notify = self.source_observable.defer_notify();
        self.state = SinkState::Finishing;

        let result = {
            let mut aggregator = lock_aggregator(&self.aggregator);
            let unique = self.profiles.as_ref().map(|p| &p.unique);
            let result = Self::finalize_hash_set(&mut aggregator, state, unique);
            if let Some(unique) = unique {
                unique.counter_set("InputRowCount", TUnit::Unit, aggregator.num_input_rows());
            }
            aggregator.sink_complete();
            result
        };

        self.state = SinkState::Finished;
        notify.arm();
        debug!("{} finished", self.name);
        result
    }

    fn reset_state(&mut self, state: &RuntimeState, refill_chunks: Vec<Chunk>) -> Result<()> {
        if matches!(self.state, SinkState::Open | SinkState::Closed) {
            return Err(internal!(
                "{} cannot reset in state {:?}",
                self.name,
                self.state
            ));
        }
        self.state = SinkState::Accepting;
        self.finishing_once = false;
        lock_aggregator(&self.aggregator).reset_state()?;
        let num_refill = refill_chunks.len();
        for chunk in refill_chunks {
            // A replayed chunk may hit the limit and finish the sink.
            if !self.need_input() {
                break;
            }
            self.push_chunk(state, chunk)?;
        }
        debug!("{} reset with {} refill chunks", self.name, num_refill);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ids::SlotId;
    use crate::exec::expr::ExprArena;
    use crate::exec::operators::aggregate::aggregator::AggregatorParams;
    use arrow::array::Int64Array;
    use arrow::datatypes::DataType;
    use std::sync::atomic::AtomicUsize;

    fn factory(limit: i64) -> AggregateDistinctBlockingSinkFactory {
        let mut arena = ExprArena::default();
        let k = arena.slot(SlotId(1), DataType::Int64);
        let params =
            AggregatorParams::new(Arc::new(arena), vec![k], vec![SlotId(2)]).with_limit(limit);
        AggregateDistinctBlockingSinkFactory::new(Arc::new(AggregatorFactory::new(params)), 7)
    }

    fn chunk(values: Vec<i64>) -> Chunk {
        Chunk::try_from_columns(vec![(
            SlotId(1),
            "k".to_string(),
            Arc::new(Int64Array::from(values)),
        )])
        .expect("chunk")
    }

    #[test]
    fn factory_name_carries_node_id() {
        let f = factory(-1);
        assert_eq!(f.name(), "AGGREGATE_DISTINCT_BLOCKING_SINK (id=7)");
        assert!(f.is_sink());
        assert!(!f.enable_share_limit());
    }

    #[test]
    fn state_machine_walks_open_to_closed() {
        let f = factory(-1);
        let mut sink = f.create_sink(0);
        let rt = RuntimeState::default();
        assert_eq!(sink.state(), SinkState::Open);
        let err = sink.push_chunk(&rt, chunk(vec![1])).expect_err("not prepared");
        assert!(matches!(err, ExecError::Internal(_)), "{err}");

        sink.prepare().expect("prepare");
        assert!(sink.need_input());
        sink.push_chunk(&rt, chunk(vec![1, 1, 2])).expect("push");
        sink.set_finishing(&rt).expect("finish");
        assert_eq!(sink.state(), SinkState::Finished);
        assert!(sink.is_finished());
        assert!(!sink.need_input());
        sink.close().expect("close");
        assert_eq!(sink.state(), SinkState::Closed);
    }

    #[test]
    fn finishing_twice_notifies_once() {
        let f = factory(-1);
        let mut sink = f.create_sink(0);
        let rt = RuntimeState::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        sink.source_observable.add_observer(Arc::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        sink.prepare().expect("prepare");
        sink.set_finishing(&rt).expect("finish");
        sink.set_finishing(&rt).expect("finish again");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(lock_aggregator(sink.aggregator()).is_ht_eos());
    }

    #[test]
    fn local_limit_short_circuits_push() {
        let f = factory(2).with_shared_limit(false);
        let mut sink = f.create_sink(0);
        let rt = RuntimeState::default();
        sink.prepare().expect("prepare");
        sink.push_chunk(&rt, chunk(vec![1, 2, 3])).expect("push");
        sink.push_chunk(&rt, chunk(vec![4, 5])).expect("push past limit");
        assert!(sink.is_finished());
        let aggregator = lock_aggregator(sink.aggregator());
        assert_eq!(aggregator.hash_set_size(), 3);
        assert!(aggregator.is_sink_complete());
        assert_eq!(f.shared_limit_countdown().load(Ordering::Relaxed), 2);
    }

    #[test]
    fn shared_countdown_tracks_new_keys() {
        let f = factory(10).with_shared_limit(true);
        let mut sink = f.create_sink(0);
        let rt = RuntimeState::default();
        sink.prepare().expect("prepare");
        sink.push_chunk(&rt, chunk(vec![1, 2, 2, 3])).expect("push");
        sink.push_chunk(&rt, chunk(vec![3, 4])).expect("push");
        assert_eq!(f.shared_limit_countdown().load(Ordering::Relaxed), 6);
    }

    #[test]
    fn pull_on_sink_is_not_supported() {
        let f = factory(-1);
        let mut sink = f.create_sink(0);
        let err = sink
            .pull_chunk(&RuntimeState::default())
            .expect_err("sink has no output");
        assert!(matches!(err, ExecError::NotSupported(_)), "{err}");
    }
}
