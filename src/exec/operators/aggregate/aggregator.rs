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
//! Distinct-aggregation state shared by a blocking sink and its paired source.
//!
//! The sink evaluates group-by expressions and inserts the keys into a
//! `DistinctKeySet`; once input ends it positions the output cursor and marks
//! the sink complete. The source then drains the cursor chunk by chunk.
//! Both operators of one driver hold the same `AggregatorPtr`; the key set is
//! released when the last of them closes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use arrow::array::{Array, ArrayRef};
use arrow::datatypes::DataType;

use crate::common::config;
use crate::common::error::{ExecError, Result, eval_error, internal};
use crate::common::ids::{DriverId, SlotId};
use crate::exec::chunk::Chunk;
use crate::exec::expr::{ExprArena, ExprId};
use crate::exec::hash_table::hash_set::HashSetCursor;
use crate::exec::hash_table::hash_set_variant::DistinctKeySet;
use crate::exec::pipeline::schedule::observer::Observable;
use crate::novarocks_logging::{debug, info};
use crate::runtime::mem_tracker::MemTracker;

/// Plan-time description of a distinct aggregation.
#[derive(Clone, Debug)]
pub struct AggregatorParams {
    pub arena: Arc<ExprArena>,
    pub group_by: Vec<ExprId>,
    /// Slot id of each output column, one per group-by expression.
    pub output_slots: Vec<SlotId>,
    /// Row limit; -1 when unlimited.
    pub limit: i64,
    pub two_level_threshold_rows: usize,
    pub hash_set_initial_capacity: usize,
}

impl AggregatorParams {
    pub fn new(arena: Arc<ExprArena>, group_by: Vec<ExprId>, output_slots: Vec<SlotId>) -> Self {
        Self {
            arena,
            group_by,
            output_slots,
            limit: -1,
            two_level_threshold_rows: config::two_level_threshold_rows(),
            hash_set_initial_capacity: config::hash_set_initial_capacity(),
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_two_level_threshold_rows(mut self, rows: usize) -> Self {
        self.two_level_threshold_rows = rows.max(1);
        self
    }

    fn key_types(&self) -> Result<Vec<DataType>> {
        self.group_by
            .iter()
            .map(|id| {
                self.arena
                    .data_type(*id)
                    .cloned()
                    .ok_or_else(|| internal!("group-by expression {:?} not in arena", id))
            })
            .collect()
    }
}

pub type AggregatorPtr = Arc<Mutex<Aggregator>>;

/// Lock an aggregator, recovering the guard if a holder panicked.
pub fn lock_aggregator(aggregator: &AggregatorPtr) -> MutexGuard<'_, Aggregator> {
    aggregator.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Aggregator {
    params: Arc<AggregatorParams>,
    key_set: Option<DistinctKeySet>,
    group_by_columns: Vec<ArrayRef>,
    cursor: HashSetCursor,
    num_input_rows: i64,
    ht_eos: bool,
    sink_complete: bool,
    refs: usize,
    closed: bool,
    source_observable: Arc<Observable>,
    mem_tracker: Option<Arc<MemTracker>>,
    tracked_bytes: i64,
}

impl Aggregator {
    pub fn new(params: Arc<AggregatorParams>) -> Self {
        Self {
            params,
            key_set: None,
            group_by_columns: Vec::new(),
            cursor: HashSetCursor::default(),
            num_input_rows: 0,
            ht_eos: false,
            sink_complete: false,
            refs: 0,
            closed: false,
            source_observable: Arc::new(Observable::new()),
            mem_tracker: None,
            tracked_bytes: 0,
        }
    }

    pub fn params(&self) -> &AggregatorParams {
        &self.params
    }

    pub fn limit(&self) -> i64 {
        self.params.limit
    }

    /// Observable the paired source registers on; notified when the sink completes.
    pub fn source_observable(&self) -> Arc<Observable> {
        Arc::clone(&self.source_observable)
    }

    /// Create the key set on first call; later calls are no-ops.
    pub fn prepare(&mut self, mem_tracker: Option<Arc<MemTracker>>) -> Result<()> {
        if self.closed {
            return Err(internal!("prepare on a closed aggregator"));
        }
        if self.key_set.is_some() {
            return Ok(());
        }
        if self.params.output_slots.len() != self.params.group_by.len() {
            return Err(internal!(
                "distinct aggregation has {} group-by expressions but {} output slots",
                self.params.group_by.len(),
                self.params.output_slots.len()
            ));
        }
        let key_set =
            DistinctKeySet::new(self.params.key_types()?, self.params.hash_set_initial_capacity)?;
        debug!(
            "distinct aggregator prepared: strategy={:?} keys={}",
            key_set.strategy(),
            key_set.key_types().len()
        );
        self.key_set = Some(key_set);
        self.mem_tracker = mem_tracker;
        self.sync_mem_tracker()
    }

    fn key_set(&self) -> Result<&DistinctKeySet> {
        self.key_set
            .as_ref()
            .ok_or_else(|| internal!("distinct aggregator is not prepared"))
    }

    fn key_set_mut(&mut self) -> Result<&mut DistinctKeySet> {
        self.key_set
            .as_mut()
            .ok_or_else(|| internal!("distinct aggregator is not prepared"))
    }

    /// Evaluate every group-by expression against `chunk`. On failure nothing
    /// is kept from this chunk.
    pub fn evaluate_group_keys(&mut self, chunk: &Chunk) -> Result<()> {
        self.group_by_columns.clear();
        let mut columns = Vec::with_capacity(self.params.group_by.len());
        for (i, id) in self.params.group_by.iter().enumerate() {
            let column = self.params.arena.eval(*id, chunk)?;
            let declared = self.params.arena.data_type(*id);
            if Some(column.data_type()) != declared {
                return Err(eval_error!(
                    "group-by expression {} produced {:?}, declared {:?}",
                    i,
                    column.data_type(),
                    declared
                ));
            }
            columns.push(column);
        }
        self.group_by_columns = columns;
        Ok(())
    }

    /// Insert the evaluated group-by rows; returns how many keys were new.
    pub fn build_hash_set(&mut self, num_rows: usize) -> Result<usize> {
        debug_assert!(self.group_by_columns.iter().all(|c| c.len() == num_rows));
        let columns = std::mem::take(&mut self.group_by_columns);
        if columns.is_empty() {
            return Ok(0);
        }
        let inserted = self.key_set_mut()?.build(&columns);
        self.sync_mem_tracker()?;
        inserted
    }

    /// Promote to the sharded layout once the set holds enough keys.
    pub fn try_convert_to_two_level_set(&mut self) -> Result<()> {
        let threshold = self.params.two_level_threshold_rows;
        let key_set = self.key_set_mut()?;
        if key_set.is_two_level() || key_set.size() < threshold {
            return Ok(());
        }
        key_set.convert_to_two_level()?;
        info!(
            "distinct hash set converted to two-level: size={} threshold={}",
            key_set.size(),
            threshold
        );
        self.sync_mem_tracker()
    }

    /// Charge hash set growth to the tracker. Growth the tracker refuses is
    /// reported as memory exhaustion.
    fn sync_mem_tracker(&mut self) -> Result<()> {
        let Some(tracker) = self.mem_tracker.as_ref() else {
            return Ok(());
        };
        let usage = self
            .key_set
            .as_ref()
            .map_or(0, |s| i64::try_from(s.memory_usage()).unwrap_or(i64::MAX));
        let delta = usage - self.tracked_bytes;
        if delta < 0 {
            tracker.release(-delta);
        } else {
            tracker
                .try_consume(delta)
                .map_err(ExecError::OutOfMemory)?;
        }
        self.tracked_bytes = usage;
        Ok(())
    }

    pub fn update_num_input_rows(&mut self, rows: usize) {
        self.num_input_rows += i64::try_from(rows).unwrap_or(i64::MAX);
    }

    pub fn num_input_rows(&self) -> i64 {
        self.num_input_rows
    }

    pub fn hash_set_size(&self) -> usize {
        self.key_set.as_ref().map_or(0, DistinctKeySet::size)
    }

    pub fn hash_set_memory_usage(&self) -> usize {
        self.key_set.as_ref().map_or(0, DistinctKeySet::memory_usage)
    }

    pub fn is_two_level(&self) -> bool {
        self.key_set.as_ref().is_some_and(DistinctKeySet::is_two_level)
    }

    /// Mark that no more output will be produced.
    pub fn set_ht_eos(&mut self) {
        self.ht_eos = true;
    }

    pub fn is_ht_eos(&self) -> bool {
        self.ht_eos
    }

    pub fn position_cursor(&mut self) -> Result<()> {
        self.cursor = self.key_set()?.begin();
        Ok(())
    }

    pub fn sink_complete(&mut self) {
        self.sink_complete = true;
    }

    pub fn is_sink_complete(&self) -> bool {
        self.sink_complete
    }

    /// Decode up to `chunk_size` distinct keys as an output chunk.
    pub fn pull_output(&mut self, chunk_size: usize) -> Result<Option<Chunk>> {
        if self.ht_eos {
            return Ok(None);
        }
        let mut cursor = self.cursor;
        let key_set = self.key_set()?;
        if key_set.is_end(&cursor) {
            self.ht_eos = true;
            return Ok(None);
        }
        let arrays = key_set.emit(&mut cursor, chunk_size.max(1))?;
        let at_end = key_set.is_end(&cursor);
        self.cursor = cursor;
        if at_end {
            self.ht_eos = true;
        }
        let columns = self
            .params
            .output_slots
            .iter()
            .zip(arrays)
            .enumerate()
            .map(|(idx, (slot, array))| (*slot, format!("col_{idx}"), array))
            .collect();
        Ok(Some(Chunk::try_from_columns(columns)?))
    }

    /// Drop all keys and counters so the sink can consume input again.
    pub fn reset_state(&mut self) -> Result<()> {
        if self.closed {
            return Err(internal!("reset_state on a closed aggregator"));
        }
        self.key_set_mut()?.reset();
        self.group_by_columns.clear();
        self.cursor = HashSetCursor::default();
        self.num_input_rows = 0;
        self.ht_eos = false;
        self.sink_complete = false;
        self.sync_mem_tracker()
    }

    pub fn add_ref(&mut self) {
        self.refs += 1;
    }

    /// Drop one holder; the last one releases the key set.
    pub fn unref(&mut self) {
        self.refs = self.refs.saturating_sub(1);
        if self.refs == 0 {
            self.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.key_set = None;
        self.group_by_columns.clear();
        if let Some(tracker) = self.mem_tracker.as_ref() {
            tracker.release(self.tracked_bytes);
        }
        self.tracked_bytes = 0;
        debug!(
            "distinct aggregator closed: input_rows={}",
            self.num_input_rows
        );
    }
}

/// Hands out one aggregator per driver so the sink and source created for the
/// same `driver_id` share state.
pub struct AggregatorFactory {
    params: Arc<AggregatorParams>,
    aggregators: Mutex<HashMap<DriverId, AggregatorPtr>>,
}

impl AggregatorFactory {
    pub fn new(params: AggregatorParams) -> Self {
        Self {
            params: Arc::new(params),
            aggregators: Mutex::new(HashMap::new()),
        }
    }

    pub fn params(&self) -> &AggregatorParams {
        &self.params
    }

    /// Aggregator for `driver_id`, created on first request. Every call
    /// registers one more holder that must later `unref`.
    pub fn get_or_create(&self, driver_id: DriverId) -> AggregatorPtr {
        let mut guard = self.aggregators.lock().unwrap_or_else(|e| e.into_inner());
        let aggregator = guard
            .entry(driver_id)
            .or_insert_with(|| Arc::new(Mutex::new(Aggregator::new(Arc::clone(&self.params)))));
        lock_aggregator(aggregator).add_ref();
        Arc::clone(aggregator)
    }

    pub fn get(&self, driver_id: DriverId) -> Option<AggregatorPtr> {
        self.aggregators
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&driver_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{AsArray, Int32Array, StringArray};
    use arrow::datatypes::Int32Type;

    fn params() -> AggregatorParams {
        let mut arena = ExprArena::default();
        let k = arena.slot(SlotId(1), DataType::Int32);
        AggregatorParams::new(Arc::new(arena), vec![k], vec![SlotId(10)])
    }

    fn int_chunk(values: Vec<i32>) -> Chunk {
        Chunk::try_from_columns(vec![(
            SlotId(1),
            "k".to_string(),
            Arc::new(Int32Array::from(values)),
        )])
        .expect("chunk")
    }

    fn push(agg: &mut Aggregator, chunk: &Chunk) -> usize {
        agg.evaluate_group_keys(chunk).expect("eval");
        let n = agg.build_hash_set(chunk.len()).expect("build");
        agg.try_convert_to_two_level_set().expect("promote");
        agg.update_num_input_rows(chunk.len());
        n
    }

    #[test]
    fn builds_and_drains_distinct_keys() {
        let tracker = MemTracker::new_root("test");
        let mut agg = Aggregator::new(Arc::new(params()));
        agg.prepare(Some(Arc::clone(&tracker))).expect("prepare");
        assert_eq!(push(&mut agg, &int_chunk(vec![3, 1, 3, 2])), 3);
        assert_eq!(push(&mut agg, &int_chunk(vec![2, 4])), 1);
        assert_eq!(agg.hash_set_size(), 4);
        assert_eq!(agg.num_input_rows(), 6);
        assert_eq!(tracker.current() as usize, agg.hash_set_memory_usage());

        agg.position_cursor().expect("cursor");
        agg.sink_complete();
        let first = agg.pull_output(3).expect("pull").expect("chunk");
        assert_eq!(first.len(), 3);
        let col = first.column_by_slot_id(SlotId(10)).expect("output slot");
        assert_eq!(col.as_primitive::<Int32Type>().values(), &[3, 1, 2]);
        let second = agg.pull_output(3).expect("pull").expect("chunk");
        assert_eq!(second.len(), 1);
        assert!(agg.is_ht_eos());
        assert!(agg.pull_output(3).expect("pull").is_none());

        agg.add_ref();
        agg.unref();
        assert!(agg.is_closed());
        assert_eq!(tracker.current(), 0);
    }

    #[test]
    fn evaluation_failure_inserts_nothing() {
        let mut agg = Aggregator::new(Arc::new(params()));
        agg.prepare(None).expect("prepare");
        let wrong = Chunk::try_from_columns(vec![(
            SlotId(1),
            "k".to_string(),
            Arc::new(StringArray::from(vec!["a"])),
        )])
        .expect("chunk");
        let err = agg.evaluate_group_keys(&wrong).expect_err("type mismatch");
        assert!(matches!(err, ExecError::Evaluation(_)), "{err}");
        assert_eq!(agg.build_hash_set(0).expect("empty build"), 0);
        assert_eq!(agg.hash_set_size(), 0);
    }

    #[test]
    fn promotion_happens_at_threshold() {
        let p = params().with_two_level_threshold_rows(8);
        let mut agg = Aggregator::new(Arc::new(p));
        agg.prepare(None).expect("prepare");
        push(&mut agg, &int_chunk((0..7).collect()));
        assert!(!agg.is_two_level());
        push(&mut agg, &int_chunk((0..8).collect()));
        assert!(agg.is_two_level());
        assert_eq!(agg.hash_set_size(), 8);
    }

    #[test]
    fn memory_limit_surfaces_as_out_of_memory() {
        let tracker = MemTracker::new_root_with_limit("query", 64);
        let mut agg = Aggregator::new(Arc::new(params()));
        let err = agg.prepare(Some(tracker)).expect_err("initial table exceeds limit");
        assert!(err.is_out_of_memory(), "{err}");
    }

    #[test]
    fn reset_clears_keys_and_counters() {
        let mut agg = Aggregator::new(Arc::new(params()));
        agg.prepare(None).expect("prepare");
        push(&mut agg, &int_chunk(vec![1, 2, 3]));
        agg.position_cursor().expect("cursor");
        agg.set_ht_eos();
        agg.sink_complete();
        agg.reset_state().expect("reset");
        assert!(!agg.is_sink_complete());
        assert!(!agg.is_ht_eos());
        assert_eq!(agg.hash_set_size(), 0);
        assert_eq!(agg.num_input_rows(), 0);

        push(&mut agg, &int_chunk(vec![9, 9]));
        assert_eq!(agg.hash_set_size(), 1);
        assert_eq!(agg.num_input_rows(), 2);
    }

    #[test]
    fn factory_shares_one_aggregator_per_driver() {
        let factory = AggregatorFactory::new(params());
        let a = factory.get_or_create(0);
        let b = factory.get_or_create(0);
        let c = factory.get_or_create(1);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        lock_aggregator(&a).unref();
        assert!(!lock_aggregator(&b).is_closed());
        lock_aggregator(&b).unref();
        assert!(lock_aggregator(&a).is_closed());
    }
}
