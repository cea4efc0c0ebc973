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
//! Source half of the distinct blocking aggregation: streams the keys
//! collected by the paired sink once it has completed.

use std::sync::Arc;

use crate::common::error::{ExecError, Result, internal};
use crate::common::ids::DriverId;
use crate::exec::chunk::Chunk;
use crate::exec::pipeline::operator::{Operator, ProcessorOperator};
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::exec::pipeline::schedule::observer::Observable;
use crate::novarocks_logging::debug;
use crate::runtime::profile::{OperatorProfiles, TUnit};
use crate::runtime::runtime_state::RuntimeState;

use super::aggregator::{AggregatorFactory, AggregatorPtr, lock_aggregator};

const OPERATOR_NAME: &str = "AGGREGATE_DISTINCT_BLOCKING_SOURCE";

pub struct AggregateDistinctBlockingSourceFactory {
    name: String,
    aggregator_factory: Arc<AggregatorFactory>,
}

impl AggregateDistinctBlockingSourceFactory {
    pub fn new(aggregator_factory: Arc<AggregatorFactory>, node_id: i32) -> Self {
        let name = if node_id >= 0 {
            format!("{OPERATOR_NAME} (id={node_id})")
        } else {
            OPERATOR_NAME.to_string()
        };
        Self {
            name,
            aggregator_factory,
        }
    }

    pub fn create_source(&self, driver_id: DriverId) -> AggregateDistinctBlockingSourceOperator {
        let aggregator = self.aggregator_factory.get_or_create(driver_id);
        let observable = lock_aggregator(&aggregator).source_observable();
        AggregateDistinctBlockingSourceOperator {
            name: self.name.clone(),
            aggregator,
            observable,
            finished: false,
            closed: false,
            profiles: None,
        }
    }
}

impl OperatorFactory for AggregateDistinctBlockingSourceFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _dop: i32, driver_id: DriverId) -> Box<dyn Operator> {
        Box::new(self.create_source(driver_id))
    }

    fn is_source(&self) -> bool {
        true
    }
}

pub struct AggregateDistinctBlockingSourceOperator {
    name: String,
    aggregator: AggregatorPtr,
    observable: Arc<Observable>,
    finished: bool,
    closed: bool,
    profiles: Option<OperatorProfiles>,
}

impl Operator for AggregateDistinctBlockingSourceOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_profiles(&mut self, profiles: OperatorProfiles) {
        self.profiles = Some(profiles);
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        lock_aggregator(&self.aggregator).unref();
        Ok(())
    }

    fn is_finished(&self) -> bool {
        if self.finished {
            return true;
        }
        let aggregator = lock_aggregator(&self.aggregator);
        aggregator.is_sink_complete() && aggregator.is_ht_eos()
    }

    fn as_processor_mut(&mut self) -> Option<&mut dyn ProcessorOperator> {
        Some(self)
    }

    fn as_processor_ref(&self) -> Option<&dyn ProcessorOperator> {
        Some(self)
    }
}

impl ProcessorOperator for AggregateDistinctBlockingSourceOperator {
    fn need_input(&self) -> bool {
        false
    }

    fn has_output(&self) -> bool {
        if self.finished {
            return false;
        }
        let aggregator = lock_aggregator(&self.aggregator);
        aggregator.is_sink_complete() && !aggregator.is_ht_eos()
    }

    fn push_chunk(&mut self, _state: &RuntimeState, _chunk: Chunk) -> Result<()> {
        Err(ExecError::NotSupported(format!(
            "{} does not accept input",
            self.name
        )))
    }

    fn pull_chunk(&mut self, state: &RuntimeState) -> Result<Option<Chunk>> {
        if self.finished {
            return Ok(None);
        }
        // Cancelled sinks complete without positioning the cursor.
        if state.is_cancelled() {
            self.finished = true;
            return Ok(None);
        }
        let mut aggregator = lock_aggregator(&self.aggregator);
        if !aggregator.is_sink_complete() {
            return Ok(None);
        }
        let chunk = aggregator.pull_output(state.chunk_size())?;
        if aggregator.is_ht_eos() {
            self.finished = true;
            debug!(
                "{} drained {} distinct keys",
                self.name,
                aggregator.hash_set_size()
            );
        }
        drop(aggregator);

        if let (Some(profiles), Some(chunk)) = (self.profiles.as_ref(), chunk.as_ref()) {
            profiles.common.counter_add("PullChunkNum", TUnit::Unit, 1);
            profiles.common.counter_add(
                "PullRowNum",
                TUnit::Unit,
                i64::try_from(chunk.len()).unwrap_or(i64::MAX),
            );
        }
        Ok(chunk)
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    fn source_observable(&self) -> Option<Arc<Observable>> {
        Some(Arc::clone(&self.observable))
    }

    /// Rearm after the paired sink was reset; output resumes once the sink
    /// completes again.
    fn reset_state(&mut self, _state: &RuntimeState, _refill_chunks: Vec<Chunk>) -> Result<()> {
        if self.closed {
            return Err(internal!("{} cannot reset after close", self.name));
        }
        self.finished = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ids::SlotId;
    use crate::exec::expr::ExprArena;
    use crate::exec::operators::aggregate::AggregateDistinctBlockingSinkFactory;
    use crate::exec::operators::aggregate::aggregator::AggregatorParams;
    use arrow::array::StringArray;
    use arrow::datatypes::DataType;

    fn aggregator_factory() -> Arc<AggregatorFactory> {
        let mut arena = ExprArena::default();
        let k = arena.slot(SlotId(1), DataType::Utf8);
        Arc::new(AggregatorFactory::new(AggregatorParams::new(
            Arc::new(arena),
            vec![k],
            vec![SlotId(5)],
        )))
    }

    #[test]
    fn source_waits_for_sink_then_drains() {
        let agg = aggregator_factory();
        let sinks = AggregateDistinctBlockingSinkFactory::new(Arc::clone(&agg), 1);
        let sources = AggregateDistinctBlockingSourceFactory::new(Arc::clone(&agg), 1);
        assert!(sources.is_source());
        let mut sink = sinks.create_sink(3);
        let mut source = sources.create_source(3);
        let rt = RuntimeState::new(2, None);

        sink.prepare().expect("prepare");
        source.prepare().expect("prepare");
        assert!(!source.has_output());

        let chunk = Chunk::try_from_columns(vec![(
            SlotId(1),
            "k".to_string(),
            Arc::new(StringArray::from(vec![Some("a"), None])),
        )])
        .expect("chunk");
        sink.push_chunk(&rt, chunk.clone()).expect("push");
        sink.push_chunk(&rt, chunk).expect("push");
        sink.set_finishing(&rt).expect("finish");
        sink.close().expect("close sink");

        assert!(source.has_output());
        let out = source.pull_chunk(&rt).expect("pull").expect("chunk");
        assert_eq!(out.len(), 2);
        assert!(out.column_by_slot_id(SlotId(5)).is_ok());
        assert!(source.is_finished());
        assert!(!source.has_output());
        assert!(source.pull_chunk(&rt).expect("pull").is_none());
        source.close().expect("close source");
        assert!(lock_aggregator(&source.aggregator).is_closed());
    }

    #[test]
    fn push_on_source_is_not_supported() {
        let mut source = AggregateDistinctBlockingSourceFactory::new(aggregator_factory(), -1)
            .create_source(0);
        let err = source
            .push_chunk(&RuntimeState::default(), Chunk::default())
            .expect_err("source takes no input");
        assert!(matches!(err, ExecError::NotSupported(_)), "{err}");
        assert_eq!(source.name(), OPERATOR_NAME);
    }
}
