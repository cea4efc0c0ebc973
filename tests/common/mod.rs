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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use arrow::array::{Array, ArrayRef, AsArray, Int64Array};
use arrow::datatypes::{DataType, Int64Type};

use novarocks_agg::common::ids::SlotId;
use novarocks_agg::exec::chunk::Chunk;
use novarocks_agg::exec::expr::ExprArena;
use novarocks_agg::exec::operators::aggregate::{
    AggregateDistinctBlockingSinkFactory, AggregateDistinctBlockingSourceFactory,
    AggregatorFactory, AggregatorParams,
};
use novarocks_agg::exec::pipeline::operator::{Operator, ProcessorOperator};
use novarocks_agg::novarocks_config;
use novarocks_agg::novarocks_logging;
use novarocks_agg::runtime::runtime_state::RuntimeState;

pub const KEY_SLOT: SlotId = SlotId(1);
pub const OUT_SLOT: SlotId = SlotId(100);

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a new test configuration with default settings.
    pub fn new() -> anyhow::Result<Self> {
        Self::with_content(
            r#"
log_level = "debug"

[runtime]
chunk_size = 1024

[aggregate]
two_level_threshold_rows = 64
hash_set_initial_capacity = 16
enable_pipeline_share_limit = false
"#,
        )
    }

    pub fn with_content(content: &str) -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_novarocks.toml");
        std::fs::write(&config_path, content)?;
        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Initialize logging for tests.
    pub fn init_logging(&self) {
        novarocks_logging::init_with_level("debug");
    }

    /// Load the test configuration.
    pub fn load_config(&self) -> anyhow::Result<&'static novarocks_config::NovaRocksConfig> {
        novarocks_config::init_from_path(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

/// Params grouping by a single nullable BIGINT slot.
pub fn int64_params() -> AggregatorParams {
    let mut arena = ExprArena::default();
    let k = arena.slot(KEY_SLOT, DataType::Int64);
    AggregatorParams::new(Arc::new(arena), vec![k], vec![OUT_SLOT])
}

pub fn int64_chunk(values: impl IntoIterator<Item = Option<i64>>) -> Chunk {
    let array: ArrayRef = Arc::new(Int64Array::from_iter(values));
    Chunk::try_from_columns(vec![(KEY_SLOT, "k".to_string(), array)]).expect("int64 chunk")
}

pub fn dense_chunk(range: std::ops::Range<i64>) -> Chunk {
    int64_chunk(range.map(Some))
}

/// Sink and source factories over one aggregator registry.
pub fn factories(
    params: AggregatorParams,
) -> (
    AggregateDistinctBlockingSinkFactory,
    AggregateDistinctBlockingSourceFactory,
) {
    let aggregators = Arc::new(AggregatorFactory::new(params));
    (
        AggregateDistinctBlockingSinkFactory::new(Arc::clone(&aggregators), 1),
        AggregateDistinctBlockingSourceFactory::new(aggregators, 1),
    )
}

/// Pull every chunk the source produces.
pub fn drain(source: &mut dyn ProcessorOperator, state: &RuntimeState) -> Vec<Chunk> {
    let mut out = Vec::new();
    while source.has_output() {
        match source.pull_chunk(state).expect("pull") {
            Some(chunk) => out.push(chunk),
            None => break,
        }
    }
    out
}

/// Flatten the BIGINT output column of `chunks`.
pub fn int64_values(chunks: &[Chunk]) -> Vec<Option<i64>> {
    let mut values = Vec::new();
    for chunk in chunks {
        let column = chunk.column_by_slot_id(OUT_SLOT).expect("output slot");
        let column = column.as_primitive::<Int64Type>();
        values.extend(column.iter());
    }
    values
}

/// Run `f` and fail the test if it does not finish within `timeout`.
pub fn run_with_timeout<F, T>(timeout: Duration, f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });

    match rx.recv_timeout(timeout) {
        Ok(v) => v,
        Err(_) => panic!("test timed out after {:?}", timeout),
    }
}

/// Assert that a result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is Err.
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => e,
        }
    };
}
