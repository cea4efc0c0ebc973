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
//! Distinct blocking aggregation operators.
//!
//! Responsibilities:
//! - `aggregator`: key-set state shared by a sink and its paired source.
//! - `distinct_blocking_sink`: consumes input until end of stream or limit.
//! - `distinct_blocking_source`: emits the distinct keys in bounded chunks.

pub mod aggregator;
pub mod distinct_blocking_sink;
pub mod distinct_blocking_source;

pub use aggregator::{Aggregator, AggregatorFactory, AggregatorParams, AggregatorPtr};
pub use distinct_blocking_sink::{
    AggregateDistinctBlockingSinkFactory, AggregateDistinctBlockingSinkOperator, SinkState,
};
pub use distinct_blocking_source::{
    AggregateDistinctBlockingSourceFactory, AggregateDistinctBlockingSourceOperator,
};
