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
use crate::novarocks_config::config as novarocks_app_config;

pub(crate) fn chunk_size() -> usize {
    novarocks_app_config()
        .ok()
        .map(|c| c.runtime.chunk_size)
        .unwrap_or(4096)
}

pub(crate) fn two_level_threshold_rows() -> usize {
    novarocks_app_config()
        .ok()
        .map(|c| c.aggregate.two_level_threshold_rows)
        .unwrap_or(512 * 1024)
}

pub(crate) fn hash_set_initial_capacity() -> usize {
    novarocks_app_config()
        .ok()
        .map(|c| c.aggregate.hash_set_initial_capacity)
        .unwrap_or(256)
}

pub(crate) fn enable_pipeline_share_limit() -> bool {
    novarocks_app_config()
        .ok()
        .map(|c| c.aggregate.enable_pipeline_share_limit)
        .unwrap_or(true)
}
