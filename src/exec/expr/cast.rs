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
use super::{ExprArena, ExprId};
use crate::common::error::{Result, eval_error};
use crate::exec::chunk::Chunk;
use arrow::array::{Array, ArrayRef};
use arrow::compute::{CastOptions, can_cast_types, cast_with_options};
use arrow::datatypes::DataType;

/// Checked cast: a value that does not fit the target type is an evaluation
/// error rather than a silent NULL.
pub(super) fn eval(arena: &ExprArena, id: ExprId, child: ExprId, chunk: &Chunk) -> Result<ArrayRef> {
    let input = arena.eval(child, chunk)?;
    let target = arena
        .data_type(id)
        .cloned()
        .ok_or_else(|| eval_error!("cast expression {:?} has no target type", id))?;
    cast_checked(&input, &target)
}

pub(crate) fn cast_checked(input: &ArrayRef, target: &DataType) -> Result<ArrayRef> {
    if input.data_type() == target {
        return Ok(input.clone());
    }
    if !can_cast_types(input.data_type(), target) {
        return Err(eval_error!(
            "unsupported cast from {:?} to {:?}",
            input.data_type(),
            target
        ));
    }
    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    cast_with_options(input.as_ref(), target, &options).map_err(|e| {
        eval_error!(
            "cast failed from {:?} to {:?}: {}",
            input.data_type(),
            target,
            e
        )
    })
}
