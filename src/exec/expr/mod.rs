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
//! Group-by expression arena.
//!
//! Expressions are stored flat and addressed by `ExprId`; each node carries a
//! declared output type. Only the shapes a group-by list needs are supported:
//! slot references, constants and checked casts.

mod cast;
mod literal;

use crate::common::error::{Result, eval_error};
use crate::common::ids::SlotId;
use crate::exec::chunk::Chunk;
use arrow::array::{Array, ArrayRef};
use arrow::datatypes::DataType;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ExprId(pub usize);

#[derive(Clone, Debug, PartialEq)]
pub enum LiteralValue {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Utf8(String),
    Binary(Vec<u8>),
    Date32(i32),
}

#[derive(Clone, Debug)]
pub enum ExprNode {
    Literal(LiteralValue),
    /// Column of the input chunk.
    SlotId(SlotId),
    /// Cast the child to the node's declared type.
    Cast(ExprId),
}

#[derive(Clone, Debug, Default)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
    types: Vec<DataType>,
}

impl ExprArena {
    pub fn push_typed(&mut self, node: ExprNode, data_type: DataType) -> ExprId {
        let id = ExprId(self.nodes.len());
        self.nodes.push(node);
        self.types.push(data_type);
        id
    }

    pub fn slot(&mut self, slot_id: SlotId, data_type: DataType) -> ExprId {
        self.push_typed(ExprNode::SlotId(slot_id), data_type)
    }

    pub fn literal(&mut self, value: LiteralValue) -> ExprId {
        let data_type = value.data_type();
        self.push_typed(ExprNode::Literal(value), data_type)
    }

    pub fn cast(&mut self, child: ExprId, target: DataType) -> ExprId {
        self.push_typed(ExprNode::Cast(child), target)
    }

    pub fn node(&self, id: ExprId) -> Option<&ExprNode> {
        self.nodes.get(id.0)
    }

    pub fn data_type(&self, id: ExprId) -> Option<&DataType> {
        self.types.get(id.0)
    }

    /// Evaluate `id` against `chunk`, yielding one value per row.
    pub fn eval(&self, id: ExprId, chunk: &Chunk) -> Result<ArrayRef> {
        let node = self
            .nodes
            .get(id.0)
            .ok_or_else(|| eval_error!("invalid expression id {:?}", id))?;
        let out = match node {
            ExprNode::Literal(v) => {
                let declared = self.data_type(id).cloned().unwrap_or(DataType::Null);
                literal::eval(v, &declared, chunk.len())
            }
            ExprNode::SlotId(slot_id) => chunk
                .column_by_slot_id(*slot_id)
                .map_err(|e| eval_error!("{}", e))?,
            ExprNode::Cast(child) => cast::eval(self, id, *child, chunk)?,
        };
        if out.len() != chunk.len() {
            return Err(eval_error!(
                "expression {:?} produced {} rows for a chunk of {}",
                id,
                out.len(),
                chunk.len()
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::ExecError;
    use arrow::array::{Int32Array, Int64Array, StringArray};
    use std::sync::Arc;

    fn chunk() -> Chunk {
        Chunk::try_from_columns(vec![
            (SlotId(1), "a".to_string(), Arc::new(Int32Array::from(vec![1, 2, 3]))),
            (
                SlotId(2),
                "s".to_string(),
                Arc::new(StringArray::from(vec!["7", "x", "9"])),
            ),
        ])
        .expect("chunk")
    }

    #[test]
    fn typed_null_literal_uses_declared_type() {
        let mut arena = ExprArena::default();
        let expr = arena.push_typed(ExprNode::Literal(LiteralValue::Null), DataType::Utf8);
        let arr = arena.eval(expr, &chunk()).expect("eval");
        assert_eq!(arr.data_type(), &DataType::Utf8);
        assert_eq!(arr.len(), 3);
        assert!(arr.is_null(0));
    }

    #[test]
    fn slot_and_widening_cast() {
        let mut arena = ExprArena::default();
        let a = arena.slot(SlotId(1), DataType::Int32);
        let wide = arena.cast(a, DataType::Int64);
        let arr = arena.eval(wide, &chunk()).expect("eval");
        let arr = arr.as_any().downcast_ref::<Int64Array>().expect("int64");
        assert_eq!(arr.values(), &[1i64, 2, 3]);
    }

    #[test]
    fn failing_cast_is_evaluation_error() {
        let mut arena = ExprArena::default();
        let s = arena.slot(SlotId(2), DataType::Utf8);
        let n = arena.cast(s, DataType::Int32);
        let err = arena.eval(n, &chunk()).expect_err("'x' is not a number");
        assert!(matches!(err, ExecError::Evaluation(_)), "{err}");
    }

    #[test]
    fn missing_slot_is_evaluation_error() {
        let mut arena = ExprArena::default();
        let missing = arena.slot(SlotId(42), DataType::Int32);
        let err = arena.eval(missing, &chunk()).expect_err("missing slot");
        assert!(matches!(err, ExecError::Evaluation(_)), "{err}");
    }
}
