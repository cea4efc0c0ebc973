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
use super::LiteralValue;
use arrow::array::{
    ArrayRef, BinaryArray, BooleanArray, Date32Array, Float32Array, Float64Array, Int8Array,
    Int16Array, Int32Array, Int64Array, NullArray, StringArray, new_null_array,
};
use arrow::datatypes::DataType;
use std::sync::Arc;

/// Broadcast a constant to `len` rows. A typed NULL keeps its declared type.
pub fn eval(value: &LiteralValue, declared: &DataType, len: usize) -> ArrayRef {
    match value {
        LiteralValue::Null if matches!(declared, DataType::Null) => Arc::new(NullArray::new(len)),
        LiteralValue::Null => new_null_array(declared, len),
        LiteralValue::Bool(v) => Arc::new(BooleanArray::from(vec![*v; len])),
        LiteralValue::Int8(v) => Arc::new(Int8Array::from(vec![*v; len])),
        LiteralValue::Int16(v) => Arc::new(Int16Array::from(vec![*v; len])),
        LiteralValue::Int32(v) => Arc::new(Int32Array::from(vec![*v; len])),
        LiteralValue::Int64(v) => Arc::new(Int64Array::from(vec![*v; len])),
        LiteralValue::Float32(v) => Arc::new(Float32Array::from(vec![*v; len])),
        LiteralValue::Float64(v) => Arc::new(Float64Array::from(vec![*v; len])),
        LiteralValue::Utf8(v) => Arc::new(StringArray::from(vec![v.as_str(); len])),
        LiteralValue::Binary(v) => {
            let values = std::iter::repeat_n(v.as_slice(), len).collect::<Vec<&[u8]>>();
            Arc::new(BinaryArray::from_vec(values))
        }
        LiteralValue::Date32(v) => Arc::new(Date32Array::from(vec![*v; len])),
    }
}

impl LiteralValue {
    pub fn data_type(&self) -> DataType {
        match self {
            LiteralValue::Null => DataType::Null,
            LiteralValue::Bool(_) => DataType::Boolean,
            LiteralValue::Int8(_) => DataType::Int8,
            LiteralValue::Int16(_) => DataType::Int16,
            LiteralValue::Int32(_) => DataType::Int32,
            LiteralValue::Int64(_) => DataType::Int64,
            LiteralValue::Float32(_) => DataType::Float32,
            LiteralValue::Float64(_) => DataType::Float64,
            LiteralValue::Utf8(_) => DataType::Utf8,
            LiteralValue::Binary(_) => DataType::Binary,
            LiteralValue::Date32(_) => DataType::Date32,
        }
    }
}
