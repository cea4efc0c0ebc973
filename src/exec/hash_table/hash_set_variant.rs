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
//! Group-key encoding in front of the generic distinct set.
//!
//! The strategy is picked once from the key column types; every chunk is then
//! encoded into the matching key representation and inserted into the
//! matching `DistinctHashSet` instantiation. Output goes the other way: keys
//! under a cursor are decoded back into Arrow arrays of the original types.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, NullArray, PrimitiveArray, StringArray,
    TimestampMicrosecondArray, TimestampMillisecondArray, TimestampNanosecondArray,
    TimestampSecondArray,
};
use arrow::datatypes::{
    DataType, Date32Type, Float32Type, Float64Type, Int8Type, Int16Type, Int32Type, Int64Type,
    TimeUnit, TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType,
};
use arrow::row::{RowConverter, SortField};

use crate::common::bit_util;
use crate::common::error::{ExecError, Result, internal};
use crate::exec::hash_table::hash::{
    DEFAULT_HASH_SEED, canonical_f32_bits, canonical_f64_bits, combine_hash,
    hash_bytes_with_seed, hash_null_with_seed, hash_u64_with_seed,
};
use crate::exec::hash_table::hash_set::{DistinctHashSet, DistinctKey, HashSetCursor};
use crate::exec::hash_table::key_strategy::{
    FIXED_KEY_BYTES, GroupKeyStrategy, fixed_width_size, null_bitmap_bytes,
    pick_group_key_strategy,
};

/// Composite fixed-width key: null bitmap followed by big-endian values.
pub type FixedKey = [u8; FIXED_KEY_BYTES];

impl DistinctKey for Option<i64> {
    fn hash_with_seed(&self, seed: u64) -> u64 {
        match self {
            Some(v) => hash_u64_with_seed(seed, *v as u64),
            None => hash_null_with_seed(seed),
        }
    }
}

impl DistinctKey for Option<Box<str>> {
    fn hash_with_seed(&self, seed: u64) -> u64 {
        match self {
            Some(s) => hash_bytes_with_seed(seed, s.as_bytes()),
            None => hash_null_with_seed(seed),
        }
    }

    fn heap_bytes(&self) -> usize {
        self.as_ref().map_or(0, |s| s.len())
    }
}

impl DistinctKey for FixedKey {
    fn hash_with_seed(&self, seed: u64) -> u64 {
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&self[..8]);
        hi.copy_from_slice(&self[8..]);
        combine_hash(
            hash_u64_with_seed(seed, u64::from_ne_bytes(lo)),
            hash_u64_with_seed(seed, u64::from_ne_bytes(hi)),
        )
    }
}

impl DistinctKey for Box<[u8]> {
    fn hash_with_seed(&self, seed: u64) -> u64 {
        hash_bytes_with_seed(seed, self)
    }

    fn heap_bytes(&self) -> usize {
        self.len()
    }
}

pub enum HashSetVariant {
    OneNumber(DistinctHashSet<Option<i64>>),
    OneString(DistinctHashSet<Option<Box<str>>>),
    FixedSize(DistinctHashSet<FixedKey>),
    Serialized(DistinctHashSet<Box<[u8]>>),
}

macro_rules! with_set {
    ($variant:expr, $set:ident => $body:expr) => {
        match $variant {
            HashSetVariant::OneNumber($set) => $body,
            HashSetVariant::OneString($set) => $body,
            HashSetVariant::FixedSize($set) => $body,
            HashSetVariant::Serialized($set) => $body,
        }
    };
}

impl HashSetVariant {
    fn new(strategy: GroupKeyStrategy, capacity: usize) -> Self {
        match strategy {
            GroupKeyStrategy::OneNumber => {
                Self::OneNumber(DistinctHashSet::with_capacity(capacity, DEFAULT_HASH_SEED))
            }
            GroupKeyStrategy::OneString => {
                Self::OneString(DistinctHashSet::with_capacity(capacity, DEFAULT_HASH_SEED))
            }
            GroupKeyStrategy::FixedSize => {
                Self::FixedSize(DistinctHashSet::with_capacity(capacity, DEFAULT_HASH_SEED))
            }
            GroupKeyStrategy::Serialized => {
                Self::Serialized(DistinctHashSet::with_capacity(capacity, DEFAULT_HASH_SEED))
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct FixedSlot {
    offset: usize,
    width: usize,
}

/// Distinct set over rows of group-key columns.
pub struct DistinctKeySet {
    strategy: GroupKeyStrategy,
    key_types: Vec<DataType>,
    initial_capacity: usize,
    variant: HashSetVariant,
    fixed_slots: Vec<FixedSlot>,
    row_converter: Option<RowConverter>,
}

impl DistinctKeySet {
    pub fn new(key_types: Vec<DataType>, initial_capacity: usize) -> Result<Self> {
        if key_types.is_empty() {
            return Err(ExecError::NotSupported(
                "distinct aggregation without group-by keys".to_string(),
            ));
        }
        let strategy = pick_group_key_strategy(&key_types);

        let mut fixed_slots = Vec::new();
        if strategy == GroupKeyStrategy::FixedSize {
            let mut offset = null_bitmap_bytes(key_types.len());
            for data_type in &key_types {
                let width = fixed_width_size(data_type)
                    .ok_or_else(|| internal!("{:?} is not a fixed-width key", data_type))?;
                fixed_slots.push(FixedSlot { offset, width });
                offset += width;
            }
        }

        let row_converter = if strategy == GroupKeyStrategy::Serialized {
            let fields = key_types.iter().cloned().map(SortField::new).collect();
            Some(RowConverter::new(fields).map_err(|e| {
                ExecError::NotSupported(format!("group-by key types {:?}: {}", key_types, e))
            })?)
        } else {
            None
        };

        Ok(Self {
            strategy,
            variant: HashSetVariant::new(strategy, initial_capacity),
            key_types,
            initial_capacity,
            fixed_slots,
            row_converter,
        })
    }

    pub fn strategy(&self) -> GroupKeyStrategy {
        self.strategy
    }

    pub fn key_types(&self) -> &[DataType] {
        &self.key_types
    }

    pub fn size(&self) -> usize {
        with_set!(&self.variant, set => set.len())
    }

    pub fn is_two_level(&self) -> bool {
        with_set!(&self.variant, set => set.is_two_level())
    }

    pub fn convert_to_two_level(&mut self) -> Result<()> {
        with_set!(&mut self.variant, set => set.convert_to_two_level())
    }

    pub fn memory_usage(&self) -> usize {
        with_set!(&self.variant, set => set.memory_usage())
    }

    pub fn begin(&self) -> HashSetCursor {
        with_set!(&self.variant, set => set.begin())
    }

    pub fn is_end(&self, cursor: &HashSetCursor) -> bool {
        with_set!(&self.variant, set => set.is_end(cursor))
    }

    /// Drop every key and start over with a fresh single-level set.
    pub fn reset(&mut self) {
        self.variant = HashSetVariant::new(self.strategy, self.initial_capacity);
    }

    /// Insert the rows of `columns`; returns how many keys were new.
    pub fn build(&mut self, columns: &[ArrayRef]) -> Result<usize> {
        self.check_columns(columns)?;
        match &mut self.variant {
            HashSetVariant::OneNumber(set) => set.insert_all(numeric_key_values(&columns[0])?),
            HashSetVariant::OneString(set) => {
                let strings = columns[0].as_string::<i32>();
                set.insert_all(strings.iter().map(|v| v.map(Box::<str>::from)))
            }
            HashSetVariant::FixedSize(set) => {
                set.insert_all(pack_fixed_keys(columns, &self.fixed_slots)?)
            }
            HashSetVariant::Serialized(set) => {
                let converter = self
                    .row_converter
                    .as_ref()
                    .ok_or_else(|| internal!("serialized key set without row converter"))?;
                let rows = converter.convert_columns(columns)?;
                set.insert_all(rows.iter().map(|row| Box::<[u8]>::from(row.as_ref())))
            }
        }
    }

    /// Decode up to `max_rows` keys from `cursor` into one array per key column.
    pub fn emit(&self, cursor: &mut HashSetCursor, max_rows: usize) -> Result<Vec<ArrayRef>> {
        match &self.variant {
            HashSetVariant::OneNumber(set) => {
                let mut values = Vec::with_capacity(max_rows);
                set.next_batch(cursor, max_rows, |k| values.push(*k));
                Ok(vec![numeric_key_array(&values, &self.key_types[0])?])
            }
            HashSetVariant::OneString(set) => {
                let mut values: Vec<Option<&str>> = Vec::with_capacity(max_rows);
                set.next_batch(cursor, max_rows, |k| values.push(k.as_deref()));
                Ok(vec![Arc::new(StringArray::from(values)) as ArrayRef])
            }
            HashSetVariant::FixedSize(set) => {
                let mut keys = Vec::with_capacity(max_rows);
                set.next_batch(cursor, max_rows, |k| keys.push(*k));
                unpack_fixed_keys(&keys, &self.fixed_slots, &self.key_types)
            }
            HashSetVariant::Serialized(set) => {
                let converter = self
                    .row_converter
                    .as_ref()
                    .ok_or_else(|| internal!("serialized key set without row converter"))?;
                let parser = converter.parser();
                let mut rows = Vec::with_capacity(max_rows);
                set.next_batch(cursor, max_rows, |k| rows.push(parser.parse(k)));
                Ok(converter.convert_rows(rows)?)
            }
        }
    }

    fn check_columns(&self, columns: &[ArrayRef]) -> Result<()> {
        if columns.len() != self.key_types.len() {
            return Err(internal!(
                "expected {} group-by columns, got {}",
                self.key_types.len(),
                columns.len()
            ));
        }
        for (i, (column, expected)) in columns.iter().zip(&self.key_types).enumerate() {
            if column.data_type() != expected {
                return Err(internal!(
                    "group-by column {} has type {:?}, expected {:?}",
                    i,
                    column.data_type(),
                    expected
                ));
            }
        }
        Ok(())
    }
}

/// Fixed-width column values widened to `i64`. Floats keep their canonical
/// bit pattern so NaNs collapse into one key.
fn numeric_key_values(array: &ArrayRef) -> Result<Vec<Option<i64>>> {
    macro_rules! widen {
        ($t:ty) => {
            array
                .as_primitive::<$t>()
                .iter()
                .map(|v| v.map(i64::from))
                .collect()
        };
    }
    let values = match array.data_type() {
        DataType::Null => vec![None; array.len()],
        DataType::Boolean => array.as_boolean().iter().map(|v| v.map(i64::from)).collect(),
        DataType::Int8 => widen!(Int8Type),
        DataType::Int16 => widen!(Int16Type),
        DataType::Int32 => widen!(Int32Type),
        DataType::Int64 => widen!(Int64Type),
        DataType::Date32 => widen!(Date32Type),
        DataType::Timestamp(TimeUnit::Second, _) => widen!(TimestampSecondType),
        DataType::Timestamp(TimeUnit::Millisecond, _) => widen!(TimestampMillisecondType),
        DataType::Timestamp(TimeUnit::Microsecond, _) => widen!(TimestampMicrosecondType),
        DataType::Timestamp(TimeUnit::Nanosecond, _) => widen!(TimestampNanosecondType),
        DataType::Float32 => array
            .as_primitive::<Float32Type>()
            .iter()
            .map(|v| v.map(|f| i64::from(canonical_f32_bits(f) as i32)))
            .collect(),
        DataType::Float64 => array
            .as_primitive::<Float64Type>()
            .iter()
            .map(|v| v.map(|f| canonical_f64_bits(f) as i64))
            .collect(),
        other => return Err(internal!("unsupported numeric key type {:?}", other)),
    };
    Ok(values)
}

fn numeric_key_array(values: &[Option<i64>], data_type: &DataType) -> Result<ArrayRef> {
    macro_rules! narrow {
        ($t:ty, $conv:expr) => {
            Arc::new(
                values
                    .iter()
                    .map(|v| v.map($conv))
                    .collect::<PrimitiveArray<$t>>(),
            ) as ArrayRef
        };
    }
    macro_rules! timestamps {
        ($array:ty, $tz:expr) => {
            Arc::new(
                values
                    .iter()
                    .copied()
                    .collect::<$array>()
                    .with_timezone_opt($tz.clone()),
            ) as ArrayRef
        };
    }
    let array = match data_type {
        DataType::Null => Arc::new(NullArray::new(values.len())) as ArrayRef,
        DataType::Boolean => Arc::new(
            values
                .iter()
                .map(|v| v.map(|v| v != 0))
                .collect::<BooleanArray>(),
        ) as ArrayRef,
        DataType::Int8 => narrow!(Int8Type, |v| v as i8),
        DataType::Int16 => narrow!(Int16Type, |v| v as i16),
        DataType::Int32 => narrow!(Int32Type, |v| v as i32),
        DataType::Int64 => narrow!(Int64Type, |v| v),
        DataType::Date32 => narrow!(Date32Type, |v| v as i32),
        DataType::Float32 => narrow!(Float32Type, |v| f32::from_bits(v as u32)),
        DataType::Float64 => narrow!(Float64Type, |v| f64::from_bits(v as u64)),
        DataType::Timestamp(TimeUnit::Second, tz) => timestamps!(TimestampSecondArray, tz),
        DataType::Timestamp(TimeUnit::Millisecond, tz) => {
            timestamps!(TimestampMillisecondArray, tz)
        }
        DataType::Timestamp(TimeUnit::Microsecond, tz) => {
            timestamps!(TimestampMicrosecondArray, tz)
        }
        DataType::Timestamp(TimeUnit::Nanosecond, tz) => {
            timestamps!(TimestampNanosecondArray, tz)
        }
        other => return Err(internal!("unsupported numeric key type {:?}", other)),
    };
    Ok(array)
}

fn write_big_endian(dst: &mut [u8], v: i64) {
    match dst.len() {
        1 => dst.copy_from_slice(&bit_util::big_endian(v as i8).to_ne_bytes()),
        2 => dst.copy_from_slice(&bit_util::big_endian(v as i16).to_ne_bytes()),
        4 => dst.copy_from_slice(&bit_util::big_endian(v as i32).to_ne_bytes()),
        _ => dst.copy_from_slice(&bit_util::big_endian(v).to_ne_bytes()),
    }
}

fn read_big_endian(src: &[u8]) -> i64 {
    match src.len() {
        1 => i64::from(bit_util::big_endian_to_host(i8::from_ne_bytes([src[0]]))),
        2 => {
            let mut buf = [0u8; 2];
            buf.copy_from_slice(src);
            i64::from(bit_util::big_endian_to_host(i16::from_ne_bytes(buf)))
        }
        4 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(src);
            i64::from(bit_util::big_endian_to_host(i32::from_ne_bytes(buf)))
        }
        _ => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(src);
            bit_util::big_endian_to_host(i64::from_ne_bytes(buf))
        }
    }
}

fn pack_fixed_keys(columns: &[ArrayRef], slots: &[FixedSlot]) -> Result<Vec<FixedKey>> {
    let values = columns
        .iter()
        .map(numeric_key_values)
        .collect::<Result<Vec<_>>>()?;
    let num_rows = columns.first().map_or(0, |c| c.len());
    let mut keys = Vec::with_capacity(num_rows);
    for row in 0..num_rows {
        let mut key: FixedKey = [0; FIXED_KEY_BYTES];
        for (col, (column, slot)) in values.iter().zip(slots).enumerate() {
            match column[row] {
                Some(v) => write_big_endian(&mut key[slot.offset..slot.offset + slot.width], v),
                None => key[col / 8] = bit_util::set_bit(key[col / 8], (col % 8) as u32),
            }
        }
        keys.push(key);
    }
    Ok(keys)
}

fn unpack_fixed_keys(
    keys: &[FixedKey],
    slots: &[FixedSlot],
    key_types: &[DataType],
) -> Result<Vec<ArrayRef>> {
    let mut out = Vec::with_capacity(key_types.len());
    for (col, (slot, data_type)) in slots.iter().zip(key_types).enumerate() {
        let values: Vec<Option<i64>> = keys
            .iter()
            .map(|key| {
                if bit_util::get_bit(key[col / 8], (col % 8) as u32) == 1 {
                    None
                } else {
                    Some(read_big_endian(&key[slot.offset..slot.offset + slot.width]))
                }
            })
            .collect();
        out.push(numeric_key_array(&values, data_type)?);
    }
    Ok(out)
}
