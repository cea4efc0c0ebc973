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
use arrow::datatypes::DataType;

use crate::common::bit_util;

/// Bytes available to a packed composite key.
pub(crate) const FIXED_KEY_BYTES: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupKeyStrategy {
    /// Single fixed-width numeric, temporal or boolean key held as `Option<i64>`.
    OneNumber,
    /// Single UTF-8 key stored directly in the set.
    OneString,
    /// Multiple fixed-width keys packed big-endian with a null bitmap into 16 bytes.
    FixedSize,
    /// Arrow row-format bytes (fallback for mixed or wide keys).
    Serialized,
}

pub(crate) fn pick_group_key_strategy(types: &[DataType]) -> GroupKeyStrategy {
    if let [single] = types {
        if matches!(single, DataType::Utf8) {
            return GroupKeyStrategy::OneString;
        }
        if fixed_width_size(single).is_some() || matches!(single, DataType::Null) {
            return GroupKeyStrategy::OneNumber;
        }
        return GroupKeyStrategy::Serialized;
    }
    if can_apply_fixed_size_key(types) {
        return GroupKeyStrategy::FixedSize;
    }
    GroupKeyStrategy::Serialized
}

pub(crate) fn null_bitmap_bytes(num_keys: usize) -> usize {
    bit_util::round_up_num_bytes(u32::try_from(num_keys).unwrap_or(u32::MAX)) as usize
}

pub(crate) fn can_apply_fixed_size_key(types: &[DataType]) -> bool {
    if types.len() < 2 {
        return false;
    }
    let mut total = null_bitmap_bytes(types.len());
    for data_type in types {
        let Some(width) = fixed_width_size(data_type) else {
            return false;
        };
        total = total.saturating_add(width);
        if total > FIXED_KEY_BYTES {
            return false;
        }
    }
    true
}

/// Width of a key column that round-trips through an `i64` payload.
pub(crate) fn fixed_width_size(data_type: &DataType) -> Option<usize> {
    let width = match data_type {
        DataType::Boolean | DataType::Int8 => 1,
        DataType::Int16 => 2,
        DataType::Int32 | DataType::Float32 | DataType::Date32 => 4,
        DataType::Int64 | DataType::Float64 | DataType::Timestamp(_, _) => 8,
        _ => return None,
    };
    Some(width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::TimeUnit;

    #[test]
    fn single_column_strategies() {
        assert_eq!(
            pick_group_key_strategy(&[DataType::Int32]),
            GroupKeyStrategy::OneNumber
        );
        assert_eq!(
            pick_group_key_strategy(&[DataType::Timestamp(TimeUnit::Microsecond, None)]),
            GroupKeyStrategy::OneNumber
        );
        assert_eq!(
            pick_group_key_strategy(&[DataType::Utf8]),
            GroupKeyStrategy::OneString
        );
        assert_eq!(
            pick_group_key_strategy(&[DataType::Binary]),
            GroupKeyStrategy::Serialized
        );
    }

    #[test]
    fn composite_keys_pack_until_sixteen_bytes() {
        // 1 null byte + 8 + 4 + 2 + 1 = 16
        let fits = [
            DataType::Int64,
            DataType::Int32,
            DataType::Int16,
            DataType::Boolean,
        ];
        assert_eq!(pick_group_key_strategy(&fits), GroupKeyStrategy::FixedSize);
        // 1 null byte + 8 + 8 = 17
        let wide = [DataType::Int64, DataType::Float64];
        assert_eq!(pick_group_key_strategy(&wide), GroupKeyStrategy::Serialized);
        let mixed = [DataType::Int32, DataType::Utf8];
        assert_eq!(pick_group_key_strategy(&mixed), GroupKeyStrategy::Serialized);
    }
}
