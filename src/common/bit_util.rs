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
//! Integer bit tricks shared by hash tables and serialization paths.
//!
//! Responsibilities:
//! - Rounding helpers (ceil/round up/round down, power-of-two variants).
//! - Population count with runtime CPU-feature dispatch.
//! - Leading/trailing zero counts, trailing-bit masks and overflow-safe shifts.
//! - Byte-order conversion and single-bit get/set helpers.
//!
//! Key exported interfaces:
//! - Functions: `next_power_of_two`, `popcount`, `trailing_bits`, `big_endian`, `get_bit`.
//! - Traits: `BigEndian`, `BitField`.
//!
//! Current limitations:
//! - Callers own the input contracts (positive divisors, in-range bit positions); only the
//!   power-of-two factor checks are asserted, and only in debug builds.

use std::ops::{BitAnd, BitOr, Not, Shl};
use std::sync::OnceLock;

static HW_POPCOUNT: OnceLock<bool> = OnceLock::new();

/// Returns `ceil(value / divisor)`. `divisor` must be positive.
#[inline]
pub fn ceil_div(value: i64, divisor: i64) -> i64 {
    value / divisor + i64::from(value % divisor != 0)
}

/// Rounds `value` up to the nearest multiple of `factor`. `factor` must be positive.
#[inline]
pub fn round_up(value: i64, factor: i64) -> i64 {
    (value + (factor - 1)) / factor * factor
}

/// Rounds `value` down to the nearest multiple of `factor`. `factor` must be positive.
#[inline]
pub fn round_down(value: i64, factor: i64) -> i64 {
    (value / factor) * factor
}

#[inline]
pub const fn is_power_of_2(value: i64) -> bool {
    (value & (value - 1)) == 0
}

/// Rounds `value` up to a multiple of `factor`, which must be a power of two.
#[inline]
pub fn round_up_to_power_of_2(value: i64, factor: i64) -> i64 {
    debug_assert!(factor > 0 && is_power_of_2(factor));
    (value + (factor - 1)) & !(factor - 1)
}

/// Rounds `value` down to a multiple of `factor`, which must be a power of two.
#[inline]
pub fn round_down_to_power_of_2(value: i64, factor: i64) -> i64 {
    debug_assert!(factor > 0 && is_power_of_2(factor));
    value & !(factor - 1)
}

/// Smallest power of two that is `>= v`. Defined for `v >= 1`; a power of two maps to itself.
#[inline]
pub fn next_power_of_two(v: i64) -> i64 {
    debug_assert!(v >= 1);
    let mut v = v - 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v |= v >> 32;
    v + 1
}

/// Number of bytes needed to hold `bits` bits.
#[inline]
pub const fn round_up_num_bytes(bits: u32) -> u32 {
    (bits + 7) >> 3
}

/// Number of 32-bit words needed to hold `bits` bits.
#[inline]
pub const fn round_up_num_i32(bits: u32) -> u32 {
    (bits + 31) >> 5
}

/// Number of 64-bit words needed to hold `bits` bits.
#[inline]
pub const fn round_up_num_i64(bits: u32) -> u32 {
    (bits + 63) >> 6
}

/// Portable population count; clears the lowest set bit until none remain.
#[inline]
pub fn popcount_no_hw(mut x: u64) -> u32 {
    let mut count = 0;
    while x != 0 {
        x &= x - 1;
        count += 1;
    }
    count
}

/// Whether the running CPU advertises a population-count instruction.
///
/// Detection runs once per process; later calls read the memoized answer.
pub fn has_hw_popcount() -> bool {
    *HW_POPCOUNT.get_or_init(detect_hw_popcount)
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn detect_hw_popcount() -> bool {
    std::is_x86_feature_detected!("popcnt")
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn detect_hw_popcount() -> bool {
    false
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[target_feature(enable = "popcnt")]
unsafe fn popcount_hw(x: u64) -> u32 {
    x.count_ones()
}

/// Returns the number of set bits in `x`.
#[inline]
pub fn popcount(x: u64) -> u32 {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        if has_hw_popcount() {
            // SAFETY: the popcnt feature was detected on this CPU.
            return unsafe { popcount_hw(x) };
        }
    }
    popcount_no_hw(x)
}

/// Population count of a signed value, counted over its two's-complement bit pattern.
#[inline]
pub fn popcount_signed(v: i64) -> u32 {
    popcount(v as u64)
}

#[inline]
pub fn count_one_bits(x: u32) -> u32 {
    x.count_ones()
}

#[inline]
pub const fn count_leading_zeros_u32(value: u32) -> u32 {
    value.leading_zeros()
}

#[inline]
pub const fn count_leading_zeros_u64(value: u64) -> u32 {
    value.leading_zeros()
}

#[inline]
pub const fn count_trailing_zeros_u32(value: u32) -> u32 {
    value.trailing_zeros()
}

#[inline]
pub const fn count_trailing_zeros_u64(value: u64) -> u32 {
    value.trailing_zeros()
}

/// Minimum number of bits needed to represent `x` (0 for 0).
#[inline]
pub const fn num_required_bits(x: u64) -> u32 {
    64 - x.leading_zeros()
}

/// Returns `ceil(log2(x))`. `x` must be positive.
#[inline]
pub fn log2_ceil(x: u64) -> u32 {
    debug_assert!(x > 0);
    if x <= 1 {
        return 0;
    }
    64 - (x - 1).leading_zeros()
}

/// Returns `floor(log2(n))`, or -1 for zero.
#[inline]
pub const fn log2_floor_64(n: u64) -> i32 {
    if n == 0 {
        return -1;
    }
    63 - n.leading_zeros() as i32
}

/// Returns the `num_bits` least-significant bits of `v`.
///
/// `num_bits == 0` yields 0 and `num_bits >= 64` yields `v` unchanged.
#[inline]
pub fn trailing_bits(v: u64, num_bits: u32) -> u64 {
    if num_bits == 0 {
        return 0;
    }
    if num_bits >= 64 {
        return v;
    }
    let n = 64 - num_bits;
    (v << n) >> n
}

#[inline]
pub fn shift_left_zero_on_overflow(v: u64, num_bits: u32) -> u64 {
    if num_bits >= 64 {
        return 0;
    }
    v << num_bits
}

#[inline]
pub fn shift_right_zero_on_overflow(v: u64, num_bits: u32) -> u64 {
    if num_bits >= 64 {
        return 0;
    }
    v >> num_bits
}

/// Logical (zero-filling) right shift of a signed value.
#[inline]
pub fn shift_right_logical(v: i64, num_bits: u32) -> i64 {
    shift_right_zero_on_overflow(v as u64, num_bits) as i64
}

/// Host/big-endian byte-order conversion for fixed-width integers.
pub trait BigEndian: Copy {
    fn to_big_endian(self) -> Self;
    fn from_big_endian(self) -> Self;
}

macro_rules! impl_big_endian {
    ($($t:ty),* $(,)?) => {
        $(
            impl BigEndian for $t {
                #[inline]
                fn to_big_endian(self) -> Self {
                    self.to_be()
                }

                #[inline]
                fn from_big_endian(self) -> Self {
                    <$t>::from_be(self)
                }
            }
        )*
    };
}

impl_big_endian!(i8, u8, i16, u16, i32, u32, i64, u64, i128, u128);

/// Converts a host-order value to big-endian order. 8-bit values pass through.
#[inline]
pub fn big_endian<T: BigEndian>(value: T) -> T {
    value.to_big_endian()
}

/// Converts a big-endian value to host order. 8-bit values pass through.
#[inline]
pub fn big_endian_to_host<T: BigEndian>(value: T) -> T {
    value.from_big_endian()
}

/// Integer types supporting single-bit reads and writes.
pub trait BitField:
    Copy
    + PartialEq
    + BitAnd<Output = Self>
    + BitOr<Output = Self>
    + Not<Output = Self>
    + Shl<u32, Output = Self>
{
    const ZERO: Self;
    const ONE: Self;
    const BITS: u32;
}

macro_rules! impl_bit_field {
    ($($t:ty),* $(,)?) => {
        $(
            impl BitField for $t {
                const ZERO: Self = 0;
                const ONE: Self = 1;
                const BITS: u32 = <$t>::BITS;
            }
        )*
    };
}

impl_bit_field!(i8, u8, i16, u16, i32, u32, i64, u64, i128, u128);

/// Reads bit `bitpos` of `v` as 0 or 1. `bitpos` must be below the type width.
#[inline]
pub fn get_bit<T: BitField>(v: T, bitpos: u32) -> u8 {
    debug_assert!(bitpos < T::BITS);
    u8::from(v & (T::ONE << bitpos) != T::ZERO)
}

/// Sets bit `bitpos` of `v` to 1. `bitpos` must be below the type width.
#[inline]
pub fn set_bit<T: BitField>(v: T, bitpos: u32) -> T {
    debug_assert!(bitpos < T::BITS);
    v | (T::ONE << bitpos)
}

/// Sets bit `bitpos` of `v` to 0. `bitpos` must be below the type width.
#[inline]
pub fn unset_bit<T: BitField>(v: T, bitpos: u32) -> T {
    debug_assert!(bitpos < T::BITS);
    v & !(T::ONE << bitpos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitmix(state: &mut u64) -> u64 {
        *state = state.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = *state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }

    #[test]
    fn popcount_paths_agree() {
        let mut state = 7u64;
        let edges = [0u64, 1, 2, 3, u64::MAX, u64::MAX - 1, 1 << 63, 0x5555_5555_5555_5555];
        for x in edges {
            assert_eq!(popcount(x), popcount_no_hw(x), "x={x:#x}");
            assert_eq!(popcount(x), x.count_ones(), "x={x:#x}");
        }
        for _ in 0..10_000 {
            let x = splitmix(&mut state);
            assert_eq!(popcount(x), popcount_no_hw(x), "x={x:#x}");
        }
        assert_eq!(popcount_signed(-1), 64);
        assert_eq!(count_one_bits(0xF0F0), 8);
    }

    #[test]
    fn hw_popcount_detection_is_memoized() {
        assert_eq!(has_hw_popcount(), has_hw_popcount());
    }

    #[test]
    fn next_power_of_two_is_smallest_upper_bound() {
        assert_eq!(next_power_of_two(1), 1);
        assert_eq!(next_power_of_two(2), 2);
        assert_eq!(next_power_of_two(3), 4);
        assert_eq!(next_power_of_two(1000), 1024);
        assert_eq!(next_power_of_two(1 << 62), 1 << 62);
        let mut state = 11u64;
        for _ in 0..10_000 {
            let v = (splitmix(&mut state) % (1u64 << 62)) as i64 + 1;
            let p = next_power_of_two(v);
            assert!(p >= v && is_power_of_2(p), "v={v} p={p}");
            assert!(p / 2 < v, "v={v} p={p}");
        }
    }

    #[test]
    fn rounding_helpers() {
        assert_eq!(ceil_div(10, 3), 4);
        assert_eq!(ceil_div(9, 3), 3);
        assert_eq!(ceil_div(0, 3), 0);
        assert_eq!(round_up(10, 4), 12);
        assert_eq!(round_up(12, 4), 12);
        assert_eq!(round_down(13, 4), 12);
        assert_eq!(round_up_to_power_of_2(13, 8), 16);
        assert_eq!(round_down_to_power_of_2(13, 8), 8);
        assert_eq!(round_up_num_bytes(9), 2);
        assert_eq!(round_up_num_i32(33), 2);
        assert_eq!(round_up_num_i64(64), 1);
        assert_eq!(round_up_num_i64(65), 2);
    }

    #[test]
    fn zero_counts_return_width_for_zero() {
        assert_eq!(count_leading_zeros_u32(0), 32);
        assert_eq!(count_leading_zeros_u64(0), 64);
        assert_eq!(count_trailing_zeros_u32(0), 32);
        assert_eq!(count_trailing_zeros_u64(0), 64);
        assert_eq!(count_leading_zeros_u64(1), 63);
        assert_eq!(count_trailing_zeros_u64(8), 3);
        assert_eq!(num_required_bits(0), 0);
        assert_eq!(num_required_bits(255), 8);
    }

    #[test]
    fn log2_variants() {
        assert_eq!(log2_ceil(1), 0);
        assert_eq!(log2_ceil(2), 1);
        assert_eq!(log2_ceil(5), 3);
        assert_eq!(log2_ceil(1 << 40), 40);
        assert_eq!(log2_floor_64(0), -1);
        assert_eq!(log2_floor_64(5), 2);
    }

    #[test]
    fn trailing_bits_saturates() {
        let v = 0xDEAD_BEEF_CAFE_F00Du64;
        assert_eq!(trailing_bits(v, 0), 0);
        assert_eq!(trailing_bits(v, 64), v);
        assert_eq!(trailing_bits(v, 100), v);
        assert_eq!(trailing_bits(v, 4), 0xD);
        assert_eq!(trailing_bits(v, 16), 0xF00D);
    }

    #[test]
    fn shifts_zero_on_overflow() {
        assert_eq!(shift_left_zero_on_overflow(1, 64), 0);
        assert_eq!(shift_right_zero_on_overflow(u64::MAX, 64), 0);
        assert_eq!(shift_left_zero_on_overflow(1, 3), 8);
        assert_eq!(shift_right_zero_on_overflow(8, 3), 1);
    }

    #[test]
    fn logical_shift_fills_with_zeros() {
        assert_eq!(shift_right_logical(-1, 60), 0xF);
        assert_eq!(shift_right_logical(-8, 1), i64::MAX - 3);
        assert_eq!(shift_right_logical(16, 2), 4);
        assert_eq!(shift_right_logical(-1, 64), 0);
        assert_eq!(shift_right_logical(i64::MIN, 63), 1);
    }

    #[test]
    fn big_endian_conversion() {
        assert_eq!(big_endian(0x12u8), 0x12u8);
        assert_eq!(big_endian(-3i8), -3i8);
        let v = 0x0102_0304u32;
        assert_eq!(big_endian(v).to_ne_bytes(), [1, 2, 3, 4]);
        assert_eq!(big_endian_to_host(big_endian(v)), v);
        let wide = 0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10i128;
        assert_eq!(big_endian(wide).to_ne_bytes()[0], 1);
        assert_eq!(big_endian_to_host(big_endian(wide)), wide);
        assert_eq!(big_endian_to_host(big_endian(-42i64)), -42i64);
    }

    #[test]
    fn bit_field_helpers() {
        assert_eq!(get_bit(0b1010u8, 1), 1);
        assert_eq!(get_bit(0b1010u8, 0), 0);
        assert_eq!(get_bit(-1i32, 31), 1);
        assert_eq!(set_bit(0u64, 63), 1u64 << 63);
        assert_eq!(unset_bit(0xFFu8, 7), 0x7F);
        assert_eq!(set_bit(i16::MIN, 0), i16::MIN + 1);
    }
}
