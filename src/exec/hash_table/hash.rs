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
use std::hash::{BuildHasher, Hash, Hasher};

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float32Array, Float64Array, Int8Array, Int16Array,
    Int32Array, Int64Array, StringArray,
};
use arrow::datatypes::DataType;

pub(crate) fn make_hash<Q: ?Sized, S: BuildHasher>(build_hasher: &S, value: &Q) -> u64
where
    Q: Hash,
{
    let mut hasher = build_hasher.build_hasher();
    value.hash(&mut hasher);
    hasher.finish()
}

pub(crate) fn seed_from_hasher<S: BuildHasher>(build_hasher: &S) -> u64 {
    make_hash(build_hasher, &0u8)
}

pub(crate) fn combine_hash(acc: u64, value_hash: u64) -> u64 {
    acc ^ value_hash
        .wrapping_add(0x9e3779b97f4a7c15)
        .wrapping_add(acc << 6)
        .wrapping_add(acc >> 2)
}

pub(crate) fn hash_u64_with_seed(seed: u64, value: u64) -> u64 {
    mix_u64(seed ^ value)
}

pub(crate) fn hash_bytes_with_seed(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub(crate) fn hash_null_with_seed(seed: u64) -> u64 {
    hash_u64_with_seed(seed, 0x9e3779b97f4a7c15)
}

fn canonical_f64_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

fn mix_u64(mut value: u64) -> u64 {
    value = value.wrapping_add(0x9e3779b97f4a7c15);
    value = (value ^ (value >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    value = (value ^ (value >> 27)).wrapping_mul(0x94d049bb133111eb);
    value ^ (value >> 31)
}

/// Hash one column value with the given seed. Nulls hash to a fixed sentinel
/// so that null keys form a single group.
pub(crate) fn hash_array_value(array: &ArrayRef, row: usize, seed: u64) -> Result<u64, String> {
    if array.is_null(row) {
        return Ok(hash_null_with_seed(seed));
    }
    macro_rules! int_hash {
        ($ty:ty) => {{
            let arr = array
                .as_any()
                .downcast_ref::<$ty>()
                .ok_or_else(|| format!("failed to downcast {}", stringify!($ty)))?;
            Ok(hash_u64_with_seed(seed, arr.value(row) as i64 as u64))
        }};
    }
    match array.data_type() {
        DataType::Boolean => {
            let arr = array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| "failed to downcast BooleanArray".to_string())?;
            Ok(hash_u64_with_seed(seed, arr.value(row) as u64))
        }
        DataType::Int8 => int_hash!(Int8Array),
        DataType::Int16 => int_hash!(Int16Array),
        DataType::Int32 => int_hash!(Int32Array),
        DataType::Int64 => int_hash!(Int64Array),
        DataType::Date32 => int_hash!(Date32Array),
        DataType::Float32 => {
            let arr = array
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| "failed to downcast Float32Array".to_string())?;
            Ok(hash_u64_with_seed(
                seed,
                canonical_f64_bits(arr.value(row) as f64),
            ))
        }
        DataType::Float64 => {
            let arr = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| "failed to downcast Float64Array".to_string())?;
            Ok(hash_u64_with_seed(seed, canonical_f64_bits(arr.value(row))))
        }
        DataType::Utf8 => {
            let arr = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| "failed to downcast StringArray".to_string())?;
            Ok(hash_bytes_with_seed(seed, arr.value(row).as_bytes()))
        }
        other => Err(format!("unsupported group key type for hashing: {:?}", other)),
    }
}

/// Row-wise hashes over a set of group-key columns.
pub(crate) fn build_group_key_hashes(
    arrays: &[ArrayRef],
    num_rows: usize,
    seed: u64,
) -> Result<Vec<u64>, String> {
    let mut hashes = vec![seed; num_rows];
    for array in arrays {
        if array.len() != num_rows {
            return Err(format!(
                "group key column row count mismatch: expected {} got {}",
                num_rows,
                array.len()
            ));
        }
        for (row, acc) in hashes.iter_mut().enumerate() {
            let value_hash = hash_array_value(array, row, seed)?;
            *acc = combine_hash(*acc, value_hash);
        }
    }
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn equal_keys_hash_equal_across_batches() {
        let a: ArrayRef = Arc::new(Int64Array::from(vec![Some(1), None, Some(2)]));
        let b: ArrayRef = Arc::new(Int64Array::from(vec![Some(2), Some(1), None]));
        let ha = build_group_key_hashes(&[a], 3, 42).expect("hashes");
        let hb = build_group_key_hashes(&[b], 3, 42).expect("hashes");
        assert_eq!(ha[0], hb[1]);
        assert_eq!(ha[2], hb[0]);
        assert_eq!(ha[1], hb[2]);
        assert_ne!(ha[0], ha[2]);
    }
}
