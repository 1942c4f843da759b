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
use arrow::array::{
    Array, ArrayRef, BinaryArray, Date32Array, Float32Array, Float64Array, Int8Array, Int16Array,
    Int32Array, Int64Array, StringArray, StructArray,
};
use arrow::datatypes::DataType;

/// Typed, row-addressable view over one aggregate input column.
///
/// Integer and float views widen to the accumulator's native width once per
/// batch so the per-row update loop stays monomorphic.
pub enum AggInputView<'a> {
    /// COUNT(*)-style aggregate with no input column.
    None,
    /// Per-row validity of the input column, for aggregates that only care
    /// whether a value is present.
    Validity(Vec<bool>),
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Str(&'a StringArray),
    Binary(&'a BinaryArray),
    /// Partial avg state: struct{sum: Float64, count: Int64}.
    SumCount {
        sums: &'a Float64Array,
        counts: &'a Int64Array,
    },
    /// Input values encoded as injective byte keys, for distinct-value sets.
    Encoded(Vec<Option<Vec<u8>>>),
}

pub(crate) fn build_validity_view(array: &ArrayRef) -> Vec<bool> {
    (0..array.len()).map(|row| array.is_valid(row)).collect()
}

pub(crate) fn build_int_view(array: &ArrayRef) -> Result<Vec<Option<i64>>, String> {
    macro_rules! widen {
        ($ty:ty) => {{
            let arr = array
                .as_any()
                .downcast_ref::<$ty>()
                .ok_or_else(|| format!("failed to downcast {}", stringify!($ty)))?;
            Ok((0..arr.len())
                .map(|row| arr.is_valid(row).then(|| arr.value(row) as i64))
                .collect())
        }};
    }
    match array.data_type() {
        DataType::Int8 => widen!(Int8Array),
        DataType::Int16 => widen!(Int16Array),
        DataType::Int32 => widen!(Int32Array),
        DataType::Int64 => widen!(Int64Array),
        DataType::Date32 => widen!(Date32Array),
        other => Err(format!("unsupported integer aggregate input: {:?}", other)),
    }
}

pub(crate) fn build_float_view(array: &ArrayRef) -> Result<Vec<Option<f64>>, String> {
    match array.data_type() {
        DataType::Float32 => {
            let arr = array
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| "failed to downcast Float32Array".to_string())?;
            Ok((0..arr.len())
                .map(|row| arr.is_valid(row).then(|| arr.value(row) as f64))
                .collect())
        }
        DataType::Float64 => {
            let arr = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| "failed to downcast Float64Array".to_string())?;
            Ok((0..arr.len())
                .map(|row| arr.is_valid(row).then(|| arr.value(row)))
                .collect())
        }
        other => Err(format!("unsupported float aggregate input: {:?}", other)),
    }
}

/// Numeric view for aggregates whose accumulator is a double regardless of
/// the input width (avg).
pub(crate) fn build_numeric_as_float_view(array: &ArrayRef) -> Result<Vec<Option<f64>>, String> {
    match array.data_type() {
        DataType::Float32 | DataType::Float64 => build_float_view(array),
        _ => {
            let ints = build_int_view(array)?;
            Ok(ints
                .into_iter()
                .map(|v| v.map(|v| v as f64))
                .collect())
        }
    }
}

pub(crate) fn build_str_view(array: &ArrayRef) -> Result<&StringArray, String> {
    array
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| format!("expected Utf8 aggregate input, got {:?}", array.data_type()))
}

pub(crate) fn build_binary_view(array: &ArrayRef) -> Result<&BinaryArray, String> {
    array
        .as_any()
        .downcast_ref::<BinaryArray>()
        .ok_or_else(|| {
            format!(
                "expected Binary aggregate intermediate, got {:?}",
                array.data_type()
            )
        })
}

pub(crate) fn build_sum_count_view(
    array: &ArrayRef,
) -> Result<(&Float64Array, &Int64Array), String> {
    let arr = array
        .as_any()
        .downcast_ref::<StructArray>()
        .ok_or_else(|| {
            format!(
                "expected struct{{sum,count}} aggregate intermediate, got {:?}",
                array.data_type()
            )
        })?;
    if arr.num_columns() != 2 {
        return Err(format!(
            "avg intermediate struct must have 2 fields, got {}",
            arr.num_columns()
        ));
    }
    let sums = arr
        .column(0)
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| "avg intermediate sum field must be Float64".to_string())?;
    let counts = arr
        .column(1)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| "avg intermediate count field must be Int64".to_string())?;
    Ok((sums, counts))
}

pub(crate) fn build_encoded_view(array: &ArrayRef) -> Result<Vec<Option<Vec<u8>>>, String> {
    (0..array.len())
        .map(|row| encode_distinct_value(array, row))
        .collect()
}

/// Encode one input value as the byte key used by distinct-value sets.
/// The encoding only has to be injective per type, not ordered.
fn encode_distinct_value(array: &ArrayRef, row: usize) -> Result<Option<Vec<u8>>, String> {
    if array.is_null(row) {
        return Ok(None);
    }
    macro_rules! int_bytes {
        ($ty:ty) => {{
            let arr = array
                .as_any()
                .downcast_ref::<$ty>()
                .ok_or_else(|| format!("failed to downcast {}", stringify!($ty)))?;
            Ok(Some((arr.value(row) as i64).to_le_bytes().to_vec()))
        }};
    }
    match array.data_type() {
        DataType::Int8 => int_bytes!(Int8Array),
        DataType::Int16 => int_bytes!(Int16Array),
        DataType::Int32 => int_bytes!(Int32Array),
        DataType::Int64 => int_bytes!(Int64Array),
        DataType::Date32 => int_bytes!(Date32Array),
        DataType::Utf8 => {
            let arr = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| "failed to downcast StringArray".to_string())?;
            Ok(Some(arr.value(row).as_bytes().to_vec()))
        }
        other => Err(format!("unsupported distinct aggregate input: {:?}", other)),
    }
}
