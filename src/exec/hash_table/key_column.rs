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
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float64Array, Int8Array, Int16Array, Int32Array,
    Int64Array, StringArray,
};
use arrow::datatypes::DataType;

fn float64_key_equal(left: f64, right: f64) -> bool {
    left.to_bits() == right.to_bits() || (left.is_nan() && right.is_nan())
}

/// Append-only per-type storage of group key values, indexed by dense group
/// id. Materialized into an output array when the hash table is drained.
#[derive(Debug)]
pub(crate) enum KeyColumn {
    Boolean(Vec<Option<bool>>),
    Int8(Vec<Option<i8>>),
    Int16(Vec<Option<i16>>),
    Int32(Vec<Option<i32>>),
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
    Utf8(Vec<Option<String>>),
    Date32(Vec<Option<i32>>),
}

macro_rules! primitive_push {
    ($values:expr, $array:expr, $row:expr, $arr_ty:ty, $name:literal) => {{
        let arr = $array
            .as_any()
            .downcast_ref::<$arr_ty>()
            .ok_or_else(|| format!("failed to downcast {}", $name))?;
        $values.push(arr.is_valid($row).then(|| arr.value($row)));
        Ok(())
    }};
}

macro_rules! primitive_equals {
    ($values:expr, $group_id:expr, $array:expr, $row:expr, $arr_ty:ty, $name:literal) => {{
        let arr = $array
            .as_any()
            .downcast_ref::<$arr_ty>()
            .ok_or_else(|| format!("failed to downcast {}", $name))?;
        let stored = $values
            .get($group_id)
            .ok_or_else(|| "group key index out of bounds".to_string())?;
        let incoming = arr.is_valid($row).then(|| arr.value($row));
        Ok(*stored == incoming)
    }};
}

impl KeyColumn {
    pub(crate) fn from_type(data_type: &DataType) -> Result<Self, String> {
        match data_type {
            DataType::Boolean => Ok(KeyColumn::Boolean(Vec::new())),
            DataType::Int8 => Ok(KeyColumn::Int8(Vec::new())),
            DataType::Int16 => Ok(KeyColumn::Int16(Vec::new())),
            DataType::Int32 => Ok(KeyColumn::Int32(Vec::new())),
            DataType::Int64 => Ok(KeyColumn::Int64(Vec::new())),
            DataType::Float64 => Ok(KeyColumn::Float64(Vec::new())),
            DataType::Utf8 => Ok(KeyColumn::Utf8(Vec::new())),
            DataType::Date32 => Ok(KeyColumn::Date32(Vec::new())),
            other => Err(format!("unsupported group key type: {:?}", other)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            KeyColumn::Boolean(v) => v.len(),
            KeyColumn::Int8(v) => v.len(),
            KeyColumn::Int16(v) => v.len(),
            KeyColumn::Int32(v) => v.len(),
            KeyColumn::Int64(v) => v.len(),
            KeyColumn::Float64(v) => v.len(),
            KeyColumn::Utf8(v) => v.len(),
            KeyColumn::Date32(v) => v.len(),
        }
    }

    /// Store the key value of `row` as the next dense group id.
    pub(crate) fn push_value_from_array(
        &mut self,
        array: &ArrayRef,
        row: usize,
    ) -> Result<(), String> {
        match self {
            KeyColumn::Boolean(values) => {
                primitive_push!(values, array, row, BooleanArray, "BooleanArray")
            }
            KeyColumn::Int8(values) => primitive_push!(values, array, row, Int8Array, "Int8Array"),
            KeyColumn::Int16(values) => {
                primitive_push!(values, array, row, Int16Array, "Int16Array")
            }
            KeyColumn::Int32(values) => {
                primitive_push!(values, array, row, Int32Array, "Int32Array")
            }
            KeyColumn::Int64(values) => {
                primitive_push!(values, array, row, Int64Array, "Int64Array")
            }
            KeyColumn::Float64(values) => {
                primitive_push!(values, array, row, Float64Array, "Float64Array")
            }
            KeyColumn::Utf8(values) => {
                let arr = array
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| "failed to downcast StringArray".to_string())?;
                values.push(arr.is_valid(row).then(|| arr.value(row).to_string()));
                Ok(())
            }
            KeyColumn::Date32(values) => {
                primitive_push!(values, array, row, Date32Array, "Date32Array")
            }
        }
    }

    /// Compare the stored key of `group_id` against the key value of `row`.
    /// Nulls compare equal to nulls so that null keys form one group.
    pub(crate) fn value_equals(
        &self,
        group_id: usize,
        array: &ArrayRef,
        row: usize,
    ) -> Result<bool, String> {
        match self {
            KeyColumn::Boolean(values) => {
                primitive_equals!(values, group_id, array, row, BooleanArray, "BooleanArray")
            }
            KeyColumn::Int8(values) => {
                primitive_equals!(values, group_id, array, row, Int8Array, "Int8Array")
            }
            KeyColumn::Int16(values) => {
                primitive_equals!(values, group_id, array, row, Int16Array, "Int16Array")
            }
            KeyColumn::Int32(values) => {
                primitive_equals!(values, group_id, array, row, Int32Array, "Int32Array")
            }
            KeyColumn::Int64(values) => {
                primitive_equals!(values, group_id, array, row, Int64Array, "Int64Array")
            }
            KeyColumn::Float64(values) => {
                let arr = array
                    .as_any()
                    .downcast_ref::<Float64Array>()
                    .ok_or_else(|| "failed to downcast Float64Array".to_string())?;
                let stored = values
                    .get(group_id)
                    .ok_or_else(|| "group key index out of bounds".to_string())?;
                let incoming = arr.is_valid(row).then(|| arr.value(row));
                Ok(match (stored, incoming) {
                    (None, None) => true,
                    (Some(a), Some(b)) => float64_key_equal(*a, b),
                    _ => false,
                })
            }
            KeyColumn::Utf8(values) => {
                let arr = array
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| "failed to downcast StringArray".to_string())?;
                let stored = values
                    .get(group_id)
                    .ok_or_else(|| "group key index out of bounds".to_string())?;
                let incoming = arr.is_valid(row).then(|| arr.value(row));
                Ok(stored.as_deref() == incoming)
            }
            KeyColumn::Date32(values) => {
                primitive_equals!(values, group_id, array, row, Date32Array, "Date32Array")
            }
        }
    }

    pub(crate) fn to_array(&self) -> Result<ArrayRef, String> {
        let array: ArrayRef = match self {
            KeyColumn::Boolean(values) => Arc::new(BooleanArray::from(values.clone())),
            KeyColumn::Int8(values) => Arc::new(Int8Array::from(values.clone())),
            KeyColumn::Int16(values) => Arc::new(Int16Array::from(values.clone())),
            KeyColumn::Int32(values) => Arc::new(Int32Array::from(values.clone())),
            KeyColumn::Int64(values) => Arc::new(Int64Array::from(values.clone())),
            KeyColumn::Float64(values) => Arc::new(Float64Array::from(values.clone())),
            KeyColumn::Utf8(values) => {
                Arc::new(StringArray::from_iter(values.iter().map(|v| v.as_deref())))
            }
            KeyColumn::Date32(values) => Arc::new(Date32Array::from(values.clone())),
        };
        Ok(array)
    }

    pub(crate) fn estimated_bytes(&self) -> usize {
        match self {
            KeyColumn::Boolean(v) => v.len() * std::mem::size_of::<Option<bool>>(),
            KeyColumn::Int8(v) => v.len() * std::mem::size_of::<Option<i8>>(),
            KeyColumn::Int16(v) => v.len() * std::mem::size_of::<Option<i16>>(),
            KeyColumn::Int32(v) => v.len() * std::mem::size_of::<Option<i32>>(),
            KeyColumn::Int64(v) => v.len() * std::mem::size_of::<Option<i64>>(),
            KeyColumn::Float64(v) => v.len() * std::mem::size_of::<Option<f64>>(),
            KeyColumn::Utf8(v) => v
                .iter()
                .map(|s| std::mem::size_of::<Option<String>>() + s.as_ref().map_or(0, |s| s.len()))
                .sum(),
            KeyColumn::Date32(v) => v.len() * std::mem::size_of::<Option<i32>>(),
        }
    }
}
