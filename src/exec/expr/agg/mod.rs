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
//! Aggregate-function kernels for grouped and global aggregation.
//!
//! Responsibilities:
//! - Resolves function name + input type to a typed kernel with per-group state vectors.
//! - Updates, merges, and materializes accumulator state batch-at-a-time.
//!
//! Key exported interfaces:
//! - Types: `AggFunction`, `AggKernelSet`, `AggKernelEntry`.
//! - Functions: `build_kernel_set`.
//!
//! Merge kernels (`input_is_intermediate`) consume the serialized intermediate
//! representation a previous aggregation stage emitted instead of raw input
//! values; a stage that feeds such a consumer emits with `output_intermediate`.

mod views;
pub use views::AggInputView;
use views::*;

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryBuilder, Float64Array, Float64Builder, Int64Array, Int64Builder,
    StringBuilder, StructArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Fields};

use crate::exec::expr::ExprId;

/// Lowered aggregate call: function name, input expressions, and whether the
/// input column carries intermediate state from a previous stage.
#[derive(Clone, Debug)]
pub struct AggFunction {
    /// Lowercased function name (e.g. "sum", "count", "count_distinct").
    pub name: String,
    /// Input expressions; empty means COUNT(*)-style aggregate.
    pub inputs: Vec<ExprId>,
    /// Whether this aggregate consumes intermediate states from a previous
    /// aggregation stage.
    pub input_is_intermediate: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AggKind {
    CountRows,
    CountColumn,
    SumInt,
    SumFloat,
    MinInt,
    MaxInt,
    MinFloat,
    MaxFloat,
    MinStr,
    MaxStr,
    Avg,
    CountDistinct,
}

#[derive(Clone, Debug)]
enum AggStates {
    Count(Vec<i64>),
    OptInt(Vec<Option<i64>>),
    OptFloat(Vec<Option<f64>>),
    OptStr(Vec<Option<String>>),
    SumCount(Vec<(f64, i64)>),
    ValueSet(Vec<BTreeSet<Vec<u8>>>),
}

impl AggStates {
    fn len(&self) -> usize {
        match self {
            AggStates::Count(v) => v.len(),
            AggStates::OptInt(v) => v.len(),
            AggStates::OptFloat(v) => v.len(),
            AggStates::OptStr(v) => v.len(),
            AggStates::SumCount(v) => v.len(),
            AggStates::ValueSet(v) => v.len(),
        }
    }

    fn resize(&mut self, groups: usize) {
        match self {
            AggStates::Count(v) => v.resize(groups, 0),
            AggStates::OptInt(v) => v.resize(groups, None),
            AggStates::OptFloat(v) => v.resize(groups, None),
            AggStates::OptStr(v) => v.resize(groups, None),
            AggStates::SumCount(v) => v.resize(groups, (0.0, 0)),
            AggStates::ValueSet(v) => v.resize_with(groups, BTreeSet::new),
        }
    }

    fn clear(&mut self) {
        match self {
            AggStates::Count(v) => v.clear(),
            AggStates::OptInt(v) => v.clear(),
            AggStates::OptFloat(v) => v.clear(),
            AggStates::OptStr(v) => v.clear(),
            AggStates::SumCount(v) => v.clear(),
            AggStates::ValueSet(v) => v.clear(),
        }
    }

    fn estimated_bytes(&self) -> usize {
        match self {
            AggStates::Count(v) => v.len() * std::mem::size_of::<i64>(),
            AggStates::OptInt(v) => v.len() * std::mem::size_of::<Option<i64>>(),
            AggStates::OptFloat(v) => v.len() * std::mem::size_of::<Option<f64>>(),
            AggStates::OptStr(v) => v
                .iter()
                .map(|s| std::mem::size_of::<Option<String>>() + s.as_ref().map_or(0, |s| s.len()))
                .sum(),
            AggStates::SumCount(v) => v.len() * std::mem::size_of::<(f64, i64)>(),
            AggStates::ValueSet(v) => v
                .iter()
                .map(|set| set.iter().map(|k| k.len() + 32).sum::<usize>())
                .sum(),
        }
    }
}

/// One aggregate function bound to its per-group state vector.
#[derive(Clone, Debug)]
pub struct AggKernelEntry {
    kind: AggKind,
    states: AggStates,
    output_type: DataType,
    intermediate_type: DataType,
}

/// All kernels of one aggregation, sharing dense group ids.
#[derive(Clone, Debug)]
pub struct AggKernelSet {
    pub entries: Vec<AggKernelEntry>,
}

impl AggKernelSet {
    pub fn ensure_groups(&mut self, groups: usize) {
        for entry in &mut self.entries {
            if entry.states.len() < groups {
                entry.states.resize(groups);
            }
        }
    }

    pub fn group_count(&self) -> usize {
        self.entries.first().map(|e| e.states.len()).unwrap_or(0)
    }

    /// Discard all accumulated state (forced finish).
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            entry.states.clear();
        }
    }

    pub fn estimated_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.states.estimated_bytes()).sum()
    }
}

pub fn build_kernel_set(
    functions: &[AggFunction],
    input_types: &[Option<DataType>],
) -> Result<AggKernelSet, String> {
    if input_types.len() != functions.len() {
        return Err("aggregate input type length mismatch".to_string());
    }

    let mut entries = Vec::with_capacity(functions.len());
    for (func, input_type) in functions.iter().zip(input_types.iter()) {
        entries.push(build_entry(func, input_type.as_ref())?);
    }
    Ok(AggKernelSet { entries })
}

fn build_entry(func: &AggFunction, input_type: Option<&DataType>) -> Result<AggKernelEntry, String> {
    let name = func.name.as_str();
    // A merge kernel's input column carries the intermediate type; resolve the
    // kernel from the function name alone and validate the view at update time.
    let (kind, output_type, intermediate_type) = match (name, input_type) {
        ("count", None) => (AggKind::CountRows, DataType::Int64, DataType::Int64),
        ("count", Some(_)) if func.input_is_intermediate => {
            (AggKind::CountRows, DataType::Int64, DataType::Int64)
        }
        ("count", Some(_)) => (AggKind::CountColumn, DataType::Int64, DataType::Int64),
        ("sum", Some(t)) if is_integer(t) => (AggKind::SumInt, DataType::Int64, DataType::Int64),
        ("sum", Some(DataType::Float32 | DataType::Float64)) => {
            (AggKind::SumFloat, DataType::Float64, DataType::Float64)
        }
        ("min" | "max", Some(t)) if is_integer(t) || *t == DataType::Date32 => {
            let kind = if name == "min" {
                AggKind::MinInt
            } else {
                AggKind::MaxInt
            };
            (kind, t.clone(), t.clone())
        }
        ("min" | "max", Some(t @ (DataType::Float32 | DataType::Float64))) => {
            let kind = if name == "min" {
                AggKind::MinFloat
            } else {
                AggKind::MaxFloat
            };
            (kind, t.clone(), t.clone())
        }
        ("min" | "max", Some(DataType::Utf8)) => {
            let kind = if name == "min" {
                AggKind::MinStr
            } else {
                AggKind::MaxStr
            };
            (kind, DataType::Utf8, DataType::Utf8)
        }
        ("avg", Some(t)) if is_numeric(t) || func.input_is_intermediate => (
            AggKind::Avg,
            DataType::Float64,
            avg_intermediate_type(),
        ),
        ("count_distinct" | "multi_distinct_count", Some(_)) => {
            (AggKind::CountDistinct, DataType::Int64, DataType::Binary)
        }
        (_, None) => {
            return Err(format!("aggregate function {} requires an input", name));
        }
        (_, Some(t)) => {
            return Err(format!(
                "unsupported aggregate function {} over input type {:?}",
                name, t
            ));
        }
    };

    let states = match kind {
        AggKind::CountRows | AggKind::CountColumn => AggStates::Count(Vec::new()),
        AggKind::SumInt | AggKind::MinInt | AggKind::MaxInt => AggStates::OptInt(Vec::new()),
        AggKind::SumFloat | AggKind::MinFloat | AggKind::MaxFloat => {
            AggStates::OptFloat(Vec::new())
        }
        AggKind::MinStr | AggKind::MaxStr => AggStates::OptStr(Vec::new()),
        AggKind::Avg => AggStates::SumCount(Vec::new()),
        AggKind::CountDistinct => AggStates::ValueSet(Vec::new()),
    };

    Ok(AggKernelEntry {
        kind,
        states,
        output_type,
        intermediate_type,
    })
}

fn is_integer(t: &DataType) -> bool {
    matches!(
        t,
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
    )
}

fn is_numeric(t: &DataType) -> bool {
    is_integer(t) || matches!(t, DataType::Float32 | DataType::Float64)
}

fn avg_intermediate_type() -> DataType {
    DataType::Struct(Fields::from(vec![
        Field::new("sum", DataType::Float64, true),
        Field::new("count", DataType::Int64, true),
    ]))
}

impl AggKernelEntry {
    pub fn output_type(&self, output_intermediate: bool) -> DataType {
        if output_intermediate {
            self.intermediate_type.clone()
        } else {
            self.output_type.clone()
        }
    }

    pub fn build_input_view<'a>(
        &self,
        array: &'a Option<ArrayRef>,
    ) -> Result<AggInputView<'a>, String> {
        match (self.kind, array) {
            (AggKind::CountRows, _) => Ok(AggInputView::None),
            (_, None) => Err("aggregate input missing".to_string()),
            (AggKind::CountColumn, Some(a)) => Ok(AggInputView::Validity(build_validity_view(a))),
            (AggKind::SumInt | AggKind::MinInt | AggKind::MaxInt, Some(a)) => {
                Ok(AggInputView::Int(build_int_view(a)?))
            }
            (AggKind::SumFloat | AggKind::MinFloat | AggKind::MaxFloat, Some(a)) => {
                Ok(AggInputView::Float(build_float_view(a)?))
            }
            (AggKind::MinStr | AggKind::MaxStr, Some(a)) => {
                Ok(AggInputView::Str(build_str_view(a)?))
            }
            (AggKind::Avg, Some(a)) => Ok(AggInputView::Float(build_numeric_as_float_view(a)?)),
            (AggKind::CountDistinct, Some(a)) => {
                Ok(AggInputView::Encoded(build_encoded_view(a)?))
            }
        }
    }

    pub fn build_merge_view<'a>(
        &self,
        array: &'a Option<ArrayRef>,
    ) -> Result<AggInputView<'a>, String> {
        let Some(array) = array else {
            return Err("aggregate intermediate input missing".to_string());
        };
        match self.kind {
            AggKind::CountRows | AggKind::CountColumn => {
                Ok(AggInputView::Int(build_int_view(array)?))
            }
            AggKind::SumInt | AggKind::MinInt | AggKind::MaxInt => {
                Ok(AggInputView::Int(build_int_view(array)?))
            }
            AggKind::SumFloat | AggKind::MinFloat | AggKind::MaxFloat => {
                Ok(AggInputView::Float(build_float_view(array)?))
            }
            AggKind::MinStr | AggKind::MaxStr => Ok(AggInputView::Str(build_str_view(array)?)),
            AggKind::Avg => {
                let (sums, counts) = build_sum_count_view(array)?;
                Ok(AggInputView::SumCount { sums, counts })
            }
            AggKind::CountDistinct => Ok(AggInputView::Binary(build_binary_view(array)?)),
        }
    }

    pub fn update_batch(
        &mut self,
        group_ids: &[usize],
        view: &AggInputView<'_>,
    ) -> Result<(), String> {
        match (self.kind, &mut self.states, view) {
            (AggKind::CountRows, AggStates::Count(states), AggInputView::None) => {
                for &gid in group_ids {
                    states[gid] += 1;
                }
                Ok(())
            }
            (AggKind::CountColumn, AggStates::Count(states), AggInputView::Validity(valid)) => {
                for (row, &gid) in group_ids.iter().enumerate() {
                    if valid[row] {
                        states[gid] += 1;
                    }
                }
                Ok(())
            }
            (AggKind::SumInt, AggStates::OptInt(states), AggInputView::Int(values)) => {
                for (row, &gid) in group_ids.iter().enumerate() {
                    let Some(value) = values[row] else { continue };
                    let acc = states[gid].unwrap_or(0);
                    states[gid] = Some(
                        acc.checked_add(value)
                            .ok_or_else(|| "sum overflow".to_string())?,
                    );
                }
                Ok(())
            }
            (AggKind::SumFloat, AggStates::OptFloat(states), AggInputView::Float(values)) => {
                for (row, &gid) in group_ids.iter().enumerate() {
                    let Some(value) = values[row] else { continue };
                    states[gid] = Some(states[gid].unwrap_or(0.0) + value);
                }
                Ok(())
            }
            (
                AggKind::MinInt | AggKind::MaxInt,
                AggStates::OptInt(states),
                AggInputView::Int(values),
            ) => {
                let is_min = self.kind == AggKind::MinInt;
                for (row, &gid) in group_ids.iter().enumerate() {
                    let Some(value) = values[row] else { continue };
                    states[gid] = Some(match states[gid] {
                        None => value,
                        Some(acc) if is_min => acc.min(value),
                        Some(acc) => acc.max(value),
                    });
                }
                Ok(())
            }
            (
                AggKind::MinFloat | AggKind::MaxFloat,
                AggStates::OptFloat(states),
                AggInputView::Float(values),
            ) => {
                let is_min = self.kind == AggKind::MinFloat;
                for (row, &gid) in group_ids.iter().enumerate() {
                    let Some(value) = values[row] else { continue };
                    states[gid] = Some(match states[gid] {
                        None => value,
                        Some(acc) if is_min => acc.min(value),
                        Some(acc) => acc.max(value),
                    });
                }
                Ok(())
            }
            (
                AggKind::MinStr | AggKind::MaxStr,
                AggStates::OptStr(states),
                AggInputView::Str(array),
            ) => {
                let is_min = self.kind == AggKind::MinStr;
                for (row, &gid) in group_ids.iter().enumerate() {
                    if !array.is_valid(row) {
                        continue;
                    }
                    let value = array.value(row);
                    let replace = match states[gid].as_deref() {
                        None => true,
                        Some(acc) if is_min => value < acc,
                        Some(acc) => value > acc,
                    };
                    if replace {
                        states[gid] = Some(value.to_string());
                    }
                }
                Ok(())
            }
            (AggKind::Avg, AggStates::SumCount(states), AggInputView::Float(values)) => {
                for (row, &gid) in group_ids.iter().enumerate() {
                    let Some(value) = values[row] else { continue };
                    let (sum, count) = states[gid];
                    states[gid] = (sum + value, count + 1);
                }
                Ok(())
            }
            (
                AggKind::CountDistinct,
                AggStates::ValueSet(states),
                AggInputView::Encoded(values),
            ) => {
                for (row, &gid) in group_ids.iter().enumerate() {
                    let Some(value) = values[row].as_ref() else {
                        continue;
                    };
                    if !states[gid].contains(value) {
                        states[gid].insert(value.clone());
                    }
                }
                Ok(())
            }
            _ => Err(format!(
                "aggregate update view mismatch for {:?}",
                self.kind
            )),
        }
    }

    pub fn merge_batch(
        &mut self,
        group_ids: &[usize],
        view: &AggInputView<'_>,
    ) -> Result<(), String> {
        match self.kind {
            AggKind::CountRows | AggKind::CountColumn => {
                let (AggStates::Count(states), AggInputView::Int(values)) =
                    (&mut self.states, view)
                else {
                    return Err("count merge view mismatch".to_string());
                };
                for (row, &gid) in group_ids.iter().enumerate() {
                    if let Some(partial) = values[row] {
                        states[gid] += partial;
                    }
                }
                Ok(())
            }
            AggKind::Avg => {
                let (AggStates::SumCount(states), AggInputView::SumCount { sums, counts }) =
                    (&mut self.states, view)
                else {
                    return Err("avg merge view mismatch".to_string());
                };
                for (row, &gid) in group_ids.iter().enumerate() {
                    if !sums.is_valid(row) || !counts.is_valid(row) {
                        continue;
                    }
                    let (sum, count) = states[gid];
                    states[gid] = (sum + sums.value(row), count + counts.value(row));
                }
                Ok(())
            }
            AggKind::CountDistinct => {
                let (AggStates::ValueSet(states), AggInputView::Binary(array)) =
                    (&mut self.states, view)
                else {
                    return Err("distinct merge view mismatch".to_string());
                };
                for (row, &gid) in group_ids.iter().enumerate() {
                    if !array.is_valid(row) {
                        continue;
                    }
                    for value in decode_distinct_set(array.value(row))? {
                        states[gid].insert(value);
                    }
                }
                Ok(())
            }
            // Sum and min/max merge the same way they update.
            _ => self.update_batch(group_ids, view),
        }
    }

    pub fn build_array(
        &self,
        range: Range<usize>,
        output_intermediate: bool,
    ) -> Result<ArrayRef, String> {
        if range.end > self.states.len() {
            return Err(format!(
                "aggregate state range out of bounds: {}..{} of {}",
                range.start,
                range.end,
                self.states.len()
            ));
        }
        match (&self.states, self.kind) {
            (AggStates::Count(states), _) => {
                Ok(Arc::new(Int64Array::from(states[range].to_vec())))
            }
            (AggStates::OptInt(states), _) => {
                let array: ArrayRef = Arc::new(Int64Array::from(states[range].to_vec()));
                cast_to(&array, &self.output_type(output_intermediate))
            }
            (AggStates::OptFloat(states), _) => {
                let array: ArrayRef = Arc::new(Float64Array::from(states[range].to_vec()));
                cast_to(&array, &self.output_type(output_intermediate))
            }
            (AggStates::OptStr(states), _) => {
                let mut builder = StringBuilder::new();
                for state in &states[range] {
                    builder.append_option(state.as_deref());
                }
                Ok(Arc::new(builder.finish()))
            }
            (AggStates::SumCount(states), _) if output_intermediate => {
                let mut sums = Float64Builder::with_capacity(range.len());
                let mut counts = Int64Builder::with_capacity(range.len());
                for &(sum, count) in &states[range] {
                    sums.append_value(sum);
                    counts.append_value(count);
                }
                let DataType::Struct(fields) = avg_intermediate_type() else {
                    return Err("avg intermediate type must be a struct".to_string());
                };
                let arrays: Vec<ArrayRef> =
                    vec![Arc::new(sums.finish()), Arc::new(counts.finish())];
                Ok(Arc::new(StructArray::new(fields, arrays, None)))
            }
            (AggStates::SumCount(states), _) => {
                let mut builder = Float64Builder::with_capacity(range.len());
                for &(sum, count) in &states[range] {
                    if count == 0 {
                        builder.append_null();
                    } else {
                        builder.append_value(sum / count as f64);
                    }
                }
                Ok(Arc::new(builder.finish()))
            }
            (AggStates::ValueSet(states), _) if output_intermediate => {
                let mut builder = BinaryBuilder::new();
                for set in &states[range] {
                    builder.append_value(encode_distinct_set(set));
                }
                Ok(Arc::new(builder.finish()))
            }
            (AggStates::ValueSet(states), _) => {
                let mut builder = Int64Builder::with_capacity(range.len());
                for set in &states[range] {
                    builder.append_value(set.len() as i64);
                }
                Ok(Arc::new(builder.finish()))
            }
        }
    }
}

fn cast_to(array: &ArrayRef, data_type: &DataType) -> Result<ArrayRef, String> {
    if array.data_type() == data_type {
        return Ok(Arc::clone(array));
    }
    cast(array.as_ref(), data_type).map_err(|e| e.to_string())
}

/// Serialized distinct set: per value, u32 LE length followed by the bytes.
fn encode_distinct_set(set: &BTreeSet<Vec<u8>>) -> Vec<u8> {
    let mut out = Vec::with_capacity(set.iter().map(|v| v.len() + 4).sum());
    for value in set {
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        out.extend_from_slice(value);
    }
    out
}

fn decode_distinct_set(bytes: &[u8]) -> Result<Vec<Vec<u8>>, String> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let Some(len_bytes) = bytes.get(offset..offset + 4) else {
            return Err("truncated distinct set length".to_string());
        };
        let len = u32::from_le_bytes(len_bytes.try_into().expect("4 bytes")) as usize;
        offset += 4;
        let Some(value) = bytes.get(offset..offset + len) else {
            return Err("truncated distinct set value".to_string());
        };
        out.push(value.to_vec());
        offset += len;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int32Array};

    fn kernel(name: &str, input_type: Option<DataType>, merge: bool) -> AggKernelEntry {
        let func = AggFunction {
            name: name.to_string(),
            inputs: Vec::new(),
            input_is_intermediate: merge,
        };
        build_entry(&func, input_type.as_ref()).expect("kernel")
    }

    #[test]
    fn sum_int_accumulates_per_group() {
        let mut entry = kernel("sum", Some(DataType::Int32), false);
        entry.states.resize(2);
        let array: Option<ArrayRef> = Some(Arc::new(Int32Array::from(vec![
            Some(2),
            Some(3),
            None,
            Some(5),
        ])));
        let view = entry.build_input_view(&array).expect("view");
        entry.update_batch(&[0, 0, 1, 1], &view).expect("update");
        let out = entry.build_array(0..2, false).expect("array");
        let out = out.as_any().downcast_ref::<Int64Array>().expect("int64");
        assert_eq!(out.value(0), 5);
        assert_eq!(out.value(1), 5);
    }

    #[test]
    fn sum_int_overflow_is_an_error() {
        let mut entry = kernel("sum", Some(DataType::Int64), false);
        entry.states.resize(1);
        let array: Option<ArrayRef> =
            Some(Arc::new(Int64Array::from(vec![i64::MAX, 1])));
        let view = entry.build_input_view(&array).expect("view");
        let err = entry.update_batch(&[0, 0], &view).expect_err("overflow");
        assert!(err.contains("overflow"), "err={}", err);
    }

    #[test]
    fn min_keeps_input_type_in_output() {
        let mut entry = kernel("min", Some(DataType::Int32), false);
        entry.states.resize(1);
        let array: Option<ArrayRef> = Some(Arc::new(Int32Array::from(vec![9, 4, 7])));
        let view = entry.build_input_view(&array).expect("view");
        entry.update_batch(&[0, 0, 0], &view).expect("update");
        let out = entry.build_array(0..1, false).expect("array");
        assert_eq!(out.data_type(), &DataType::Int32);
    }

    #[test]
    fn count_distinct_round_trips_through_intermediate() {
        let mut update = kernel("count_distinct", Some(DataType::Int64), false);
        update.states.resize(1);
        let array: Option<ArrayRef> =
            Some(Arc::new(Int64Array::from(vec![1, 2, 2, 3, 1])));
        let view = update.build_input_view(&array).expect("view");
        update.update_batch(&[0; 5], &view).expect("update");

        let serialized = update.build_array(0..1, true).expect("intermediate");
        let mut merge = kernel("count_distinct", Some(DataType::Binary), true);
        merge.states.resize(1);
        let serialized = Some(serialized);
        let view = merge.build_merge_view(&serialized).expect("merge view");
        merge.merge_batch(&[0], &view).expect("merge");
        let out = merge.build_array(0..1, false).expect("final");
        let out = out.as_any().downcast_ref::<Int64Array>().expect("int64");
        assert_eq!(out.value(0), 3);
    }

    #[test]
    fn avg_intermediate_struct_merges() {
        let mut update = kernel("avg", Some(DataType::Int32), false);
        update.states.resize(1);
        let array: Option<ArrayRef> = Some(Arc::new(Int32Array::from(vec![2, 4])));
        let view = update.build_input_view(&array).expect("view");
        update.update_batch(&[0, 0], &view).expect("update");

        let partial = Some(update.build_array(0..1, true).expect("intermediate"));
        let mut merge = kernel("avg", Some(avg_intermediate_type()), true);
        merge.states.resize(1);
        let view = merge.build_merge_view(&partial).expect("merge view");
        merge.merge_batch(&[0], &view).expect("merge");
        merge.merge_batch(&[0], &view).expect("merge again");
        let out = merge.build_array(0..1, false).expect("final");
        let out = out.as_any().downcast_ref::<Float64Array>().expect("f64");
        assert_eq!(out.value(0), 3.0);
    }
}
