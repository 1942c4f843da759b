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
//! Vectorized expression evaluation over chunks.
//!
//! Responsibilities:
//! - Stores lowered expression trees in an arena and evaluates them column-at-a-time.
//! - Provides the conjunct-evaluation helper operators use for post-materialization filtering.
//!
//! Key exported interfaces:
//! - Types: `ExprArena`, `ExprId`, `ExprNode`, `LiteralValue`.
//! - Functions: `eval_conjuncts`.

pub mod agg;

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Date32Array, Float64Array, Int32Array, Int64Array, StringArray,
    new_null_array,
};
use arrow::compute::kernels::cmp;
use arrow::compute::kernels::numeric;
use arrow::compute::{and_kleene, is_not_null, is_null, not, or_kleene};
use arrow::datatypes::DataType;

use crate::common::ids::SlotId;
use crate::exec::chunk::Chunk;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ExprId(pub usize);

#[derive(Clone, Debug)]
pub enum LiteralValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Date32(i32),
}

impl LiteralValue {
    fn data_type(&self) -> DataType {
        match self {
            LiteralValue::Null => DataType::Null,
            LiteralValue::Bool(_) => DataType::Boolean,
            LiteralValue::Int32(_) => DataType::Int32,
            LiteralValue::Int64(_) => DataType::Int64,
            LiteralValue::Float64(_) => DataType::Float64,
            LiteralValue::Utf8(_) => DataType::Utf8,
            LiteralValue::Date32(_) => DataType::Date32,
        }
    }
}

#[derive(Clone, Debug)]
pub enum ExprNode {
    Literal(LiteralValue),
    /// Column reference resolved through the chunk's slot-id map.
    SlotRef(SlotId, DataType),
    Add(ExprId, ExprId),
    Sub(ExprId, ExprId),
    Mul(ExprId, ExprId),
    Eq(ExprId, ExprId),
    Ne(ExprId, ExprId),
    Lt(ExprId, ExprId),
    Le(ExprId, ExprId),
    Gt(ExprId, ExprId),
    Ge(ExprId, ExprId),
    And(ExprId, ExprId),
    Or(ExprId, ExprId),
    Not(ExprId),
    IsNull(ExprId),
    IsNotNull(ExprId),
}

/// Arena of lowered expressions with per-node result types.
#[derive(Debug, Default)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
    types: Vec<DataType>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: ExprNode) -> Result<ExprId, String> {
        let data_type = self.infer_type(&node)?;
        let id = ExprId(self.nodes.len());
        self.nodes.push(node);
        self.types.push(data_type);
        Ok(id)
    }

    pub fn push_slot(&mut self, slot_id: SlotId, data_type: DataType) -> ExprId {
        let id = ExprId(self.nodes.len());
        self.nodes.push(ExprNode::SlotRef(slot_id, data_type.clone()));
        self.types.push(data_type);
        id
    }

    pub fn node(&self, id: ExprId) -> Option<&ExprNode> {
        self.nodes.get(id.0)
    }

    pub fn data_type(&self, id: ExprId) -> Option<&DataType> {
        self.types.get(id.0)
    }

    fn infer_type(&self, node: &ExprNode) -> Result<DataType, String> {
        let child_type = |id: &ExprId| -> Result<DataType, String> {
            self.types
                .get(id.0)
                .cloned()
                .ok_or_else(|| format!("invalid expr id {}", id.0))
        };
        match node {
            ExprNode::Literal(lit) => Ok(lit.data_type()),
            ExprNode::SlotRef(_, data_type) => Ok(data_type.clone()),
            ExprNode::Add(l, r) | ExprNode::Sub(l, r) | ExprNode::Mul(l, r) => {
                let lt = child_type(l)?;
                let rt = child_type(r)?;
                if lt != rt {
                    return Err(format!(
                        "arithmetic operand type mismatch: {:?} vs {:?}",
                        lt, rt
                    ));
                }
                Ok(lt)
            }
            ExprNode::Eq(l, r)
            | ExprNode::Ne(l, r)
            | ExprNode::Lt(l, r)
            | ExprNode::Le(l, r)
            | ExprNode::Gt(l, r)
            | ExprNode::Ge(l, r) => {
                let lt = child_type(l)?;
                let rt = child_type(r)?;
                if lt != rt && lt != DataType::Null && rt != DataType::Null {
                    return Err(format!(
                        "comparison operand type mismatch: {:?} vs {:?}",
                        lt, rt
                    ));
                }
                Ok(DataType::Boolean)
            }
            ExprNode::And(_, _) | ExprNode::Or(_, _) | ExprNode::Not(_) => Ok(DataType::Boolean),
            ExprNode::IsNull(_) | ExprNode::IsNotNull(_) => Ok(DataType::Boolean),
        }
    }

    pub fn eval(&self, id: ExprId, chunk: &Chunk) -> Result<ArrayRef, String> {
        let node = self
            .node(id)
            .ok_or_else(|| format!("invalid expr id {}", id.0))?;
        match node {
            ExprNode::Literal(lit) => literal_array(lit, chunk.len()),
            ExprNode::SlotRef(slot_id, _) => chunk.column_by_slot_id(*slot_id),
            ExprNode::Add(l, r) => {
                let (l, r) = (self.eval(*l, chunk)?, self.eval(*r, chunk)?);
                numeric::add(&l, &r).map_err(|e| e.to_string())
            }
            ExprNode::Sub(l, r) => {
                let (l, r) = (self.eval(*l, chunk)?, self.eval(*r, chunk)?);
                numeric::sub(&l, &r).map_err(|e| e.to_string())
            }
            ExprNode::Mul(l, r) => {
                let (l, r) = (self.eval(*l, chunk)?, self.eval(*r, chunk)?);
                numeric::mul(&l, &r).map_err(|e| e.to_string())
            }
            ExprNode::Eq(l, r) => self.eval_cmp(chunk, *l, *r, cmp::eq),
            ExprNode::Ne(l, r) => self.eval_cmp(chunk, *l, *r, cmp::neq),
            ExprNode::Lt(l, r) => self.eval_cmp(chunk, *l, *r, cmp::lt),
            ExprNode::Le(l, r) => self.eval_cmp(chunk, *l, *r, cmp::lt_eq),
            ExprNode::Gt(l, r) => self.eval_cmp(chunk, *l, *r, cmp::gt),
            ExprNode::Ge(l, r) => self.eval_cmp(chunk, *l, *r, cmp::gt_eq),
            ExprNode::And(l, r) => {
                let l = boolean_operand(self.eval(*l, chunk)?)?;
                let r = boolean_operand(self.eval(*r, chunk)?)?;
                and_kleene(&l, &r)
                    .map(|a| Arc::new(a) as ArrayRef)
                    .map_err(|e| e.to_string())
            }
            ExprNode::Or(l, r) => {
                let l = boolean_operand(self.eval(*l, chunk)?)?;
                let r = boolean_operand(self.eval(*r, chunk)?)?;
                or_kleene(&l, &r)
                    .map(|a| Arc::new(a) as ArrayRef)
                    .map_err(|e| e.to_string())
            }
            ExprNode::Not(child) => {
                let child = boolean_operand(self.eval(*child, chunk)?)?;
                not(&child)
                    .map(|a| Arc::new(a) as ArrayRef)
                    .map_err(|e| e.to_string())
            }
            ExprNode::IsNull(child) => {
                let child = self.eval(*child, chunk)?;
                is_null(child.as_ref())
                    .map(|a| Arc::new(a) as ArrayRef)
                    .map_err(|e| e.to_string())
            }
            ExprNode::IsNotNull(child) => {
                let child = self.eval(*child, chunk)?;
                is_not_null(child.as_ref())
                    .map(|a| Arc::new(a) as ArrayRef)
                    .map_err(|e| e.to_string())
            }
        }
    }

    fn eval_cmp(
        &self,
        chunk: &Chunk,
        l: ExprId,
        r: ExprId,
        op: fn(&dyn arrow::array::Datum, &dyn arrow::array::Datum) -> Result<BooleanArray, arrow::error::ArrowError>,
    ) -> Result<ArrayRef, String> {
        let l = self.eval(l, chunk)?;
        let r = self.eval(r, chunk)?;
        op(&l, &r)
            .map(|a| Arc::new(a) as ArrayRef)
            .map_err(|e| e.to_string())
    }
}

fn boolean_operand(array: ArrayRef) -> Result<BooleanArray, String> {
    array
        .as_any()
        .downcast_ref::<BooleanArray>()
        .cloned()
        .ok_or_else(|| format!("expected boolean operand, got {:?}", array.data_type()))
}

fn literal_array(lit: &LiteralValue, len: usize) -> Result<ArrayRef, String> {
    let array: ArrayRef = match lit {
        LiteralValue::Null => new_null_array(&DataType::Null, len),
        LiteralValue::Bool(v) => Arc::new(BooleanArray::from(vec![*v; len])),
        LiteralValue::Int32(v) => Arc::new(Int32Array::from_value(*v, len)),
        LiteralValue::Int64(v) => Arc::new(Int64Array::from_value(*v, len)),
        LiteralValue::Float64(v) => Arc::new(Float64Array::from_value(*v, len)),
        LiteralValue::Utf8(v) => Arc::new(StringArray::from(vec![v.as_str(); len])),
        LiteralValue::Date32(v) => Arc::new(Date32Array::from_value(*v, len)),
    };
    Ok(array)
}

/// Evaluate a conjunction of predicates against `chunk`, removing
/// non-matching rows in place. A null predicate result drops the row.
pub fn eval_conjuncts(
    arena: &ExprArena,
    conjuncts: &[ExprId],
    chunk: &mut Chunk,
) -> Result<(), String> {
    for conjunct in conjuncts {
        if chunk.is_empty() {
            return Ok(());
        }
        let mask = arena.eval(*conjunct, chunk)?;
        let mask = mask
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| {
                format!(
                    "conjunct must evaluate to a boolean array, got {:?}",
                    mask.data_type()
                )
            })?;
        chunk.filter_by_mask(mask)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, RecordBatch};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    use crate::exec::chunk::field_with_slot_id;

    fn test_chunk(values: Vec<Option<i64>>) -> Chunk {
        let schema = Arc::new(Schema::new(vec![field_with_slot_id(
            Field::new("v", DataType::Int64, true),
            SlotId::new(7),
        )]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).expect("batch");
        Chunk::new(batch)
    }

    #[test]
    fn slot_ref_comparison_filters_rows() {
        let mut arena = ExprArena::new();
        let slot = arena.push_slot(SlotId::new(7), DataType::Int64);
        let three = arena
            .push(ExprNode::Literal(LiteralValue::Int64(3)))
            .expect("literal");
        let pred = arena.push(ExprNode::Gt(slot, three)).expect("gt");

        let mut chunk = test_chunk(vec![Some(1), Some(4), None, Some(9)]);
        eval_conjuncts(&arena, &[pred], &mut chunk).expect("conjuncts");
        assert_eq!(chunk.len(), 2);
    }

    #[test]
    fn comparison_type_mismatch_is_rejected_at_push() {
        let mut arena = ExprArena::new();
        let slot = arena.push_slot(SlotId::new(7), DataType::Int64);
        let text = arena
            .push(ExprNode::Literal(LiteralValue::Utf8("x".to_string())))
            .expect("literal");
        let err = arena.push(ExprNode::Eq(slot, text)).expect_err("mismatch");
        assert!(err.contains("type mismatch"), "err={}", err);
    }
}
