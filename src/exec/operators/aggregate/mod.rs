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
//! Shared aggregation state for blocking sink/source split execution.
//!
//! Responsibilities:
//! - Owns the group-key hash table (or the single global accumulator) and the
//!   drain cursor, reference-counted across the operator pair.
//! - Coordinates readiness, forced finish, and output visibility between the
//!   sink and source halves through flags and observer notifications.
//!
//! Key exported interfaces:
//! - Types: `Aggregator`, `AggregatorParams`, `AggregatorFactory`, `AggMode`.
//!
//! The sink half mutates the hash table until `finalize_sink`; completion is a
//! publish point, after which the source half owns draining exclusively. Both
//! halves notify blocked peers only after their state change is committed, via
//! [`DeferNotify`](crate::exec::pipeline::schedule::observer::DeferNotify).

mod blocking_sink;
mod blocking_source;

pub use blocking_sink::{AggregateBlockingSinkOperator, AggregateBlockingSinkOperatorFactory};
pub use blocking_source::{
    AggregateBlockingSourceOperator, AggregateBlockingSourceOperatorFactory,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arrow::array::{ArrayRef, RecordBatch, RecordBatchOptions};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use crate::basalt_logging::debug;
use crate::common::ids::SlotId;
use crate::exec::ExecError;
use crate::exec::chunk::{Chunk, field_with_slot_id};
use crate::exec::expr::agg::{AggFunction, AggKernelSet, build_kernel_set};
use crate::exec::expr::{ExprArena, ExprId, eval_conjuncts};
use crate::exec::hash_table::KeyTable;
use crate::exec::pipeline::schedule::observer::{DeferNotify, Observable, Observer};
use crate::exec::runtime_filter::{RuntimeBloomFilter, eval_bloom_filters};
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::runtime_state::RuntimeState;

/// Grouped vs. global aggregation, fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggMode {
    NoGroupBy,
    GroupBy,
}

/// Plan-time description of one aggregation stage, shared by every parallel
/// lane's Aggregator.
pub struct AggregatorParams {
    pub arena: Arc<ExprArena>,
    pub group_by: Vec<ExprId>,
    pub functions: Vec<AggFunction>,
    /// Having predicates applied to the materialized output.
    pub conjuncts: Vec<ExprId>,
    pub bloom_filters: Vec<RuntimeBloomFilter>,
    /// Output feeds a downstream merge stage: emit serialized intermediate
    /// state and never filter it.
    pub is_pre_cache: bool,
    /// Emit intermediate accumulator representations instead of finalized
    /// values (first stage of a two-stage aggregation).
    pub output_intermediate: bool,
    /// Slot ids of the output columns: group keys first, then one per
    /// aggregate function.
    pub output_slots: Vec<SlotId>,
    pub node_id: i32,
}

struct AggregatorMem {
    key_table: Arc<MemTracker>,
    agg_states: Arc<MemTracker>,
}

struct AggregatorCore {
    key_table: Option<KeyTable>,
    kernels: AggKernelSet,
    drain_cursor: usize,
    /// Key columns materialized once at the first drain step, then sliced
    /// per batch so partial drains never rescan the table.
    drained_key_arrays: Option<Vec<ArrayRef>>,
    group_ids: Vec<usize>,
    released: bool,
    mem: Option<AggregatorMem>,
    accounted_table_bytes: i64,
    accounted_state_bytes: i64,
}

/// Shared, reference-counted aggregation state for one parallel lane.
pub struct Aggregator {
    params: Arc<AggregatorParams>,
    mode: AggMode,
    output_schema: SchemaRef,
    sink_complete: AtomicBool,
    ht_eos: AtomicBool,
    sink_finalized: AtomicBool,
    ref_count: AtomicUsize,
    num_rows_returned: AtomicI64,
    observable: Arc<Observable>,
    core: Mutex<AggregatorCore>,
}

impl Aggregator {
    pub fn try_new(params: Arc<AggregatorParams>) -> Result<Self, ExecError> {
        let group_types = group_key_types(&params)?;
        let agg_input_types = agg_input_types(&params)?;
        let mut kernels =
            build_kernel_set(&params.functions, &agg_input_types).map_err(ExecError::Compute)?;

        let mode = if params.group_by.is_empty() {
            AggMode::NoGroupBy
        } else {
            AggMode::GroupBy
        };
        let key_table = match mode {
            AggMode::NoGroupBy => {
                // The single global accumulator exists from construction so a
                // zero-row input still folds into exactly one output row.
                kernels.ensure_groups(1);
                None
            }
            AggMode::GroupBy => Some(KeyTable::new(group_types.clone()).map_err(ExecError::Compute)?),
        };
        let output_schema = build_output_schema(&params, &group_types, &kernels)?;

        Ok(Self {
            params,
            mode,
            output_schema,
            sink_complete: AtomicBool::new(false),
            ht_eos: AtomicBool::new(false),
            sink_finalized: AtomicBool::new(false),
            ref_count: AtomicUsize::new(0),
            num_rows_returned: AtomicI64::new(0),
            observable: Arc::new(Observable::new()),
            core: Mutex::new(AggregatorCore {
                key_table,
                kernels,
                drain_cursor: 0,
                drained_key_arrays: None,
                group_ids: Vec::new(),
                released: false,
                mem: None,
                accounted_table_bytes: 0,
                accounted_state_bytes: 0,
            }),
        })
    }

    pub fn mode(&self) -> AggMode {
        self.mode
    }

    pub fn is_pre_cache(&self) -> bool {
        self.params.is_pre_cache
    }

    pub fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.output_schema)
    }

    pub fn is_sink_complete(&self) -> bool {
        self.sink_complete.load(Ordering::Acquire)
    }

    pub fn is_ht_eos(&self) -> bool {
        self.ht_eos.load(Ordering::Acquire)
    }

    pub fn num_rows_returned(&self) -> i64 {
        self.num_rows_returned.load(Ordering::Acquire)
    }

    pub fn update_num_rows_returned(&self, delta: i64) {
        self.num_rows_returned.fetch_add(delta, Ordering::AcqRel);
    }

    /// Register a wake-up handle fired on readiness transitions
    /// (sink completion and forced finish).
    pub fn attach_source_observer(&self, observer: Observer) {
        self.observable.add_observer(observer);
    }

    /// Token that notifies attached observers when dropped, if armed. Arm it
    /// only after the state change it announces is committed.
    pub fn defer_notify(&self) -> DeferNotify {
        self.observable.defer_notify()
    }

    pub fn incr_ref(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one operator reference; the last one releases the hash table and
    /// accumulator memory.
    pub fn unref(&self) {
        if self.ref_count.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let mut core = self.core.lock().expect("aggregator lock");
        self.release_core(&mut core);
    }

    /// Lazily parent the Aggregator's accounting under the fragment's tracker.
    pub fn init_mem_tracker(&self, state: &RuntimeState) {
        let Some(parent) = state.mem_tracker() else {
            return;
        };
        let mut core = self.core.lock().expect("aggregator lock");
        if core.mem.is_some() {
            return;
        }
        core.mem = Some(AggregatorMem {
            key_table: MemTracker::new_child("KeyTable", &parent),
            agg_states: MemTracker::new_child("AggStates", &parent),
        });
    }

    /// Fold one input chunk into per-group accumulator state. Tolerates empty
    /// chunks. Sink-side only; rejected after sink completion.
    pub fn update(&self, chunk: &Chunk) -> Result<(), ExecError> {
        if chunk.is_empty() {
            return Ok(());
        }
        if self.is_sink_complete() {
            return Err(ExecError::Compute(
                "aggregate update after sink completion".to_string(),
            ));
        }
        let num_rows = chunk.len();
        let group_arrays = self.eval_group_by_arrays(chunk)?;
        let agg_arrays = self.eval_agg_arrays(chunk)?;

        let mut guard = self.core.lock().expect("aggregator lock");
        let core = &mut *guard;
        match self.mode {
            AggMode::NoGroupBy => {
                core.group_ids.clear();
                core.group_ids.resize(num_rows, 0);
            }
            AggMode::GroupBy => {
                let key_table = core
                    .key_table
                    .as_mut()
                    .ok_or_else(|| ExecError::Compute("aggregate key table missing".to_string()))?;
                let hashes = key_table
                    .build_hashes(&group_arrays, num_rows)
                    .map_err(ExecError::Compute)?;
                let rows = key_table
                    .build_rows(&group_arrays)
                    .map_err(ExecError::Compute)?;
                core.group_ids.clear();
                core.group_ids.reserve(num_rows);
                for row in 0..num_rows {
                    let row_bytes = rows.as_ref().map(|rows| rows.row(row).data());
                    let lookup = key_table
                        .find_or_insert(&group_arrays, row, row_bytes, hashes[row])
                        .map_err(ExecError::Compute)?;
                    core.group_ids.push(lookup.group_id);
                }
                let groups = key_table.group_count();
                core.kernels.ensure_groups(groups);
            }
        }

        for (idx, func) in self.params.functions.iter().enumerate() {
            let entry = core
                .kernels
                .entries
                .get_mut(idx)
                .ok_or_else(|| ExecError::Compute("aggregate kernel missing".to_string()))?;
            let array = agg_arrays
                .get(idx)
                .ok_or_else(|| ExecError::Compute("aggregate input missing".to_string()))?;
            if func.input_is_intermediate {
                let view = entry.build_merge_view(array).map_err(ExecError::Compute)?;
                entry
                    .merge_batch(&core.group_ids, &view)
                    .map_err(ExecError::Compute)?;
            } else {
                let view = entry.build_input_view(array).map_err(ExecError::Compute)?;
                entry
                    .update_batch(&core.group_ids, &view)
                    .map_err(ExecError::Compute)?;
            }
        }

        self.account_memory(core)
    }

    /// Publish sink completion. Must be called exactly once; all accumulator
    /// updates become visible to any thread observing `is_sink_complete`.
    pub fn finalize_sink(&self) -> Result<(), ExecError> {
        if self.sink_finalized.swap(true, Ordering::AcqRel) {
            return Err(ExecError::Compute(
                "finalize_sink called more than once".to_string(),
            ));
        }
        self.sink_complete.store(true, Ordering::Release);
        Ok(())
    }

    /// Force-complete from any state, discarding undrained accumulator state.
    /// The caller holds a `defer_notify` token and arms it after this returns.
    pub fn set_finished(&self) -> Result<(), ExecError> {
        self.sink_finalized.store(true, Ordering::Release);
        {
            let mut core = self.core.lock().expect("aggregator lock");
            core.kernels.clear();
            core.key_table = None;
            core.drained_key_arrays = None;
            self.release_accounted(&mut core);
        }
        self.sink_complete.store(true, Ordering::Release);
        self.ht_eos.store(true, Ordering::Release);
        debug!(
            "aggregator force-finished: node_id={} rows_returned={}",
            self.params.node_id,
            self.num_rows_returned()
        );
        Ok(())
    }

    /// Materialize the single global accumulator into one output row and mark
    /// draining complete. Source-side, NoGroupBy mode only.
    pub fn convert_to_chunk_no_groupby(&self) -> Result<Chunk, ExecError> {
        let mut guard = self.core.lock().expect("aggregator lock");
        let core = &mut *guard;
        let groups = core.kernels.group_count();
        let mut arrays = Vec::with_capacity(core.kernels.entries.len());
        for entry in &core.kernels.entries {
            arrays.push(
                entry
                    .build_array(0..groups, self.params.output_intermediate)
                    .map_err(ExecError::Compute)?,
            );
        }
        core.drain_cursor = groups;
        self.ht_eos.store(true, Ordering::Release);
        self.build_chunk(arrays, groups)
    }

    /// Materialize up to `batch_size` groups starting at the drain cursor and
    /// advance it; marks draining complete once the cursor reaches the end.
    /// Source-side, GroupBy mode only.
    pub fn convert_hash_map_to_chunk(&self, batch_size: usize) -> Result<Chunk, ExecError> {
        let mut guard = self.core.lock().expect("aggregator lock");
        let core = &mut *guard;
        let total = core.kernels.group_count();
        if core.drained_key_arrays.is_none() {
            let key_table = core
                .key_table
                .as_ref()
                .ok_or_else(|| ExecError::Compute("aggregate key table missing".to_string()))?;
            let mut key_arrays = Vec::with_capacity(key_table.key_columns().len());
            for column in key_table.key_columns() {
                key_arrays.push(column.to_array().map_err(ExecError::Compute)?);
            }
            core.drained_key_arrays = Some(key_arrays);
        }

        let start = core.drain_cursor;
        let end = start.saturating_add(batch_size.max(1)).min(total);
        core.drain_cursor = end;
        let len = end - start;

        let key_arrays = core
            .drained_key_arrays
            .as_ref()
            .ok_or_else(|| ExecError::Compute("drained key arrays missing".to_string()))?;
        let mut arrays = Vec::with_capacity(key_arrays.len() + core.kernels.entries.len());
        for key_array in key_arrays {
            arrays.push(key_array.slice(start, len));
        }
        for entry in &core.kernels.entries {
            arrays.push(
                entry
                    .build_array(start..end, self.params.output_intermediate)
                    .map_err(ExecError::Compute)?,
            );
        }
        if core.drain_cursor >= total {
            self.ht_eos.store(true, Ordering::Release);
        }
        self.build_chunk(arrays, len)
    }

    pub fn eval_runtime_bloom_filters(&self, chunk: &mut Chunk) -> Result<(), ExecError> {
        eval_bloom_filters(&self.params.bloom_filters, chunk).map_err(ExecError::Compute)
    }

    pub fn eval_conjuncts(&self, chunk: &mut Chunk) -> Result<(), ExecError> {
        eval_conjuncts(&self.params.arena, &self.params.conjuncts, chunk)
            .map_err(ExecError::Compute)
    }

    fn eval_group_by_arrays(&self, chunk: &Chunk) -> Result<Vec<ArrayRef>, ExecError> {
        let mut arrays = Vec::with_capacity(self.params.group_by.len());
        for expr in &self.params.group_by {
            arrays.push(
                self.params
                    .arena
                    .eval(*expr, chunk)
                    .map_err(ExecError::Compute)?,
            );
        }
        Ok(arrays)
    }

    fn eval_agg_arrays(&self, chunk: &Chunk) -> Result<Vec<Option<ArrayRef>>, ExecError> {
        let mut arrays = Vec::with_capacity(self.params.functions.len());
        for func in &self.params.functions {
            let array = match func.inputs.as_slice() {
                [] => None,
                [expr] => Some(
                    self.params
                        .arena
                        .eval(*expr, chunk)
                        .map_err(ExecError::Compute)?,
                ),
                _ => {
                    return Err(ExecError::Compute(format!(
                        "aggregate {} must have at most one input expression",
                        func.name
                    )));
                }
            };
            arrays.push(array);
        }
        Ok(arrays)
    }

    fn build_chunk(&self, arrays: Vec<ArrayRef>, num_rows: usize) -> Result<Chunk, ExecError> {
        let batch = if arrays.is_empty() {
            let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
            RecordBatch::try_new_with_options(self.output_schema(), arrays, &options)
        } else {
            RecordBatch::try_new(self.output_schema(), arrays)
        }
        .map_err(|e| ExecError::Compute(e.to_string()))?;
        Chunk::try_new(batch).map_err(ExecError::Compute)
    }

    fn account_memory(&self, core: &mut AggregatorCore) -> Result<(), ExecError> {
        let Some(mem) = core.mem.as_ref() else {
            return Ok(());
        };
        let table_bytes = core
            .key_table
            .as_ref()
            .map(|t| t.estimated_bytes())
            .unwrap_or(0) as i64;
        let state_bytes = core.kernels.estimated_bytes() as i64;
        if table_bytes > core.accounted_table_bytes {
            mem.key_table
                .try_consume(table_bytes - core.accounted_table_bytes)
                .map_err(ExecError::ResourceExhausted)?;
            core.accounted_table_bytes = table_bytes;
        }
        if state_bytes > core.accounted_state_bytes {
            mem.agg_states
                .try_consume(state_bytes - core.accounted_state_bytes)
                .map_err(ExecError::ResourceExhausted)?;
            core.accounted_state_bytes = state_bytes;
        }
        Ok(())
    }

    fn release_accounted(&self, core: &mut AggregatorCore) {
        if let Some(mem) = core.mem.as_ref() {
            mem.key_table.release(core.accounted_table_bytes);
            mem.agg_states.release(core.accounted_state_bytes);
        }
        core.accounted_table_bytes = 0;
        core.accounted_state_bytes = 0;
    }

    fn release_core(&self, core: &mut AggregatorCore) {
        if core.released {
            return;
        }
        core.released = true;
        core.kernels.clear();
        core.key_table = None;
        core.drained_key_arrays = None;
        self.release_accounted(core);
    }
}

fn group_key_types(params: &AggregatorParams) -> Result<Vec<DataType>, ExecError> {
    let mut types = Vec::with_capacity(params.group_by.len());
    for expr in &params.group_by {
        let data_type = params
            .arena
            .data_type(*expr)
            .ok_or_else(|| ExecError::Compute("group by type missing".to_string()))?
            .clone();
        if matches!(data_type, DataType::Null) {
            return Err(ExecError::Compute("group by type is null".to_string()));
        }
        types.push(data_type);
    }
    Ok(types)
}

fn agg_input_types(params: &AggregatorParams) -> Result<Vec<Option<DataType>>, ExecError> {
    let mut types = Vec::with_capacity(params.functions.len());
    for func in &params.functions {
        let data_type = match (func.name.as_str(), func.inputs.as_slice()) {
            ("count", []) => None,
            (_, [expr]) => Some(
                params
                    .arena
                    .data_type(*expr)
                    .ok_or_else(|| ExecError::Compute("aggregate input type missing".to_string()))?
                    .clone(),
            ),
            (_, []) => {
                return Err(ExecError::Compute(format!(
                    "aggregate function {} requires an input",
                    func.name
                )));
            }
            (_, _) => {
                return Err(ExecError::Compute(format!(
                    "aggregate {} must have at most one input expression",
                    func.name
                )));
            }
        };
        if matches!(data_type, Some(DataType::Null)) {
            return Err(ExecError::Compute(
                "aggregate input type is null".to_string(),
            ));
        }
        types.push(data_type);
    }
    Ok(types)
}

fn build_output_schema(
    params: &AggregatorParams,
    group_types: &[DataType],
    kernels: &AggKernelSet,
) -> Result<SchemaRef, ExecError> {
    let column_count = group_types.len() + kernels.entries.len();
    if params.output_slots.len() != column_count {
        return Err(ExecError::Compute(format!(
            "aggregate output slot count mismatch: slots={} columns={}",
            params.output_slots.len(),
            column_count
        )));
    }
    let mut fields = Vec::with_capacity(column_count);
    for (idx, data_type) in group_types.iter().enumerate() {
        let field = Field::new(format!("group_{idx}"), data_type.clone(), true);
        fields.push(field_with_slot_id(field, params.output_slots[idx]));
    }
    for (idx, entry) in kernels.entries.iter().enumerate() {
        let name = params
            .functions
            .get(idx)
            .map(|f| format!("{}_{idx}", f.name))
            .unwrap_or_else(|| format!("agg_{idx}"));
        let field = Field::new(name, entry.output_type(params.output_intermediate), true);
        fields.push(field_with_slot_id(
            field,
            params.output_slots[group_types.len() + idx],
        ));
    }
    Ok(Arc::new(Schema::new(fields)))
}

/// Hands out one shared Aggregator per driver sequence so the sink and source
/// halves of a lane cooperate while parallel lanes stay independent.
pub struct AggregatorFactory {
    params: Arc<AggregatorParams>,
    aggregators: Mutex<HashMap<i32, Arc<Aggregator>>>,
}

impl AggregatorFactory {
    pub fn new(params: AggregatorParams) -> Self {
        Self {
            params: Arc::new(params),
            aggregators: Mutex::new(HashMap::new()),
        }
    }

    pub fn params(&self) -> &Arc<AggregatorParams> {
        &self.params
    }

    pub fn get_or_create(&self, driver_sequence: i32) -> Result<Arc<Aggregator>, ExecError> {
        let mut guard = self.aggregators.lock().expect("aggregator factory lock");
        if let Some(aggregator) = guard.get(&driver_sequence) {
            return Ok(Arc::clone(aggregator));
        }
        let aggregator = Arc::new(Aggregator::try_new(Arc::clone(&self.params))?);
        guard.insert(driver_sequence, Arc::clone(&aggregator));
        Ok(aggregator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::Field;

    fn sum_params(group_by: bool) -> (Arc<ExprArena>, AggregatorParams) {
        let mut arena = ExprArena::new();
        let key = arena.push_slot(SlotId::new(1), DataType::Int64);
        let value = arena.push_slot(SlotId::new(2), DataType::Int64);
        let arena = Arc::new(arena);
        let params = AggregatorParams {
            arena: Arc::clone(&arena),
            group_by: if group_by { vec![key] } else { Vec::new() },
            functions: vec![AggFunction {
                name: "sum".to_string(),
                inputs: vec![value],
                input_is_intermediate: false,
            }],
            conjuncts: Vec::new(),
            bloom_filters: Vec::new(),
            is_pre_cache: false,
            output_intermediate: false,
            output_slots: if group_by {
                vec![SlotId::new(10), SlotId::new(11)]
            } else {
                vec![SlotId::new(11)]
            },
            node_id: 1,
        };
        (arena, params)
    }

    fn input_chunk(keys: Vec<i64>, values: Vec<i64>) -> Chunk {
        let schema = Arc::new(Schema::new(vec![
            field_with_slot_id(Field::new("k", DataType::Int64, true), SlotId::new(1)),
            field_with_slot_id(Field::new("v", DataType::Int64, true), SlotId::new(2)),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(keys)),
                Arc::new(Int64Array::from(values)),
            ],
        )
        .expect("batch");
        Chunk::new(batch)
    }

    #[test]
    fn finalize_sink_rejects_second_call() {
        let (_, params) = sum_params(true);
        let aggregator = Aggregator::try_new(Arc::new(params)).expect("aggregator");
        aggregator.finalize_sink().expect("first finalize");
        let err = aggregator.finalize_sink().expect_err("second finalize");
        assert!(matches!(err, ExecError::Compute(_)));
    }

    #[test]
    fn draining_cannot_complete_before_sink() {
        let (_, params) = sum_params(true);
        let aggregator = Aggregator::try_new(Arc::new(params)).expect("aggregator");
        aggregator
            .update(&input_chunk(vec![1, 2], vec![10, 20]))
            .expect("update");
        assert!(!aggregator.is_sink_complete());
        assert!(!aggregator.is_ht_eos());
        aggregator.finalize_sink().expect("finalize");
        assert!(aggregator.is_sink_complete());
        assert!(!aggregator.is_ht_eos());
        let chunk = aggregator.convert_hash_map_to_chunk(16).expect("drain");
        assert_eq!(chunk.len(), 2);
        // ht_eos implies sink_complete by construction.
        assert!(aggregator.is_ht_eos() && aggregator.is_sink_complete());
    }

    #[test]
    fn partial_drains_resume_without_repeats() {
        let (_, params) = sum_params(true);
        let aggregator = Aggregator::try_new(Arc::new(params)).expect("aggregator");
        aggregator
            .update(&input_chunk(vec![1, 2, 3, 4, 5], vec![1, 1, 1, 1, 1]))
            .expect("update");
        aggregator.finalize_sink().expect("finalize");
        let mut rows = 0usize;
        let mut steps = 0usize;
        while !aggregator.is_ht_eos() {
            let chunk = aggregator.convert_hash_map_to_chunk(2).expect("drain");
            rows += chunk.len();
            steps += 1;
        }
        assert_eq!(rows, 5);
        assert_eq!(steps, 3);
    }

    #[test]
    fn forced_finish_discards_buffered_state() {
        let (_, params) = sum_params(true);
        let aggregator = Aggregator::try_new(Arc::new(params)).expect("aggregator");
        aggregator
            .update(&input_chunk(vec![1, 2], vec![10, 20]))
            .expect("update");
        let notify = aggregator.defer_notify();
        aggregator.set_finished().expect("force finish");
        notify.arm();
        assert!(aggregator.is_sink_complete());
        assert!(aggregator.is_ht_eos());
    }

    #[test]
    fn no_group_by_accumulator_exists_from_construction() {
        let (_, params) = sum_params(false);
        let aggregator = Aggregator::try_new(Arc::new(params)).expect("aggregator");
        aggregator.finalize_sink().expect("finalize");
        let chunk = aggregator
            .convert_to_chunk_no_groupby()
            .expect("convert");
        assert_eq!(chunk.len(), 1);
        assert!(aggregator.is_ht_eos());
    }

    #[test]
    fn observer_fires_only_after_arm() {
        use std::sync::atomic::AtomicUsize;
        let (_, params) = sum_params(true);
        let aggregator = Aggregator::try_new(Arc::new(params)).expect("aggregator");
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_cb = Arc::clone(&hits);
        aggregator.attach_source_observer(Arc::new(move || {
            hits_in_cb.fetch_add(1, Ordering::SeqCst);
        }));
        {
            let notify = aggregator.defer_notify();
            aggregator.finalize_sink().expect("finalize");
            notify.arm();
            assert_eq!(hits.load(Ordering::SeqCst), 0);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
