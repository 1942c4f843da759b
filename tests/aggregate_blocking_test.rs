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
//! Integration tests for the blocking aggregation operator pair.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arrow::array::{Array, Int64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};

use basalt::common::ids::SlotId;
use basalt::exec::ExecError;
use basalt::exec::chunk::{Chunk, field_with_slot_id};
use basalt::exec::expr::agg::AggFunction;
use basalt::exec::expr::{ExprArena, ExprId, ExprNode, LiteralValue};
use basalt::exec::operators::{
    AggregateBlockingSinkOperatorFactory, AggregateBlockingSourceOperatorFactory,
    AggregatorFactory, AggregatorParams,
};
use basalt::exec::pipeline::operator::{Operator, SinkOperator, SourceOperator};
use basalt::exec::pipeline::operator_factory::{SinkOperatorFactory, SourceOperatorFactory};
use basalt::runtime::runtime_state::RuntimeState;

const KEY_SLOT: SlotId = SlotId::new(1);
const VALUE_SLOT: SlotId = SlotId::new(2);
const OUT_KEY_SLOT: SlotId = SlotId::new(10);
const OUT_AGG_SLOT: SlotId = SlotId::new(11);

struct StageBuilder {
    arena: ExprArena,
    key: ExprId,
    value: ExprId,
}

impl StageBuilder {
    fn new() -> Self {
        Self::with_types(DataType::Int64, DataType::Int64, KEY_SLOT, VALUE_SLOT)
    }

    fn with_types(key_type: DataType, value_type: DataType, key: SlotId, value: SlotId) -> Self {
        let mut arena = ExprArena::new();
        let key = arena.push_slot(key, key_type);
        let value = arena.push_slot(value, value_type);
        Self { arena, key, value }
    }

    fn params(
        mut self,
        grouped: bool,
        function: &str,
        with_input: bool,
        input_is_intermediate: bool,
        conjuncts: impl FnOnce(&mut ExprArena) -> Vec<ExprId>,
        is_pre_cache: bool,
        output_intermediate: bool,
    ) -> AggregatorParams {
        let conjuncts = conjuncts(&mut self.arena);
        AggregatorParams {
            arena: Arc::new(self.arena),
            group_by: if grouped { vec![self.key] } else { Vec::new() },
            functions: vec![AggFunction {
                name: function.to_string(),
                inputs: if with_input { vec![self.value] } else { Vec::new() },
                input_is_intermediate,
            }],
            conjuncts,
            bloom_filters: Vec::new(),
            is_pre_cache,
            output_intermediate,
            output_slots: if grouped {
                vec![OUT_KEY_SLOT, OUT_AGG_SLOT]
            } else {
                vec![OUT_AGG_SLOT]
            },
            node_id: 1,
        }
    }
}

fn grouped_sum_params() -> AggregatorParams {
    StageBuilder::new().params(true, "sum", true, false, |_| Vec::new(), false, false)
}

fn make_pair(
    params: AggregatorParams,
) -> (
    Arc<AggregatorFactory>,
    Box<dyn SinkOperator>,
    Box<dyn SourceOperator>,
) {
    let factory = Arc::new(AggregatorFactory::new(params));
    let sink = AggregateBlockingSinkOperatorFactory::new(Arc::clone(&factory))
        .create(1, 0)
        .expect("sink operator");
    let source = AggregateBlockingSourceOperatorFactory::new(Arc::clone(&factory))
        .create(1, 0)
        .expect("source operator");
    (factory, sink, source)
}

fn input_chunk(rows: &[(Option<i64>, Option<i64>)]) -> Chunk {
    let schema = Arc::new(Schema::new(vec![
        field_with_slot_id(Field::new("k", DataType::Int64, true), KEY_SLOT),
        field_with_slot_id(Field::new("v", DataType::Int64, true), VALUE_SLOT),
    ]));
    let keys: Int64Array = rows.iter().map(|(k, _)| *k).collect();
    let values: Int64Array = rows.iter().map(|(_, v)| *v).collect();
    let batch = RecordBatch::try_new(schema, vec![Arc::new(keys), Arc::new(values)])
        .expect("record batch");
    Chunk::new(batch)
}

fn push_all(
    sink: &mut Box<dyn SinkOperator>,
    state: &RuntimeState,
    inputs: Vec<Chunk>,
) {
    for chunk in inputs {
        assert!(sink.need_input());
        sink.push_chunk(state, chunk).expect("push_chunk");
    }
    sink.set_finishing(state).expect("set_finishing");
    assert!(sink.is_finished());
    assert!(!sink.need_input());
}

fn drain_all(source: &mut Box<dyn SourceOperator>, state: &RuntimeState) -> Vec<Chunk> {
    let mut outputs = Vec::new();
    while !source.is_finished() {
        assert!(source.has_output());
        outputs.push(source.pull_chunk(state).expect("pull_chunk"));
    }
    outputs
}

fn collect_grouped_i64(outputs: &[Chunk]) -> HashMap<Option<i64>, i64> {
    let mut grouped = HashMap::new();
    for chunk in outputs {
        let keys = chunk.column_by_slot_id(OUT_KEY_SLOT).expect("key column");
        let keys = keys.as_any().downcast_ref::<Int64Array>().expect("i64 keys");
        let values = chunk.column_by_slot_id(OUT_AGG_SLOT).expect("agg column");
        let values = values
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("i64 values");
        for row in 0..chunk.len() {
            let key = keys.is_valid(row).then(|| keys.value(row));
            let prev = grouped.insert(key, values.value(row));
            assert!(prev.is_none(), "group {:?} emitted twice", key);
        }
    }
    grouped
}

#[test]
fn grouped_sum_drains_every_group_exactly_once() {
    let (_, mut sink, mut source) = make_pair(grouped_sum_params());
    let state = RuntimeState::default();
    sink.prepare(&state).expect("prepare sink");
    source.prepare(&state).expect("prepare source");

    assert!(!source.has_output(), "no output before sink completion");
    assert!(!source.is_finished());

    push_all(
        &mut sink,
        &state,
        vec![
            input_chunk(&[(Some(1), Some(2))]),
            input_chunk(&[(Some(1), Some(3))]),
            input_chunk(&[(Some(2), Some(5))]),
        ],
    );

    let outputs = drain_all(&mut source, &state);
    let grouped = collect_grouped_i64(&outputs);
    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped[&Some(1)], 5);
    assert_eq!(grouped[&Some(2)], 5);

    sink.close(&state);
    source.close(&state);
}

#[test]
fn small_drain_batches_visit_every_group_once() {
    let (_, mut sink, mut source) = make_pair(grouped_sum_params());
    // Three-row output chunks force resumable partial drains.
    let state = RuntimeState::new(3, None);
    sink.prepare(&state).expect("prepare sink");
    source.prepare(&state).expect("prepare source");

    let rows: Vec<(Option<i64>, Option<i64>)> =
        (0..100).map(|i| (Some(i % 17), Some(1))).collect();
    push_all(
        &mut sink,
        &state,
        rows.chunks(7).map(input_chunk).collect(),
    );

    let outputs = drain_all(&mut source, &state);
    assert!(outputs.len() >= 6, "expected several partial drains");
    let grouped = collect_grouped_i64(&outputs);
    assert_eq!(grouped.len(), 17);
    let total: i64 = grouped.values().sum();
    assert_eq!(total, 100);
}

#[test]
fn no_group_by_count_star_folds_all_chunks_into_one_row() {
    let params = StageBuilder::new().params(false, "count", false, false, |_| Vec::new(), false, false);
    let (_, mut sink, mut source) = make_pair(params);
    let state = RuntimeState::default();
    sink.prepare(&state).expect("prepare sink");
    source.prepare(&state).expect("prepare source");

    let ten: Vec<(Option<i64>, Option<i64>)> = (0..10).map(|i| (Some(i), Some(i))).collect();
    let five: Vec<(Option<i64>, Option<i64>)> = (0..5).map(|i| (Some(i), Some(i))).collect();
    push_all(
        &mut sink,
        &state,
        vec![input_chunk(&ten), input_chunk(&[]), input_chunk(&five)],
    );

    let outputs = drain_all(&mut source, &state);
    let total_rows: usize = outputs.iter().map(|c| c.len()).sum();
    assert_eq!(total_rows, 1);
    let counts = outputs[0].column_by_slot_id(OUT_AGG_SLOT).expect("count");
    let counts = counts.as_any().downcast_ref::<Int64Array>().expect("i64");
    assert_eq!(counts.value(0), 15);
}

#[test]
fn empty_grouped_input_emits_one_empty_chunk_then_finishes() {
    let (_, mut sink, mut source) = make_pair(grouped_sum_params());
    let state = RuntimeState::default();
    sink.prepare(&state).expect("prepare sink");
    source.prepare(&state).expect("prepare source");

    push_all(&mut sink, &state, vec![input_chunk(&[])]);
    assert!(source.has_output());

    // An empty chunk is a valid "emit nothing this call" result, not
    // end-of-stream; only is_finished signals that.
    let chunk = source.pull_chunk(&state).expect("pull_chunk");
    assert_eq!(chunk.len(), 0);
    assert!(source.is_finished());
}

#[test]
fn readiness_predicates_are_idempotent_between_mutations() {
    let (_, mut sink, mut source) = make_pair(grouped_sum_params());
    let state = RuntimeState::default();
    sink.prepare(&state).expect("prepare sink");
    source.prepare(&state).expect("prepare source");

    for _ in 0..10 {
        assert!(!source.has_output());
        assert!(!source.is_finished());
        assert!(sink.need_input());
    }
    push_all(&mut sink, &state, vec![input_chunk(&[(Some(1), Some(1))])]);
    for _ in 0..10 {
        assert!(source.has_output());
        assert!(!source.is_finished());
    }
    let _ = drain_all(&mut source, &state);
    for _ in 0..10 {
        assert!(!source.has_output());
        assert!(source.is_finished());
    }
}

#[test]
fn forced_finish_mid_build_produces_zero_rows() {
    let (_, mut sink, mut source) = make_pair(grouped_sum_params());
    let state = RuntimeState::default();
    sink.prepare(&state).expect("prepare sink");
    source.prepare(&state).expect("prepare source");

    sink.push_chunk(&state, input_chunk(&[(Some(1), Some(1))]))
        .expect("push_chunk");
    source.set_finished(&state).expect("set_finished");

    assert!(source.is_finished());
    assert!(!source.has_output());
}

#[test]
fn sink_completion_wakes_registered_observer_after_publish() {
    let factory = Arc::new(AggregatorFactory::new(grouped_sum_params()));
    let aggregator = factory.get_or_create(0).expect("aggregator");
    let state = RuntimeState::default();

    let hits = Arc::new(AtomicUsize::new(0));
    let observed_complete = Arc::new(AtomicUsize::new(0));
    let aggregator_in_cb = Arc::clone(&aggregator);
    let hits_in_cb = Arc::clone(&hits);
    let observed_in_cb = Arc::clone(&observed_complete);
    aggregator.attach_source_observer(Arc::new(move || {
        hits_in_cb.fetch_add(1, Ordering::SeqCst);
        // The completion flag must already be visible when the wake-up fires.
        if aggregator_in_cb.is_sink_complete() {
            observed_in_cb.fetch_add(1, Ordering::SeqCst);
        }
    }));

    let mut sink = AggregateBlockingSinkOperatorFactory::new(Arc::clone(&factory))
        .create(1, 0)
        .expect("sink operator");
    sink.push_chunk(&state, input_chunk(&[(Some(1), Some(1))]))
        .expect("push_chunk");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    sink.set_finishing(&state).expect("set_finishing");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(observed_complete.load(Ordering::SeqCst), 1);
}

#[test]
fn conjuncts_remove_rows_and_counter_reflects_survivors() {
    let params = StageBuilder::new().params(
        true,
        "sum",
        true,
        false,
        |arena| {
            // having sum(v) > 4
            let sum_ref = arena.push_slot(OUT_AGG_SLOT, DataType::Int64);
            let four = arena
                .push(ExprNode::Literal(LiteralValue::Int64(4)))
                .expect("literal");
            vec![arena.push(ExprNode::Gt(sum_ref, four)).expect("gt")]
        },
        false,
        false,
    );
    let factory = Arc::new(AggregatorFactory::new(params));
    let aggregator = factory.get_or_create(0).expect("aggregator");
    let mut sink = AggregateBlockingSinkOperatorFactory::new(Arc::clone(&factory))
        .create(1, 0)
        .expect("sink operator");
    let mut source = AggregateBlockingSourceOperatorFactory::new(Arc::clone(&factory))
        .create(1, 0)
        .expect("source operator");
    let state = RuntimeState::default();
    sink.prepare(&state).expect("prepare sink");
    source.prepare(&state).expect("prepare source");

    // Sums: k=1 -> 5 (kept), k=2 -> 3 (removed), k=3 -> 9 (kept).
    push_all(
        &mut sink,
        &state,
        vec![input_chunk(&[
            (Some(1), Some(2)),
            (Some(1), Some(3)),
            (Some(2), Some(3)),
            (Some(3), Some(9)),
        ])],
    );
    let outputs = drain_all(&mut source, &state);
    let grouped = collect_grouped_i64(&outputs);
    assert_eq!(grouped.len(), 2);
    assert!(grouped.contains_key(&Some(1)));
    assert!(grouped.contains_key(&Some(3)));
    // Counter reflects only rows that survived filtering.
    assert_eq!(aggregator.num_rows_returned(), 2);
}

#[test]
fn pre_cache_output_is_identical_with_and_without_conjuncts() {
    let run = |with_conjunct: bool| -> Vec<RecordBatch> {
        let params = StageBuilder::new().params(
            true,
            "count_distinct",
            true,
            false,
            |arena| {
                if !with_conjunct {
                    return Vec::new();
                }
                // A predicate that would drop every row if it were applied.
                let key_ref = arena.push_slot(OUT_KEY_SLOT, DataType::Int64);
                let large = arena
                    .push(ExprNode::Literal(LiteralValue::Int64(1_000)))
                    .expect("literal");
                vec![arena.push(ExprNode::Gt(key_ref, large)).expect("gt")]
            },
            true,
            true,
        );
        let (_, mut sink, mut source) = make_pair(params);
        let state = RuntimeState::default();
        sink.prepare(&state).expect("prepare sink");
        source.prepare(&state).expect("prepare source");
        push_all(
            &mut sink,
            &state,
            vec![input_chunk(&[
                (Some(1), Some(7)),
                (Some(1), Some(7)),
                (Some(2), Some(8)),
            ])],
        );
        drain_all(&mut source, &state)
            .into_iter()
            .map(|c| c.batch)
            .collect()
    };

    let with_conjunct = run(true);
    let without_conjunct = run(false);
    assert_eq!(with_conjunct, without_conjunct);
    let total_rows: usize = with_conjunct.iter().map(|b| b.num_rows()).sum();
    assert_eq!(total_rows, 2);
}

#[test]
fn pre_cache_output_merges_in_a_second_stage() {
    // Stage 1: pre-cache count_distinct emitting serialized value sets.
    let params = StageBuilder::new().params(
        true,
        "count_distinct",
        true,
        false,
        |_| Vec::new(),
        true,
        true,
    );
    let (_, mut sink, mut source) = make_pair(params);
    let state = RuntimeState::default();
    sink.prepare(&state).expect("prepare sink");
    source.prepare(&state).expect("prepare source");
    push_all(
        &mut sink,
        &state,
        vec![
            input_chunk(&[(Some(1), Some(7)), (Some(2), Some(8))]),
            input_chunk(&[(Some(1), Some(9)), (Some(2), Some(8))]),
        ],
    );
    let intermediates = drain_all(&mut source, &state);

    // Stage 2: merge the serialized sets into final distinct counts.
    let merge_params = StageBuilder::with_types(
        DataType::Int64,
        DataType::Binary,
        OUT_KEY_SLOT,
        OUT_AGG_SLOT,
    )
    .params(
        true,
        "count_distinct",
        true,
        true,
        |_| Vec::new(),
        false,
        false,
    );
    let (_, mut merge_sink, mut merge_source) = make_pair(merge_params);
    merge_sink.prepare(&state).expect("prepare merge sink");
    merge_source.prepare(&state).expect("prepare merge source");
    for chunk in intermediates {
        merge_sink.push_chunk(&state, chunk).expect("push merge");
    }
    merge_sink.set_finishing(&state).expect("finish merge");
    let outputs = drain_all(&mut merge_source, &state);

    let grouped = collect_grouped_i64(&outputs);
    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped[&Some(1)], 2, "distinct {{7, 9}}");
    assert_eq!(grouped[&Some(2)], 1, "distinct {{8}}");
}

#[test]
fn runtime_bloom_filters_never_drop_inserted_keys() {
    use arrow::array::ArrayRef;
    use basalt::exec::runtime_filter::RuntimeBloomFilter;

    // Build-side saw only key 1; the filter is bound to the output key slot.
    let mut bloom = RuntimeBloomFilter::new(1, OUT_KEY_SLOT, 1024, 7);
    let build_keys: ArrayRef = Arc::new(Int64Array::from(vec![1i64]));
    bloom.insert_array(&build_keys).expect("insert");

    let mut builder = StageBuilder::new();
    let conjuncts = Vec::new();
    let params = AggregatorParams {
        arena: Arc::new(std::mem::take(&mut builder.arena)),
        group_by: vec![builder.key],
        functions: vec![AggFunction {
            name: "sum".to_string(),
            inputs: vec![builder.value],
            input_is_intermediate: false,
        }],
        conjuncts,
        bloom_filters: vec![bloom],
        is_pre_cache: false,
        output_intermediate: false,
        output_slots: vec![OUT_KEY_SLOT, OUT_AGG_SLOT],
        node_id: 1,
    };
    let factory = Arc::new(AggregatorFactory::new(params));
    let aggregator = factory.get_or_create(0).expect("aggregator");
    let mut sink = AggregateBlockingSinkOperatorFactory::new(Arc::clone(&factory))
        .create(1, 0)
        .expect("sink operator");
    let mut source = AggregateBlockingSourceOperatorFactory::new(Arc::clone(&factory))
        .create(1, 0)
        .expect("source operator");
    let state = RuntimeState::default();
    sink.prepare(&state).expect("prepare sink");
    source.prepare(&state).expect("prepare source");

    push_all(
        &mut sink,
        &state,
        vec![input_chunk(&[(Some(1), Some(2)), (Some(2), Some(3))])],
    );
    let outputs = drain_all(&mut source, &state);
    let total_rows: usize = outputs.iter().map(|c| c.len()).sum();

    // A bloom filter has no false negatives: the inserted key must survive.
    let mut saw_key_one = false;
    for chunk in &outputs {
        let keys = chunk.column_by_slot_id(OUT_KEY_SLOT).expect("keys");
        let keys = keys.as_any().downcast_ref::<Int64Array>().expect("i64");
        saw_key_one |= keys.iter().flatten().any(|k| k == 1);
    }
    assert!(saw_key_one);
    assert!((1..=2).contains(&total_rows));
    // The counter accounts exactly for whatever the filter removed.
    assert_eq!(aggregator.num_rows_returned(), total_rows as i64);
}

#[test]
fn cancellation_aborts_pull_without_finalizing() {
    let (_, mut sink, mut source) = make_pair(grouped_sum_params());
    let state = RuntimeState::default();
    sink.prepare(&state).expect("prepare sink");
    source.prepare(&state).expect("prepare source");

    push_all(&mut sink, &state, vec![input_chunk(&[(Some(1), Some(1))])]);
    state.cancel();
    let err = source.pull_chunk(&state).expect_err("cancelled");
    assert_eq!(err, ExecError::Cancelled);
    // Cancellation does not implicitly finalize the aggregator.
    assert!(source.has_output());
    assert!(!source.is_finished());
}

#[test]
fn sum_overflow_surfaces_as_compute_error() {
    let (_, mut sink, _source) = make_pair(grouped_sum_params());
    let state = RuntimeState::default();
    sink.prepare(&state).expect("prepare sink");

    let err = sink
        .push_chunk(
            &state,
            input_chunk(&[(Some(1), Some(i64::MAX)), (Some(1), Some(1))]),
        )
        .expect_err("overflow");
    assert!(matches!(err, ExecError::Compute(_)), "err={}", err);
}

#[test]
fn push_after_finishing_is_rejected() {
    let (_, mut sink, _source) = make_pair(grouped_sum_params());
    let state = RuntimeState::default();
    sink.prepare(&state).expect("prepare sink");
    sink.set_finishing(&state).expect("set_finishing");
    let err = sink
        .push_chunk(&state, input_chunk(&[(Some(1), Some(1))]))
        .expect_err("push after finishing");
    assert!(matches!(err, ExecError::Compute(_)));
}
