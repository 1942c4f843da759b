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

use crate::exec::ExecError;
use crate::exec::chunk::Chunk;
use crate::exec::operators::aggregate::{AggMode, Aggregator, AggregatorFactory};
use crate::exec::pipeline::operator::{Operator, SourceOperator};
use crate::exec::pipeline::operator_factory::{OperatorFactory, SourceOperatorFactory};
use crate::exec::pipeline::schedule::observer::Observer;
use crate::runtime::runtime_state::RuntimeState;

/// Source half of the blocking aggregation pair: drains the shared Aggregator
/// into output chunks once the sink half reports completion.
pub struct AggregateBlockingSourceOperator {
    name: String,
    aggregator: Arc<Aggregator>,
    observer: Option<Observer>,
}

impl AggregateBlockingSourceOperator {
    pub fn new(name: String, aggregator: Arc<Aggregator>) -> Self {
        Self {
            name,
            aggregator,
            observer: None,
        }
    }

    /// Wake-up handle the driver wants invoked when the sink side makes
    /// progress; registered on the Aggregator during `prepare`.
    pub fn set_observer(&mut self, observer: Observer) {
        self.observer = Some(observer);
    }
}

impl Operator for AggregateBlockingSourceOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, state: &RuntimeState) -> Result<(), ExecError> {
        self.aggregator.init_mem_tracker(state);
        if let Some(observer) = self.observer.clone() {
            self.aggregator.attach_source_observer(observer);
        }
        Ok(())
    }

    fn close(&mut self, _state: &RuntimeState) {
        self.aggregator.unref();
    }
}

impl SourceOperator for AggregateBlockingSourceOperator {
    fn has_output(&self) -> bool {
        self.aggregator.is_sink_complete() && !self.aggregator.is_ht_eos()
    }

    fn is_finished(&self) -> bool {
        self.aggregator.is_sink_complete() && self.aggregator.is_ht_eos()
    }

    fn set_finished(&mut self, _state: &RuntimeState) -> Result<(), ExecError> {
        let notify = self.aggregator.defer_notify();
        self.aggregator.set_finished()?;
        notify.arm();
        Ok(())
    }

    fn pull_chunk(&mut self, state: &RuntimeState) -> Result<Chunk, ExecError> {
        if state.is_cancelled() {
            return Err(ExecError::Cancelled);
        }

        let chunk_size = state.chunk_size();
        let mut chunk = match self.aggregator.mode() {
            AggMode::NoGroupBy => self.aggregator.convert_to_chunk_no_groupby()?,
            AggMode::GroupBy => self.aggregator.convert_hash_map_to_chunk(chunk_size)?,
        };

        let old_size = chunk.len() as i64;
        self.aggregator.update_num_rows_returned(old_size);

        // For having: when this stage is a pre-cache operator, the aggregation
        // columns are a serialized intermediate representation (e.g.
        // count_distinct value sets) that predicate evaluation cannot
        // interpret, so having predicates must not be applied to the partial
        // and incomplete result.
        if !self.aggregator.is_pre_cache() {
            self.aggregator.eval_runtime_bloom_filters(&mut chunk)?;
            self.aggregator.eval_conjuncts(&mut chunk)?;
        }
        self.aggregator
            .update_num_rows_returned(-(old_size - chunk.len() as i64));
        Ok(chunk)
    }
}

/// Creates one source operator per driver lane, attached to the lane's shared
/// Aggregator.
pub struct AggregateBlockingSourceOperatorFactory {
    name: String,
    aggregator_factory: Arc<AggregatorFactory>,
}

impl AggregateBlockingSourceOperatorFactory {
    pub fn new(aggregator_factory: Arc<AggregatorFactory>) -> Self {
        let node_id = aggregator_factory.params().node_id;
        let name = if node_id >= 0 {
            format!("AGGREGATE_BLOCKING_SOURCE (id={node_id})")
        } else {
            "AGGREGATE_BLOCKING_SOURCE".to_string()
        };
        Self {
            name,
            aggregator_factory,
        }
    }
}

impl OperatorFactory for AggregateBlockingSourceOperatorFactory {
    fn name(&self) -> &str {
        &self.name
    }
}

impl SourceOperatorFactory for AggregateBlockingSourceOperatorFactory {
    fn create(
        &self,
        _degree_of_parallelism: i32,
        driver_sequence: i32,
    ) -> Result<Box<dyn SourceOperator>, ExecError> {
        let aggregator = self.aggregator_factory.get_or_create(driver_sequence)?;
        aggregator.incr_ref();
        Ok(Box::new(AggregateBlockingSourceOperator::new(
            self.name.clone(),
            aggregator,
        )))
    }
}
