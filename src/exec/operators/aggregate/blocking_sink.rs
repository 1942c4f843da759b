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
use crate::exec::operators::aggregate::{Aggregator, AggregatorFactory};
use crate::exec::pipeline::operator::{Operator, SinkOperator};
use crate::exec::pipeline::operator_factory::{OperatorFactory, SinkOperatorFactory};
use crate::runtime::runtime_state::RuntimeState;

/// Sink half of the blocking aggregation pair: folds input chunks into the
/// shared Aggregator and publishes completion at end of input.
pub struct AggregateBlockingSinkOperator {
    name: String,
    aggregator: Arc<Aggregator>,
    finishing: bool,
}

impl AggregateBlockingSinkOperator {
    pub fn new(name: String, aggregator: Arc<Aggregator>) -> Self {
        Self {
            name,
            aggregator,
            finishing: false,
        }
    }
}

impl Operator for AggregateBlockingSinkOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, state: &RuntimeState) -> Result<(), ExecError> {
        self.aggregator.init_mem_tracker(state);
        Ok(())
    }

    fn close(&mut self, _state: &RuntimeState) {
        self.aggregator.unref();
    }
}

impl SinkOperator for AggregateBlockingSinkOperator {
    fn need_input(&self) -> bool {
        !self.is_finished()
    }

    fn is_finished(&self) -> bool {
        self.finishing || self.aggregator.is_sink_complete()
    }

    fn push_chunk(&mut self, _state: &RuntimeState, chunk: Chunk) -> Result<(), ExecError> {
        if self.is_finished() {
            return Err(ExecError::Compute(
                "aggregate sink received input after finishing".to_string(),
            ));
        }
        self.aggregator.update(&chunk)
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<(), ExecError> {
        // Already complete, either naturally or through a forced finish from
        // the source half.
        if self.is_finished() {
            return Ok(());
        }
        self.finishing = true;
        // Publish completion first, then wake blocked source drivers: an
        // observer woken early could read sink_complete == false and stall.
        let notify = self.aggregator.defer_notify();
        self.aggregator.finalize_sink()?;
        notify.arm();
        Ok(())
    }
}

/// Creates one sink operator per driver lane, attached to the lane's shared
/// Aggregator.
pub struct AggregateBlockingSinkOperatorFactory {
    name: String,
    aggregator_factory: Arc<AggregatorFactory>,
}

impl AggregateBlockingSinkOperatorFactory {
    pub fn new(aggregator_factory: Arc<AggregatorFactory>) -> Self {
        let node_id = aggregator_factory.params().node_id;
        let name = if node_id >= 0 {
            format!("AGGREGATE_BLOCKING_SINK (id={node_id})")
        } else {
            "AGGREGATE_BLOCKING_SINK".to_string()
        };
        Self {
            name,
            aggregator_factory,
        }
    }
}

impl OperatorFactory for AggregateBlockingSinkOperatorFactory {
    fn name(&self) -> &str {
        &self.name
    }
}

impl SinkOperatorFactory for AggregateBlockingSinkOperatorFactory {
    fn create(
        &self,
        _degree_of_parallelism: i32,
        driver_sequence: i32,
    ) -> Result<Box<dyn SinkOperator>, ExecError> {
        let aggregator = self.aggregator_factory.get_or_create(driver_sequence)?;
        aggregator.incr_ref();
        Ok(Box::new(AggregateBlockingSinkOperator::new(
            self.name.clone(),
            aggregator,
        )))
    }
}
