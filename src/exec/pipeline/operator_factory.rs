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
use crate::exec::ExecError;
use crate::exec::pipeline::operator::{SinkOperator, SourceOperator};

/// Factories instantiate one operator per driver at pipeline build time.
/// `driver_sequence` identifies the parallel lane; paired source/sink
/// factories use it to hand both halves of a lane the same shared state.
pub trait OperatorFactory: Send + Sync {
    fn name(&self) -> &str;
}

pub trait SourceOperatorFactory: OperatorFactory {
    fn create(&self, degree_of_parallelism: i32, driver_sequence: i32)
    -> Result<Box<dyn SourceOperator>, ExecError>;
}

pub trait SinkOperatorFactory: OperatorFactory {
    fn create(&self, degree_of_parallelism: i32, driver_sequence: i32)
    -> Result<Box<dyn SinkOperator>, ExecError>;
}
