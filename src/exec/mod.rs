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
use std::fmt;

pub mod chunk;
pub mod expr;
pub mod hash_table;
pub mod operators;
pub mod pipeline;
pub mod runtime_filter;

/// Error surfaced by the operator contract to the scheduler.
///
/// There is no local recovery anywhere in the execution layer: the first error
/// aborts the whole pipeline and no partial results are emitted. Inner layers
/// (expressions, kernels, key table) report plain string statuses; the operator
/// surface classifies them here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecError {
    /// The query was aborted externally; no state was mutated for this step.
    Cancelled,
    /// Expression evaluation or an aggregate function failed (e.g. overflow
    /// in a non-saturating accumulator).
    Compute(String),
    /// Hash table or accumulator memory could not be grown. Fatal for this
    /// blocking variant: there is no spill path.
    ResourceExhausted(String),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::Cancelled => write!(f, "query cancelled"),
            ExecError::Compute(msg) => write!(f, "compute error: {}", msg),
            ExecError::ResourceExhausted(msg) => write!(f, "resource exhausted: {}", msg),
        }
    }
}

impl std::error::Error for ExecError {}

impl From<String> for ExecError {
    fn from(msg: String) -> Self {
        ExecError::Compute(msg)
    }
}
