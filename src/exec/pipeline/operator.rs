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
//! Core operator traits and blocking semantics.
//!
//! Responsibilities:
//! - Defines the source/sink execution contracts the driver polls.
//! - Readiness predicates must stay cheap: the scheduler calls them on every step.
//!
//! The engine uses cooperative scheduling. A driver repeatedly polls
//! `has_output`/`need_input`/`is_finished` and only calls the mutating
//! operations when an operator reports ready; an operator that cannot make
//! progress simply reports not-ready and relies on an
//! [`Observable`](crate::exec::pipeline::schedule::observer::Observable)
//! registered during `prepare` to be woken once its peer makes progress.
//! Operators never block the calling thread.

use crate::exec::ExecError;
use crate::exec::chunk::Chunk;
use crate::runtime::runtime_state::RuntimeState;

/// Base operator contract shared by the source and sink halves.
pub trait Operator: Send {
    fn name(&self) -> &str;

    fn prepare(&mut self, state: &RuntimeState) -> Result<(), ExecError> {
        let _ = state;
        Ok(())
    }

    /// Release the operator's shared resources. Called exactly once by the
    /// driver after the operator is finished or the query is torn down.
    fn close(&mut self, state: &RuntimeState);

    fn cancel(&mut self) {
        // Default: nothing to cancel.
    }
}

/// Operator half that produces chunks by draining shared state.
pub trait SourceOperator: Operator {
    /// True iff a `pull_chunk` call can make progress right now. O(1).
    fn has_output(&self) -> bool;

    /// Terminal signal: once true, the driver makes no further `pull_chunk`
    /// calls. O(1).
    fn is_finished(&self) -> bool;

    /// Produce the next output chunk. May legitimately return an empty chunk;
    /// only `is_finished` signals end-of-stream.
    fn pull_chunk(&mut self, state: &RuntimeState) -> Result<Chunk, ExecError>;

    /// Force-complete the operator, discarding undrained state (limit
    /// satisfied, query aborted).
    fn set_finished(&mut self, state: &RuntimeState) -> Result<(), ExecError>;
}

/// Operator half that consumes chunks and accumulates shared state.
pub trait SinkOperator: Operator {
    /// True iff a `push_chunk` call is acceptable right now. O(1).
    fn need_input(&self) -> bool;

    fn is_finished(&self) -> bool;

    fn push_chunk(&mut self, state: &RuntimeState, chunk: Chunk) -> Result<(), ExecError>;

    /// End of input: finalize accumulated state and wake blocked readers.
    fn set_finishing(&mut self, state: &RuntimeState) -> Result<(), ExecError>;
}
