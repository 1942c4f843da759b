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
use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::config;
use crate::runtime::mem_tracker::MemTracker;

/// RuntimeState is a per-fragment-instance execution context.
///
/// It carries the query options the operators consult on every scheduler step
/// (chunk size, cancellation, first-error state) plus the memory tracker the
/// fragment's operators hang their accounting off of.
#[derive(Debug)]
pub struct RuntimeState {
    chunk_size: usize,
    cancelled: Arc<AtomicBool>,
    error_state: Arc<RuntimeErrorState>,
    mem_tracker: Option<Arc<MemTracker>>,
}

#[derive(Debug, Default)]
pub struct RuntimeErrorState {
    error: std::sync::Mutex<Option<String>>,
}

impl RuntimeErrorState {
    pub fn set_error(&self, err: String) {
        let mut guard = self.error.lock().expect("runtime error lock");
        if guard.is_none() {
            *guard = Some(err);
        }
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().expect("runtime error lock").clone()
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            chunk_size: config::default_chunk_size(),
            cancelled: Arc::new(AtomicBool::new(false)),
            error_state: Arc::new(RuntimeErrorState::default()),
            mem_tracker: None,
        }
    }
}

impl Clone for RuntimeState {
    fn clone(&self) -> Self {
        Self {
            chunk_size: self.chunk_size,
            cancelled: Arc::clone(&self.cancelled),
            error_state: Arc::clone(&self.error_state),
            mem_tracker: self.mem_tracker.clone(),
        }
    }
}

impl RuntimeState {
    pub fn new(chunk_size: usize, mem_tracker: Option<Arc<MemTracker>>) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            cancelled: Arc::new(AtomicBool::new(false)),
            error_state: Arc::new(RuntimeErrorState::default()),
            mem_tracker,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Request cancellation of every operator driven with this state.
    /// Operators observe it at their next scheduler step; cancellation does
    /// not finalize shared operator state by itself.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn set_error(&self, err: String) {
        self.error_state.set_error(err);
    }

    pub fn error(&self) -> Option<String> {
        self.error_state.error()
    }

    pub fn mem_tracker(&self) -> Option<Arc<MemTracker>> {
        self.mem_tracker.clone()
    }
}
