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
//! Runtime-filter application for probe-side pruning.
//!
//! Responsibilities:
//! - Wraps a block bloom filter with the slot binding and null policy of one runtime filter.
//! - Builds row-selection masks and filters chunks in place.
//!
//! Key exported interfaces:
//! - Types: `RuntimeBloomFilter`.
//! - Functions: `eval_bloom_filters`.

mod bloom;

use arrow::array::{Array, ArrayRef, BooleanArray};

use crate::common::ids::SlotId;
use crate::exec::chunk::Chunk;
use crate::exec::hash_table::hash::hash_array_value;

use bloom::BlockBloomFilter;

/// A runtime bloom filter bound to the probe column it prunes.
#[derive(Clone, Debug)]
pub struct RuntimeBloomFilter {
    filter_id: i32,
    slot_id: SlotId,
    has_null: bool,
    hash_seed: u64,
    filter: BlockBloomFilter,
}

impl RuntimeBloomFilter {
    pub fn new(filter_id: i32, slot_id: SlotId, expected_elements: u64, hash_seed: u64) -> Self {
        Self {
            filter_id,
            slot_id,
            has_null: false,
            hash_seed,
            filter: BlockBloomFilter::with_capacity(expected_elements),
        }
    }

    pub fn filter_id(&self) -> i32 {
        self.filter_id
    }

    pub fn slot_id(&self) -> SlotId {
        self.slot_id
    }

    pub fn hash_seed(&self) -> u64 {
        self.hash_seed
    }

    pub fn has_null(&self) -> bool {
        self.has_null
    }

    /// Insert every value of `array` into the filter; nulls set the null flag
    /// instead of being hashed.
    pub fn insert_array(&mut self, array: &ArrayRef) -> Result<(), String> {
        for row in 0..array.len() {
            if array.is_null(row) {
                self.has_null = true;
                continue;
            }
            let hash = hash_array_value(array, row, self.hash_seed)?;
            self.filter.insert_hash(hash);
        }
        Ok(())
    }

    pub fn contains_hash(&self, hash: u64) -> bool {
        self.filter.test_hash(hash)
    }
}

/// Apply runtime bloom filters to `chunk`, removing non-matching rows in
/// place. A filter whose slot is absent from the chunk is skipped.
pub fn eval_bloom_filters(
    filters: &[RuntimeBloomFilter],
    chunk: &mut Chunk,
) -> Result<(), String> {
    for filter in filters {
        if chunk.is_empty() {
            return Ok(());
        }
        if !chunk.slot_id_to_index().contains_key(&filter.slot_id()) {
            continue;
        }
        let array = chunk.column_by_slot_id(filter.slot_id())?;
        let len = chunk.len();
        let mut keep = vec![false; len];
        for (row, keep_row) in keep.iter_mut().enumerate() {
            if array.is_null(row) {
                *keep_row = filter.has_null();
                continue;
            }
            let hash = hash_array_value(&array, row, filter.hash_seed())?;
            *keep_row = filter.contains_hash(hash);
        }
        if keep.iter().all(|v| *v) {
            continue;
        }
        let mask = BooleanArray::from(keep);
        chunk.filter_by_mask(&mask)?;
    }
    Ok(())
}
