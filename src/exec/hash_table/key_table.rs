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
//! Group-key hash table mapping key tuples to dense group ids.
//!
//! Responsibilities:
//! - Looks up or inserts one group per distinct key tuple, assigning ids in insertion order.
//! - Stores key values columnarly so draining can materialize them without rescanning input.
//!
//! Key exported interfaces:
//! - Types: `KeyTable`, `KeyLookup`.

use arrow::array::ArrayRef;
use arrow::datatypes::DataType;
use arrow::row::{RowConverter, Rows, SortField};
use hashbrown::hash_map::DefaultHashBuilder;
use hashbrown::raw::RawTable;

use crate::exec::hash_table::hash::{build_group_key_hashes, seed_from_hasher};
use crate::exec::hash_table::key_column::KeyColumn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GroupKeyStrategy {
    /// Single integer-like key compared directly against the key column.
    OneNumber,
    /// Any key tuple, compared through its row-encoded bytes.
    Serialized,
}

fn pick_group_key_strategy(key_types: &[DataType]) -> GroupKeyStrategy {
    match key_types {
        [t] if matches!(
            t,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 | DataType::Date32
        ) =>
        {
            GroupKeyStrategy::OneNumber
        }
        _ => GroupKeyStrategy::Serialized,
    }
}

#[derive(Clone, Copy, Debug)]
struct KeyEntry {
    group_id: usize,
    hash: u64,
}

pub(crate) struct KeyLookup {
    pub(crate) group_id: usize,
    pub(crate) is_new: bool,
}

pub(crate) struct KeyTable {
    key_strategy: GroupKeyStrategy,
    key_columns: Vec<KeyColumn>,
    table: RawTable<KeyEntry>,
    serialized_keys: Vec<Vec<u8>>,
    row_converter: Option<RowConverter>,
    hash_seed: u64,
}

impl KeyTable {
    pub(crate) fn new(key_types: Vec<DataType>) -> Result<Self, String> {
        if key_types.is_empty() {
            return Err("key table requires at least one group key".to_string());
        }
        let key_strategy = pick_group_key_strategy(&key_types);
        let mut key_columns = Vec::with_capacity(key_types.len());
        for data_type in &key_types {
            key_columns.push(KeyColumn::from_type(data_type)?);
        }
        let row_converter = if key_strategy == GroupKeyStrategy::Serialized {
            let fields = key_types
                .iter()
                .cloned()
                .map(SortField::new)
                .collect::<Vec<_>>();
            Some(RowConverter::new(fields).map_err(|e| e.to_string())?)
        } else {
            None
        };
        Ok(Self {
            key_strategy,
            key_columns,
            table: RawTable::new(),
            serialized_keys: Vec::new(),
            row_converter,
            hash_seed: seed_from_hasher(&DefaultHashBuilder::default()),
        })
    }

    #[allow(dead_code)]
    pub(crate) fn key_strategy(&self) -> GroupKeyStrategy {
        self.key_strategy
    }

    pub(crate) fn key_columns(&self) -> &[KeyColumn] {
        &self.key_columns
    }

    pub(crate) fn group_count(&self) -> usize {
        self.key_columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub(crate) fn build_hashes(
        &self,
        arrays: &[ArrayRef],
        num_rows: usize,
    ) -> Result<Vec<u64>, String> {
        build_group_key_hashes(arrays, num_rows, self.hash_seed)
    }

    /// Row-encode the key columns for the serialized strategy; `None` for the
    /// one-number fast path, which compares against the key column directly.
    pub(crate) fn build_rows(&self, arrays: &[ArrayRef]) -> Result<Option<Rows>, String> {
        let Some(converter) = self.row_converter.as_ref() else {
            return Ok(None);
        };
        converter
            .convert_columns(arrays)
            .map(Some)
            .map_err(|e| e.to_string())
    }

    /// Look up the group of `row`, inserting a new dense group id on miss.
    /// `row_bytes` must be provided for the serialized strategy.
    pub(crate) fn find_or_insert(
        &mut self,
        arrays: &[ArrayRef],
        row: usize,
        row_bytes: Option<&[u8]>,
        hash: u64,
    ) -> Result<KeyLookup, String> {
        match self.key_strategy {
            GroupKeyStrategy::OneNumber => self.find_or_insert_one_number(arrays, row, hash),
            GroupKeyStrategy::Serialized => {
                let row_bytes = row_bytes
                    .ok_or_else(|| "serialized group key bytes missing".to_string())?;
                self.find_or_insert_serialized(arrays, row, row_bytes, hash)
            }
        }
    }

    fn find_or_insert_one_number(
        &mut self,
        arrays: &[ArrayRef],
        row: usize,
        hash: u64,
    ) -> Result<KeyLookup, String> {
        let array = arrays
            .first()
            .ok_or_else(|| "one number key array missing".to_string())?;
        let mut error = None;
        let result = {
            let key_columns = &self.key_columns;
            let table = &mut self.table;
            table.find_or_find_insert_slot(
                hash,
                |entry| match key_columns.first() {
                    Some(col) => match col.value_equals(entry.group_id, array, row) {
                        Ok(equal) => equal,
                        Err(err) => {
                            error = Some(err);
                            false
                        }
                    },
                    None => {
                        error = Some("one number key column missing".to_string());
                        false
                    }
                },
                |entry| entry.hash,
            )
        };
        if let Some(err) = error {
            return Err(err);
        }

        match result {
            Ok(bucket) => Ok(KeyLookup {
                group_id: unsafe { bucket.as_ref().group_id },
                is_new: false,
            }),
            Err(slot) => {
                let col = self
                    .key_columns
                    .get_mut(0)
                    .ok_or_else(|| "one number key column missing".to_string())?;
                let group_id = col.len();
                col.push_value_from_array(array, row)?;
                let entry = KeyEntry { group_id, hash };
                unsafe {
                    self.table.insert_in_slot(hash, slot, entry);
                }
                Ok(KeyLookup {
                    group_id,
                    is_new: true,
                })
            }
        }
    }

    fn find_or_insert_serialized(
        &mut self,
        arrays: &[ArrayRef],
        row: usize,
        row_bytes: &[u8],
        hash: u64,
    ) -> Result<KeyLookup, String> {
        let mut error = None;
        let result = {
            let keys = &self.serialized_keys;
            let table = &mut self.table;
            table.find_or_find_insert_slot(
                hash,
                |entry| match keys.get(entry.group_id) {
                    Some(stored) => stored.as_slice() == row_bytes,
                    None => {
                        error = Some("group key index out of bounds".to_string());
                        false
                    }
                },
                |entry| entry.hash,
            )
        };
        if let Some(err) = error {
            return Err(err);
        }

        match result {
            Ok(bucket) => Ok(KeyLookup {
                group_id: unsafe { bucket.as_ref().group_id },
                is_new: false,
            }),
            Err(slot) => {
                if arrays.len() != self.key_columns.len() {
                    return Err("group key length mismatch".to_string());
                }
                for (col, array) in self.key_columns.iter_mut().zip(arrays.iter()) {
                    col.push_value_from_array(array, row)?;
                }
                let group_id = self.serialized_keys.len();
                self.serialized_keys.push(row_bytes.to_vec());
                let entry = KeyEntry { group_id, hash };
                unsafe {
                    self.table.insert_in_slot(hash, slot, entry);
                }
                Ok(KeyLookup {
                    group_id,
                    is_new: true,
                })
            }
        }
    }

    pub(crate) fn estimated_bytes(&self) -> usize {
        let columns: usize = self.key_columns.iter().map(|c| c.estimated_bytes()).sum();
        let keys: usize = self
            .serialized_keys
            .iter()
            .map(|k| k.len() + std::mem::size_of::<Vec<u8>>())
            .sum();
        let buckets = self.table.capacity() * std::mem::size_of::<KeyEntry>();
        columns + keys + buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use std::sync::Arc;

    #[test]
    fn one_number_keys_get_dense_ids_in_insertion_order() {
        let mut table = KeyTable::new(vec![DataType::Int64]).expect("table");
        assert_eq!(table.key_strategy(), GroupKeyStrategy::OneNumber);
        let arrays: Vec<ArrayRef> =
            vec![Arc::new(Int64Array::from(vec![Some(5), None, Some(5), Some(7)]))];
        let hashes = table.build_hashes(&arrays, 4).expect("hashes");
        let mut ids = Vec::new();
        for row in 0..4 {
            let lookup = table
                .find_or_insert(&arrays, row, None, hashes[row])
                .expect("lookup");
            ids.push((lookup.group_id, lookup.is_new));
        }
        assert_eq!(ids, vec![(0, true), (1, true), (0, false), (2, true)]);
        assert_eq!(table.group_count(), 3);
    }

    #[test]
    fn serialized_keys_group_multi_column_tuples() {
        let mut table = KeyTable::new(vec![DataType::Int64, DataType::Utf8]).expect("table");
        assert_eq!(table.key_strategy(), GroupKeyStrategy::Serialized);
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(vec![1, 1, 2])),
            Arc::new(StringArray::from(vec![Some("a"), Some("a"), None])),
        ];
        let hashes = table.build_hashes(&arrays, 3).expect("hashes");
        let rows = table.build_rows(&arrays).expect("rows").expect("serialized");
        let mut ids = Vec::new();
        for row in 0..3 {
            let lookup = table
                .find_or_insert(&arrays, row, Some(rows.row(row).data()), hashes[row])
                .expect("lookup");
            ids.push(lookup.group_id);
        }
        assert_eq!(ids, vec![0, 0, 1]);
        assert_eq!(table.group_count(), 2);
    }
}
