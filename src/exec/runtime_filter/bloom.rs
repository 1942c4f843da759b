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
const SALT: [u32; 8] = [
    0x47b6137b, 0x44974d91, 0x8824ad5b, 0xa2b7289d, 0x705495c7, 0x2df1424b, 0x9efc4947, 0x5c6bfb31,
];

/// Block bloom filter: each key maps to one 8-word bucket and sets one bit
/// per word, so a probe touches a single cache line.
#[derive(Clone, Debug)]
pub(crate) struct BlockBloomFilter {
    log_num_buckets: u32,
    directory_mask: u32,
    directory: Vec<u32>,
}

impl BlockBloomFilter {
    pub(crate) fn with_capacity(num_elements: u64) -> Self {
        let nums = num_elements.max(1);
        let log_heap_space = (nums as f64).log2().ceil() as i32;
        let log_num_buckets = std::cmp::max(1, log_heap_space - 5) as u32;
        let directory_mask = ((1u64 << log_num_buckets.min(63)) - 1) as u32;
        let bucket_count = 1usize << log_num_buckets;
        Self {
            log_num_buckets,
            directory_mask,
            directory: vec![0u32; bucket_count * 8],
        }
    }

    pub(crate) fn insert_hash(&mut self, hash: u64) {
        let bucket_idx = (hash as u32) & self.directory_mask;
        let key = (hash >> self.log_num_buckets) as u32;
        let masks = make_mask(key);
        let base = bucket_idx as usize * 8;
        for (word, mask) in self.directory[base..base + 8].iter_mut().zip(masks) {
            *word |= mask;
        }
    }

    pub(crate) fn test_hash(&self, hash: u64) -> bool {
        let bucket_idx = (hash as u32) & self.directory_mask;
        let key = (hash >> self.log_num_buckets) as u32;
        let masks = make_mask(key);
        let base = bucket_idx as usize * 8;
        self.directory[base..base + 8]
            .iter()
            .zip(masks)
            .all(|(word, mask)| word & mask == mask)
    }
}

fn make_mask(key: u32) -> [u32; 8] {
    let mut masks = [0u32; 8];
    for (mask, salt) in masks.iter_mut().zip(SALT) {
        let bit = key.wrapping_mul(salt) >> 27;
        *mask = 1u32 << bit;
    }
    masks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_false_negatives() {
        let mut filter = BlockBloomFilter::with_capacity(4096);
        for i in 0..4096u64 {
            filter.insert_hash(i.wrapping_mul(0x9e3779b97f4a7c15));
        }
        for i in 0..4096u64 {
            assert!(filter.test_hash(i.wrapping_mul(0x9e3779b97f4a7c15)));
        }
    }

    #[test]
    fn misses_are_mostly_rejected() {
        let mut filter = BlockBloomFilter::with_capacity(1024);
        for i in 0..1024u64 {
            filter.insert_hash(i.wrapping_mul(0x9e3779b97f4a7c15));
        }
        let false_positives = (100_000u64..110_000)
            .filter(|i| filter.test_hash(i.wrapping_mul(0x9e3779b97f4a7c15)))
            .count();
        assert!(false_positives < 1_000, "false_positives={}", false_positives);
    }
}
