use crate::engine::error::EngineError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// The contiguous slice `[start, end)` of a work collection assigned to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub worker_index: usize,
    pub start: usize,
    pub end: usize,
}

impl Partition {
    /// Computes the partition of a collection of `len` items owned by `worker_index`.
    ///
    /// Chunks are `ceil(len / worker_count)` items long; trailing workers may receive
    /// a shorter or an empty chunk. An empty chunk is a valid outcome.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if `worker_count` is zero or
    /// `worker_index` is not below `worker_count`.
    pub fn for_worker(
        len: usize,
        worker_count: usize,
        worker_index: usize,
    ) -> Result<Self, EngineError> {
        if worker_count == 0 {
            return Err(EngineError::Configuration(
                "the number of workers must be at least 1".to_string(),
            ));
        }
        if worker_index >= worker_count {
            return Err(EngineError::Configuration(format!(
                "worker index {} is out of range for {} worker(s)",
                worker_index, worker_count
            )));
        }

        let chunk_size = len.div_ceil(worker_count);
        let start = worker_index.saturating_mul(chunk_size).min(len);
        let end = start.saturating_add(chunk_size).min(len);

        Ok(Self {
            worker_index,
            start,
            end,
        })
    }

    /// Every worker's partition, ordered by worker index.
    pub fn all(len: usize, worker_count: usize) -> Result<Vec<Self>, EngineError> {
        (0..worker_count)
            .map(|index| Self::for_worker(len, worker_count, index))
            .collect()
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Returns the sub-slice of `items` owned by `worker_index`.
pub fn partition<T>(items: &[T], worker_count: usize, worker_index: usize) -> Result<&[T], EngineError> {
    let partition = Partition::for_worker(items.len(), worker_count, worker_index)?;
    Ok(&items[partition.range()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_items_over_three_workers_split_four_four_two() {
        let items: Vec<usize> = (0..10).collect();
        assert_eq!(partition(&items, 3, 0).unwrap(), &[0, 1, 2, 3]);
        assert_eq!(partition(&items, 3, 1).unwrap(), &[4, 5, 6, 7]);
        assert_eq!(partition(&items, 3, 2).unwrap(), &[8, 9]);
    }

    #[test]
    fn union_of_partitions_covers_collection_without_overlap() {
        for len in 0..40 {
            for worker_count in 1..12 {
                let partitions = Partition::all(len, worker_count).unwrap();
                let mut next = 0;
                for partition in &partitions {
                    assert!(partition.start <= partition.end);
                    if !partition.is_empty() {
                        assert_eq!(partition.start, next, "gap or overlap at len={len} workers={worker_count}");
                        next = partition.end;
                    }
                }
                assert_eq!(next, len, "len={len} workers={worker_count}");

                let covered: usize = partitions.iter().map(Partition::len).sum();
                assert_eq!(covered, len);
            }
        }
    }

    #[test]
    fn lower_worker_index_precedes_higher_index() {
        let partitions = Partition::all(17, 5).unwrap();
        for pair in partitions.windows(2) {
            assert!(pair[0].end <= pair[1].start || pair[1].is_empty());
        }
    }

    #[test]
    fn worker_beyond_data_receives_empty_slice() {
        let items = vec!['a', 'b'];
        let slice = partition(&items, 5, 4).unwrap();
        assert!(slice.is_empty());
        let partition = Partition::for_worker(2, 5, 4).unwrap();
        assert!(partition.is_empty());
        assert!(partition.start <= 2);
    }

    #[test]
    fn partitioning_is_deterministic() {
        let first = Partition::for_worker(123, 7, 3).unwrap();
        let second = Partition::for_worker(123, 7, 3).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn invalid_worker_configuration_is_rejected() {
        assert!(matches!(
            Partition::for_worker(10, 0, 0),
            Err(EngineError::Configuration(_))
        ));
        assert!(matches!(
            Partition::for_worker(10, 3, 3),
            Err(EngineError::Configuration(_))
        ));
    }
}
