use super::types::{Batch, SourceImage};
use crate::config::PipelineSettings;

/// 依累計大小與數量上限，將有序的檔案列表切成批次
///
/// 單一檔案超過大小上限時自成一個批次，不會被拒絕。
#[derive(Debug, Clone, Copy)]
pub struct BatchPlanner {
    memory_threshold: u64,
    max_items: usize,
}

impl BatchPlanner {
    #[must_use]
    pub fn new(memory_threshold: u64, max_items: usize) -> Self {
        Self {
            memory_threshold,
            max_items: max_items.max(1),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(
            settings.batch_memory_threshold_bytes,
            settings.max_batch_item_count,
        )
    }

    #[must_use]
    pub fn plan(&self, files: impl IntoIterator<Item = SourceImage>) -> Vec<Batch> {
        let mut batches = Vec::new();
        let mut current = Batch::default();

        for file in files {
            if !current.is_empty() && self.should_close(&current, file.byte_size) {
                batches.push(std::mem::take(&mut current));
            }
            current.push(file);
        }

        if !current.is_empty() {
            batches.push(current);
        }

        batches
    }

    fn should_close(&self, current: &Batch, next_size: u64) -> bool {
        current.total_bytes().saturating_add(next_size) > self.memory_threshold
            || current.len() >= self.max_items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sources(sizes: &[u64]) -> Vec<SourceImage> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| SourceImage::new(format!("/scan/{i:03}.tif"), size))
            .collect()
    }

    fn batch_sizes(batches: &[Batch]) -> Vec<Vec<u64>> {
        batches
            .iter()
            .map(|b| b.items().iter().map(|s| s.byte_size).collect())
            .collect()
    }

    #[test]
    fn test_closes_batch_when_threshold_exceeded() {
        let planner = BatchPlanner::new(500, 20);
        let batches = planner.plan(sources(&[100, 200, 250]));

        assert_eq!(batch_sizes(&batches), vec![vec![100, 200], vec![250]]);
    }

    #[test]
    fn test_exact_threshold_fits() {
        let planner = BatchPlanner::new(500, 20);
        let batches = planner.plan(sources(&[200, 300, 1]));

        assert_eq!(batch_sizes(&batches), vec![vec![200, 300], vec![1]]);
    }

    #[test]
    fn test_oversized_file_forms_singleton() {
        let planner = BatchPlanner::new(500, 20);
        let batches = planner.plan(sources(&[100, 900, 50]));

        assert_eq!(batch_sizes(&batches), vec![vec![100], vec![900], vec![50]]);
    }

    #[test]
    fn test_item_count_cap() {
        let planner = BatchPlanner::new(u64::MAX, 2);
        let batches = planner.plan(sources(&[1, 1, 1, 1, 1]));

        assert_eq!(batch_sizes(&batches), vec![vec![1, 1], vec![1, 1], vec![1]]);
    }

    #[test]
    fn test_empty_input() {
        let planner = BatchPlanner::new(500, 20);
        assert!(planner.plan(Vec::new()).is_empty());
    }

    #[test]
    fn test_zero_max_items_behaves_as_one() {
        let planner = BatchPlanner::new(500, 0);
        let batches = planner.plan(sources(&[1, 1]));
        assert_eq!(batches.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_batches_respect_limits_and_order(
            sizes in prop::collection::vec(0u64..2_000, 0..60),
            threshold in 1u64..3_000,
            max_items in 1usize..8,
        ) {
            let input = sources(&sizes);
            let batches = BatchPlanner::new(threshold, max_items).plan(input.clone());

            for batch in &batches {
                prop_assert!(!batch.is_empty());
                prop_assert!(batch.len() <= max_items);
                if batch.len() > 1 {
                    prop_assert!(batch.total_bytes() <= threshold);
                }
            }

            let flattened: Vec<_> = batches.into_iter().flat_map(Batch::into_items).collect();
            prop_assert_eq!(flattened, input);
        }
    }
}
