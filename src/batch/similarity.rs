//! Feature-vector clustering batching.

use std::sync::Arc;

use super::{Batch, BatchStrategy};

/// Greedily clusters items whose feature vectors lie close together.
///
/// The first unassigned item seeds a cluster; remaining items within
/// `max_distance` (Euclidean) of the seed join it, in input order, up to
/// `max_size` items per batch. Clustering is approximate by design; it is a
/// locality heuristic for items that benefit from shared setup, not a full
/// clustering pass. Vectors of mismatched dimension never cluster together.
pub struct SimilarityBatcher<T> {
    max_distance: f64,
    max_size: usize,
    features_fn: Arc<dyn Fn(&T) -> Vec<f64> + Send + Sync>,
}

impl<T> SimilarityBatcher<T> {
    pub fn new(
        max_distance: f64,
        max_size: usize,
        features_fn: impl Fn(&T) -> Vec<f64> + Send + Sync + 'static,
    ) -> Self {
        Self {
            max_distance,
            max_size: max_size.max(1),
            features_fn: Arc::new(features_fn),
        }
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    Some(
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f64>()
            .sqrt(),
    )
}

impl<T: Send + 'static> BatchStrategy<T> for SimilarityBatcher<T> {
    fn strategy_key(&self) -> &'static str {
        "similarity"
    }

    fn produce_batches(&self, items: Vec<T>) -> Box<dyn Iterator<Item = Batch<T>> + Send> {
        let max_distance = self.max_distance;
        let max_size = self.max_size;
        let features_fn = Arc::clone(&self.features_fn);
        let mut remaining: Vec<(Vec<f64>, T)> = items
            .into_iter()
            .map(|item| (features_fn(&item), item))
            .collect();

        Box::new(std::iter::from_fn(move || {
            if remaining.is_empty() {
                return None;
            }
            let (seed_features, seed) = remaining.remove(0);
            let mut cluster = vec![seed];
            let mut index = 0;
            while cluster.len() < max_size && index < remaining.len() {
                let close = euclidean(&seed_features, &remaining[index].0)
                    .is_some_and(|d| d <= max_distance);
                if close {
                    cluster.push(remaining.remove(index).1);
                } else {
                    index += 1;
                }
            }
            let cost = cluster.len() as f64;
            Some(Batch::new(cluster, "similarity", cost))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::assert_partition;
    use super::*;

    #[test]
    fn test_clusters_nearby_vectors() {
        let strategy = SimilarityBatcher::new(1.0, 10, |n: &u64| vec![*n as f64]);
        let input = vec![1, 2, 10, 11, 50];
        let batches: Vec<_> = strategy.produce_batches(input.clone()).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].items, vec![1, 2]);
        assert_eq!(batches[1].items, vec![10, 11]);
        assert_eq!(batches[2].items, vec![50]);
        assert_partition(&input, &batches);
    }

    #[test]
    fn test_respects_max_size() {
        let strategy = SimilarityBatcher::new(100.0, 2, |n: &u64| vec![*n as f64]);
        let input = vec![1, 2, 3, 4, 5];
        let batches: Vec<_> = strategy.produce_batches(input.clone()).collect();
        assert!(batches.iter().all(|b| b.len() <= 2));
        assert_partition(&input, &batches);
    }

    #[test]
    fn test_mismatched_dimensions_never_cluster() {
        let strategy = SimilarityBatcher::new(100.0, 10, |n: &u64| {
            if *n < 10 { vec![*n as f64] } else { vec![*n as f64, 0.0] }
        });
        let batches: Vec<_> = strategy.produce_batches(vec![1, 2, 20, 21]).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].items, vec![1, 2]);
        assert_eq!(batches[1].items, vec![20, 21]);
    }

    #[test]
    fn test_euclidean_distance() {
        assert_eq!(euclidean(&[0.0, 0.0], &[3.0, 4.0]), Some(5.0));
        assert_eq!(euclidean(&[0.0], &[1.0, 2.0]), None);
    }
}
