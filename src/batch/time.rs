//! Estimated-time-capped batching.

use std::sync::Arc;
use std::time::Duration;

use super::{Batch, BatchStrategy};

/// Accumulates items until their estimated processing time would exceed a
/// per-batch time cap.
///
/// The per-item estimate comes from a closure; a single item estimated over
/// the cap still forms a singleton batch.
pub struct CostBatcher<T> {
    time_cap: Duration,
    cost_fn: Arc<dyn Fn(&T) -> Duration + Send + Sync>,
}

impl<T> CostBatcher<T> {
    pub fn new(time_cap: Duration, cost_fn: impl Fn(&T) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            time_cap,
            cost_fn: Arc::new(cost_fn),
        }
    }
}

impl<T: Send + 'static> BatchStrategy<T> for CostBatcher<T> {
    fn strategy_key(&self) -> &'static str {
        "cost"
    }

    fn produce_batches(&self, items: Vec<T>) -> Box<dyn Iterator<Item = Batch<T>> + Send> {
        let cap = self.time_cap;
        let cost_fn = Arc::clone(&self.cost_fn);
        let mut pending = items.into_iter().peekable();

        Box::new(std::iter::from_fn(move || {
            let mut batch: Vec<T> = Vec::new();
            let mut total = Duration::ZERO;
            while let Some(next) = pending.peek() {
                let cost = cost_fn(next);
                if !batch.is_empty() && total.saturating_add(cost) > cap {
                    break;
                }
                total = total.saturating_add(cost);
                batch.push(pending.next()?);
                if total >= cap {
                    break;
                }
            }
            if batch.is_empty() {
                None
            } else {
                Some(Batch::new(batch, "cost", total.as_secs_f64()))
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::assert_partition;
    use super::*;

    #[test]
    fn test_splits_on_time_cap() {
        let strategy = CostBatcher::new(Duration::from_secs(10), |n: &u64| Duration::from_secs(*n));
        let input = vec![4, 4, 4];
        let batches: Vec<_> = strategy.produce_batches(input.clone()).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].items, vec![4, 4]);
        assert_partition(&input, &batches);
    }

    #[test]
    fn test_expensive_item_is_singleton() {
        let strategy = CostBatcher::new(Duration::from_secs(5), |n: &u64| Duration::from_secs(*n));
        let batches: Vec<_> = strategy.produce_batches(vec![30, 1]).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].items, vec![30]);
        assert_eq!(batches[0].cost, 30.0);
    }
}
