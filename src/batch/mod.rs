//! Batching strategies for raw migration items.
//!
//! A strategy consumes a finite sequence of raw items and produces a lazy,
//! finite, non-restartable sequence of [`Batch`]es. Every input item appears
//! in exactly one batch, no batch is empty while input remains, and a
//! strategy always makes progress: a single item exceeding a cap still forms
//! its own singleton batch.
//!
//! Five strategies are provided, selected by the caller per workload:
//!
//! - [`SizeBatcher`]: accumulate until a size/memory cap would be exceeded
//! - [`CostBatcher`]: accumulate until an estimated time cap would be
//!   exceeded
//! - [`AdaptiveBatcher`]: resize batches from measured durations,
//!   multiplicative increase under the latency target and multiplicative
//!   decrease over it
//! - [`CategoryBatcher`]: co-locate items sharing a discriminating key
//! - [`SimilarityBatcher`]: greedily cluster items with nearby feature
//!   vectors

mod adaptive;
mod category;
mod similarity;
mod size;
mod time;

pub use adaptive::{AdaptiveBatcher, AdaptiveController};
pub use category::CategoryBatcher;
pub use similarity::SimilarityBatcher;
pub use size::SizeBatcher;
pub use time::CostBatcher;

use uuid::Uuid;

/// An ordered group of raw items assigned together.
///
/// Created by a strategy and consumed once by the submitter that turns it
/// into work items; not retained after submission.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    /// Unique id, usable as (part of) a work item id.
    pub id: String,
    /// Items in submission order.
    pub items: Vec<T>,
    /// Which strategy produced the batch and why (e.g. "size",
    /// "category:warehouse-7").
    pub strategy_key: String,
    /// Estimated cost of the batch, in strategy-defined units.
    pub cost: f64,
}

impl<T> Batch<T> {
    /// Creates a batch.
    pub fn new(items: Vec<T>, strategy_key: impl Into<String>, cost: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            items,
            strategy_key: strategy_key.into(),
            cost,
        }
    }

    /// Number of items in the batch.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns whether the batch is empty. Strategies never emit empty
    /// batches; this exists for completeness.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Groups raw items into batches.
pub trait BatchStrategy<T: Send + 'static>: Send + Sync {
    /// Short name identifying the strategy in batch keys and logs.
    fn strategy_key(&self) -> &'static str;

    /// Consumes the input items and returns a lazy sequence of batches.
    fn produce_batches(&self, items: Vec<T>) -> Box<dyn Iterator<Item = Batch<T>> + Send>;
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Asserts the common strategy contract: every input appears exactly
    /// once across the produced batches and no batch is empty.
    pub fn assert_partition(input: &[u64], batches: &[super::Batch<u64>]) {
        let mut seen: Vec<u64> = batches.iter().flat_map(|b| b.items.iter().copied()).collect();
        seen.sort_unstable();
        let mut expected = input.to_vec();
        expected.sort_unstable();
        assert_eq!(seen, expected, "every item must appear in exactly one batch");
        assert!(batches.iter().all(|b| !b.is_empty()), "no empty batches");
    }
}
