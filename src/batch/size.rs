//! Size-capped batching.

use std::sync::Arc;

use super::{Batch, BatchStrategy};

/// Accumulates items until adding the next one would exceed a size cap.
///
/// The size of an item (bytes, rows, whatever unit the caller measures in)
/// is supplied by a closure. An item larger than the cap on its own is
/// emitted as a singleton batch so the sequence always progresses.
pub struct SizeBatcher<T> {
    cap: u64,
    size_fn: Arc<dyn Fn(&T) -> u64 + Send + Sync>,
}

impl<T> SizeBatcher<T> {
    pub fn new(cap: u64, size_fn: impl Fn(&T) -> u64 + Send + Sync + 'static) -> Self {
        Self {
            cap,
            size_fn: Arc::new(size_fn),
        }
    }
}

impl<T: Send + 'static> BatchStrategy<T> for SizeBatcher<T> {
    fn strategy_key(&self) -> &'static str {
        "size"
    }

    fn produce_batches(&self, items: Vec<T>) -> Box<dyn Iterator<Item = Batch<T>> + Send> {
        let cap = self.cap;
        let size_fn = Arc::clone(&self.size_fn);
        let mut pending = items.into_iter().peekable();

        Box::new(std::iter::from_fn(move || {
            let mut batch: Vec<T> = Vec::new();
            let mut total: u64 = 0;
            while let Some(next) = pending.peek() {
                let size = size_fn(next);
                if !batch.is_empty() && total.saturating_add(size) > cap {
                    break;
                }
                total = total.saturating_add(size);
                batch.push(pending.next()?);
                if total >= cap {
                    break;
                }
            }
            if batch.is_empty() {
                None
            } else {
                Some(Batch::new(batch, "size", total as f64))
            }
        }))
    }
}
