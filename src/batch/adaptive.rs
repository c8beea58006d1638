//! Feedback-driven batch sizing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use super::{Batch, BatchStrategy};

/// Growth factor applied when batches finish comfortably under target.
const GROW_FACTOR: f64 = 1.5;
/// Shrink factor applied when batches overrun the target.
const SHRINK_FACTOR: f64 = 0.5;
/// Fraction of the target latency under which a batch counts as
/// "comfortably fast".
const HEADROOM_FRACTION: f64 = 0.8;

/// Shared controller that adjusts the current batch size from measured
/// batch durations.
///
/// Callers report each finished batch's real duration via
/// [`record_duration`](Self::record_duration); the next batch pulled from an
/// [`AdaptiveBatcher`] holding this controller uses the adjusted size.
/// Growth is multiplicative and capped, shrink is multiplicative and
/// floored, so one slow batch halves throughput pressure immediately while
/// recovery is gradual.
pub struct AdaptiveController {
    target_latency: Duration,
    min_size: usize,
    max_size: usize,
    // Fractional so repeated shrink/grow cycles do not quantize to the floor.
    current: Mutex<f64>,
}

impl AdaptiveController {
    pub fn new(seed_size: usize, target_latency: Duration, min_size: usize, max_size: usize) -> Self {
        let seed = seed_size.clamp(min_size.max(1), max_size.max(1));
        Self {
            target_latency,
            min_size: min_size.max(1),
            max_size: max_size.max(1),
            current: Mutex::new(seed as f64),
        }
    }

    /// Batch size the next batch should use.
    pub fn current_size(&self) -> usize {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        (*current).round().clamp(self.min_size as f64, self.max_size as f64) as usize
    }

    /// Feeds back the measured duration of a finished batch.
    pub fn record_duration(&self, elapsed: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let before = *current;
        if elapsed > self.target_latency {
            *current = (*current * SHRINK_FACTOR).max(self.min_size as f64);
        } else if elapsed.as_secs_f64() < self.target_latency.as_secs_f64() * HEADROOM_FRACTION {
            *current = (*current * GROW_FACTOR).min(self.max_size as f64);
        }
        if (*current - before).abs() > f64::EPSILON {
            debug!(
                elapsed_ms = elapsed.as_millis() as u64,
                from = before.round() as u64,
                to = current.round() as u64,
                "adjusted adaptive batch size"
            );
        }
    }
}

/// Chunks items into batches whose size follows an [`AdaptiveController`].
///
/// The size is read when each batch is pulled, so feedback recorded between
/// pulls takes effect on the very next batch.
pub struct AdaptiveBatcher {
    controller: Arc<AdaptiveController>,
}

impl AdaptiveBatcher {
    pub fn new(controller: Arc<AdaptiveController>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<AdaptiveController> {
        &self.controller
    }
}

impl<T: Send + 'static> BatchStrategy<T> for AdaptiveBatcher {
    fn strategy_key(&self) -> &'static str {
        "adaptive"
    }

    fn produce_batches(&self, items: Vec<T>) -> Box<dyn Iterator<Item = Batch<T>> + Send> {
        let controller = Arc::clone(&self.controller);
        let mut pending = items.into_iter();

        Box::new(std::iter::from_fn(move || {
            let size = controller.current_size();
            let batch: Vec<T> = pending.by_ref().take(size).collect();
            if batch.is_empty() {
                None
            } else {
                let cost = batch.len() as f64;
                Some(Batch::new(batch, "adaptive", cost))
            }
        }))
    }
}
