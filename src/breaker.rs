//! Per-resource circuit breaking.
//!
//! Each downstream resource (typically a destination host) gets its own
//! [`CircuitBreaker`] with the usual Closed → Open → HalfOpen lifecycle:
//! failures within a rolling window trip the breaker, open breakers fail
//! fast without invoking the wrapped operation, and after a cool-down a
//! single trial call decides whether to close again.
//!
//! Breakers live in an explicitly owned [`BreakerRegistry`] rather than
//! ambient global state: created lazily on first use, evicted after an idle
//! period, cleared on shutdown. Each breaker is independently synchronized
//! so contention on one resource never blocks another.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{BreakerError, TaskError};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow through; failures are counted.
    Closed,
    /// Calls fail fast until the cool-down elapses.
    Open,
    /// One trial call is permitted; its outcome decides the next state.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Tuning knobs for circuit breakers.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Failures within the window that trip the breaker.
    pub failure_threshold: u32,
    /// Rolling window over which failures are counted.
    pub window: Duration,
    /// How long an open breaker rejects calls before permitting a trial.
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Synchronized breaker internals.
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    window_start: Instant,
    opened_at: Option<Instant>,
    /// A half-open trial call is currently executing.
    trial_in_flight: bool,
    last_used: Instant,
}

/// Failure isolator for a single downstream resource.
pub struct CircuitBreaker {
    resource: String,
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker for a resource.
    pub fn new(resource: impl Into<String>, settings: BreakerSettings) -> Self {
        let now = Instant::now();
        Self {
            resource: resource.into(),
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                window_start: now,
                opened_at: None,
                trial_in_flight: false,
                last_used: now,
            }),
        }
    }

    /// Returns the resource key this breaker guards.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Returns the current state, promoting Open to HalfOpen if the
    /// cool-down has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap();
        self.refresh(&mut inner);
        inner.state
    }

    /// Acquires permission to make a call.
    ///
    /// Open breakers reject immediately; a half-open breaker admits exactly
    /// one trial call at a time. The permit must be completed with the
    /// call's outcome; dropping it unfinished releases the trial slot.
    fn try_acquire(&self) -> Result<CallPermit<'_>, BreakerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.last_used = Instant::now();
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(CallPermit {
                breaker: self,
                trial: false,
                finished: false,
            }),
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                debug!(resource = %self.resource, "Circuit half-open, admitting trial call");
                Ok(CallPermit {
                    breaker: self,
                    trial: true,
                    finished: false,
                })
            }
            _ => {
                let retry_after = inner
                    .opened_at
                    .map(|at| self.settings.cooldown.saturating_sub(at.elapsed()))
                    .unwrap_or(self.settings.cooldown);
                Err(BreakerError::Open {
                    resource: self.resource.clone(),
                    retry_after_ms: retry_after.as_millis() as u64,
                })
            }
        }
    }

    /// Releases an abandoned half-open trial slot so a later call can try
    /// again. Called when a trial permit is dropped without an outcome,
    /// which happens when the wrapping future is dropped mid-flight
    /// (dispatch timeout, cancellation).
    fn release_trial(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
            inner.trial_in_flight = false;
            debug!(resource = %self.resource, "Trial call abandoned, releasing trial slot");
        }
    }

    /// Records the outcome of a permitted call.
    fn record(&self, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_used = Instant::now();

        match (inner.state, success) {
            (CircuitState::HalfOpen, true) => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.window_start = Instant::now();
                inner.opened_at = None;
                inner.trial_in_flight = false;
                info!(resource = %self.resource, "Circuit closed after successful trial");
            }
            (CircuitState::HalfOpen, false) => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
                warn!(resource = %self.resource, "Trial call failed, circuit re-opened");
            }
            (CircuitState::Closed, false) => {
                if inner.window_start.elapsed() > self.settings.window {
                    inner.failure_count = 0;
                    inner.window_start = Instant::now();
                }
                inner.failure_count += 1;
                if inner.failure_count >= self.settings.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        resource = %self.resource,
                        failures = inner.failure_count,
                        "Failure threshold exceeded, circuit opened"
                    );
                }
            }
            _ => {}
        }
    }

    /// Promotes Open to HalfOpen once the cool-down has elapsed.
    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
            if elapsed >= self.settings.cooldown {
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = false;
                debug!(resource = %self.resource, "Cool-down elapsed, circuit half-open");
            }
        }
    }

    /// Runs an operation through the breaker.
    ///
    /// Fails fast with [`BreakerError::Open`] while the circuit is open;
    /// otherwise the operation's classified outcome is recorded and
    /// returned.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        let permit = self.try_acquire()?;
        match op().await {
            Ok(value) => {
                permit.finish(true);
                Ok(value)
            }
            Err(err) => {
                permit.finish(false);
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn idle_for(&self) -> Duration {
        self.inner.lock().unwrap().last_used.elapsed()
    }
}

/// Permission for one call through a breaker.
///
/// Finishing the permit records the outcome; dropping it without finishing
/// hands a half-open trial slot back, so a trial whose future never
/// completes cannot wedge the breaker open forever.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    finished: bool,
}

impl CallPermit<'_> {
    fn finish(mut self, success: bool) {
        self.finished = true;
        self.breaker.record(success);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.finished {
            self.breaker.release_trial();
        }
    }
}

/// Process-wide registry of circuit breakers, keyed by resource.
///
/// Breakers are created lazily on first use and share the registry's
/// settings. The registry owns its map explicitly; there is no global
/// state.
pub struct BreakerRegistry {
    settings: BreakerSettings,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Creates a registry with the given breaker settings.
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the breaker for a resource, creating it if needed.
    pub fn get_or_create(&self, resource: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        Arc::clone(breakers.entry(resource.to_string()).or_insert_with(|| {
            debug!(resource, "Creating circuit breaker");
            Arc::new(CircuitBreaker::new(resource, self.settings.clone()))
        }))
    }

    /// Runs an operation through the breaker for `resource`.
    pub async fn call_through<F, Fut, T>(&self, resource: &str, op: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        let breaker = self.get_or_create(resource);
        breaker.call(op).await
    }

    /// Evicts breakers unused for longer than `max_idle`. Returns how many
    /// were removed.
    pub fn cleanup_idle(&self, max_idle: Duration) -> usize {
        let mut breakers = self.breakers.lock().unwrap();
        let before = breakers.len();
        breakers.retain(|_, breaker| breaker.idle_for() <= max_idle);
        let evicted = before - breakers.len();
        if evicted > 0 {
            info!(evicted, "Evicted idle circuit breakers");
        }
        evicted
    }

    /// Clears every breaker. Called on engine shutdown.
    pub fn shutdown(&self) {
        let mut breakers = self.breakers.lock().unwrap();
        let count = breakers.len();
        breakers.clear();
        info!(count, "Circuit breaker registry cleared");
    }

    /// Returns the number of live breakers.
    pub fn len(&self) -> usize {
        self.breakers.lock().unwrap().len()
    }

    /// Returns whether the registry holds no breakers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_settings(threshold: u32) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: threshold,
            window: Duration::from_secs(10),
            cooldown: Duration::from_millis(20),
        }
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .call(|| async { Err::<(), _>(TaskError::transient("down")) })
            .await;
    }

    #[tokio::test]
    async fn test_threshold_opens_breaker() {
        let breaker = CircuitBreaker::new("dest", fast_settings(3));

        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast_without_invoking() {
        let breaker = CircuitBreaker::new("dest", fast_settings(3));
        let invocations = AtomicUsize::new(0);

        for _ in 0..3 {
            fail(&breaker).await;
        }

        let result = breaker
            .call(|| async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TaskError>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_trial_success_closes_breaker() {
        let breaker = CircuitBreaker::new("dest", fast_settings(3));
        for _ in 0..3 {
            fail(&breaker).await;
        }

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let result = breaker.call(|| async { Ok::<_, TaskError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_trial_failure_reopens_breaker() {
        let breaker = CircuitBreaker::new("dest", fast_settings(2));
        for _ in 0..2 {
            fail(&breaker).await;
        }

        tokio::time::sleep(Duration::from_millis(30)).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // The cool-down clock restarted; still rejecting immediately after.
        let result = breaker.call(|| async { Ok::<_, TaskError>(()) }).await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
    }

    #[tokio::test]
    async fn test_half_open_admits_single_trial() {
        let breaker = CircuitBreaker::new("dest", fast_settings(1));
        fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let permit = breaker.try_acquire();
        assert!(permit.is_ok());
        assert!(matches!(
            breaker.try_acquire(),
            Err(BreakerError::Open { .. })
        ));
    }

    #[tokio::test]
    async fn test_abandoned_trial_releases_slot() {
        let breaker = CircuitBreaker::new("dest", fast_settings(1));
        fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        // A trial dropped mid-flight, as a dispatch timeout would do.
        let pending = breaker.call(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, TaskError>(())
        });
        let _ = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // The slot is free again; a healthy call closes the circuit.
        let result = breaker.call(|| async { Ok::<_, TaskError>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_registry_isolates_resources() {
        let registry = BreakerRegistry::new(fast_settings(1));

        let _ = registry
            .call_through("dest-a", || async {
                Err::<(), _>(TaskError::transient("down"))
            })
            .await;

        // dest-a is open; dest-b is unaffected.
        assert_eq!(registry.get_or_create("dest-a").state(), CircuitState::Open);
        let result = registry
            .call_through("dest-b", || async { Ok::<_, TaskError>("fine") })
            .await;
        assert_eq!(result.unwrap(), "fine");
    }

    #[tokio::test]
    async fn test_registry_reuses_breakers() {
        let registry = BreakerRegistry::default();
        let a = registry.get_or_create("dest");
        let b = registry.get_or_create("dest");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_idle_evicts() {
        let registry = BreakerRegistry::new(fast_settings(3));
        registry.get_or_create("old");

        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.get_or_create("fresh");

        let evicted = registry.cleanup_idle(Duration::from_millis(15));
        assert_eq!(evicted, 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_clears_registry() {
        let registry = BreakerRegistry::default();
        registry.get_or_create("a");
        registry.get_or_create("b");

        registry.shutdown();
        assert!(registry.is_empty());
    }
}
