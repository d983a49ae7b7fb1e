//! Concurrency-limited dispatch of batches to a chain of review backends.
//!
//! A single coordinator owns every piece of mutable state: per-batch attempt
//! counters, per-backend rate-limit streaks, and the degraded set. Workers
//! run one backend call each and hand the outcome back through the
//! [`JoinSet`]; the coordinator then decides whether the batch succeeded,
//! retries, rotates, or fails.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use duckgate_core::{DuckgateError, ReviewResult, ReviewUnit};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, ReviewBackend};
use crate::batcher::Batch;
use crate::retry::RetryPolicy;

/// Lifecycle of one batch inside the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    InFlight,
    Retrying,
    Succeeded,
    Failed,
}

/// Final state of one batch, with one result per unit.
#[derive(Debug, Clone)]
pub struct ReviewedBatch {
    pub index: usize,
    pub units: Vec<ReviewUnit>,
    /// Parallel to `units`.
    pub results: Vec<ReviewResult>,
    /// Backend the batch was last issued to. After a rotation this is the
    /// fallback, whether it answered or not. `None` if never dispatched.
    pub backend: Option<String>,
    pub state: BatchState,
    /// Backend calls made for this batch across all backends.
    pub attempts: u32,
}

/// Counters reported alongside the reviewed batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Backend calls issued.
    pub requests: usize,
    /// Calls that were retries on the same backend.
    pub retries: usize,
    /// Batches moved to a fallback backend.
    pub rotations: usize,
    /// Backends marked degraded during the scan, in the order it happened.
    pub degraded: Vec<String>,
}

#[derive(Debug)]
pub struct OrchestratorOutput {
    /// In submission order.
    pub batches: Vec<ReviewedBatch>,
    pub stats: DispatchStats,
}

struct Slot {
    units: Arc<Vec<ReviewUnit>>,
    state: BatchState,
    backend: usize,
    attempts_on_backend: u32,
    total_attempts: u32,
    rate_limit_retried: bool,
    results: Option<Vec<ReviewResult>>,
    assigned: Option<String>,
}

impl Slot {
    fn finish(&mut self, state: BatchState, results: Vec<ReviewResult>) {
        self.state = state;
        self.results = Some(results);
    }

    fn fail(&mut self, reason: String) {
        let results = vec![ReviewResult::unavailable(reason); self.units.len()];
        self.finish(BatchState::Failed, results);
    }

    fn move_to(&mut self, backend: usize) {
        self.backend = backend;
        self.attempts_on_backend = 0;
        self.rate_limit_retried = false;
    }
}

#[derive(Debug, Default)]
struct BackendHealth {
    consecutive_rate_limits: u32,
    degraded: bool,
}

struct Event {
    batch: usize,
    backend: usize,
    outcome: Result<Vec<ReviewResult>, BackendError>,
}

/// Sends batches to an ordered backend chain.
///
/// At most `max_concurrent` calls are outstanding at any time, across every
/// backend. Transient failures retry on the same backend with jittered
/// backoff up to `max_attempts`. A rate limit retries once. If it recurs for
/// the same batch, or the backend hits `rotate_after` consecutive rate limits
/// across batches, the backend is degraded for the rest of the scan and its
/// batches move to the next healthy backend. Fatal errors and exhausted
/// retries turn the batch into "review unavailable" results.
///
/// Backoff delays are timers owned by the coordinator, so a waiting retry
/// holds no concurrency slot and picks its backend only when it fires.
pub struct ReviewOrchestrator {
    backends: Vec<Arc<dyn ReviewBackend>>,
    policy: RetryPolicy,
    max_concurrent: usize,
}

impl std::fmt::Debug for ReviewOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("ReviewOrchestrator")
            .field("backends", &names)
            .field("policy", &self.policy)
            .field("max_concurrent", &self.max_concurrent)
            .finish()
    }
}

impl ReviewOrchestrator {
    pub fn new(
        backends: Vec<Arc<dyn ReviewBackend>>,
        policy: RetryPolicy,
        max_concurrent: usize,
    ) -> Self {
        Self {
            backends,
            policy,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    /// Review every batch.
    ///
    /// # Errors
    ///
    /// - [`DuckgateError::Config`] when batches exist but no backend does.
    /// - [`DuckgateError::AllBackendsExhausted`] when every backend is
    ///   degraded while batches remain.
    /// - [`DuckgateError::Cancelled`] when `cancel` fires. Calls already
    ///   dispatched are detached and their results discarded.
    pub async fn review(
        &self,
        batches: Vec<Batch>,
        cancel: &CancellationToken,
    ) -> Result<OrchestratorOutput, DuckgateError> {
        let mut stats = DispatchStats::default();
        if batches.is_empty() {
            return Ok(OrchestratorOutput {
                batches: Vec::new(),
                stats,
            });
        }
        if self.backends.is_empty() {
            return Err(DuckgateError::Config(
                "no review backends configured: add a [[backends]] entry".into(),
            ));
        }

        let indices: Vec<usize> = batches.iter().map(|b| b.index).collect();
        let mut slots: Vec<Slot> = batches
            .into_iter()
            .map(|b| Slot {
                units: Arc::new(b.units),
                state: BatchState::Pending,
                backend: 0,
                attempts_on_backend: 0,
                total_attempts: 0,
                rate_limit_retried: false,
                results: None,
                assigned: None,
            })
            .collect();
        let mut health: Vec<BackendHealth> =
            self.backends.iter().map(|_| BackendHealth::default()).collect();

        // Batches ready to dispatch now. Retries waiting out a backoff sit in
        // `backoff` and rejoin this queue when their timer fires, so the
        // backend is always chosen at dispatch time.
        let mut ready: VecDeque<usize> = (0..slots.len()).collect();
        let mut backoff: JoinSet<usize> = JoinSet::new();
        let mut in_flight: JoinSet<Event> = JoinSet::new();
        let mut last_failure = String::from("rate limited");

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(&mut in_flight, &mut backoff));
            }

            while in_flight.len() < self.max_concurrent {
                let Some(i) = ready.pop_front() else {
                    break;
                };
                let slot = &mut slots[i];
                if health[slot.backend].degraded {
                    match first_healthy(&health) {
                        Some(next) => {
                            debug!(
                                batch = i,
                                from = self.backends[slot.backend].name(),
                                to = self.backends[next].name(),
                                "moving batch off degraded backend"
                            );
                            slot.move_to(next);
                            stats.rotations += 1;
                        }
                        None => {
                            in_flight.detach_all();
                            backoff.abort_all();
                            return Err(exhausted(&slots, last_failure));
                        }
                    }
                }

                slot.attempts_on_backend += 1;
                slot.total_attempts += 1;
                slot.state = BatchState::InFlight;
                stats.requests += 1;

                let backend_index = slot.backend;
                let backend = Arc::clone(&self.backends[backend_index]);
                slot.assigned = Some(backend.name().to_string());
                let units = Arc::clone(&slot.units);
                debug!(
                    batch = i,
                    backend = backend.name(),
                    units = units.len(),
                    attempt = slot.attempts_on_backend,
                    "dispatching batch"
                );
                in_flight.spawn(async move {
                    // A panicking backend fails its own batch, not the scan.
                    let outcome =
                        match tokio::spawn(async move { backend.submit(&units).await }).await {
                            Ok(outcome) => outcome,
                            Err(e) => Err(BackendError::Fatal(format!("review task failed: {e}"))),
                        };
                    Event {
                        batch: i,
                        backend: backend_index,
                        outcome,
                    }
                });
            }

            if in_flight.is_empty() && backoff.is_empty() {
                break;
            }

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(self.cancelled(&mut in_flight, &mut backoff));
                }
                Some(fired) = backoff.join_next(), if !backoff.is_empty() => {
                    let batch = fired
                        .map_err(|e| DuckgateError::Backend(format!("backoff timer failed: {e}")))?;
                    ready.push_back(batch);
                    continue;
                }
                joined = in_flight.join_next(), if !in_flight.is_empty() => joined,
            };
            let Some(joined) = joined else {
                continue;
            };
            let event =
                joined.map_err(|e| DuckgateError::Backend(format!("review task failed: {e}")))?;

            let name = self.backends[event.backend].name();
            let slot = &mut slots[event.batch];
            match event.outcome {
                Ok(results) if results.len() == slot.units.len() => {
                    health[event.backend].consecutive_rate_limits = 0;
                    debug!(batch = event.batch, backend = name, "batch reviewed");
                    slot.finish(BatchState::Succeeded, results);
                }
                Ok(results) => {
                    warn!(
                        batch = event.batch,
                        backend = name,
                        expected = slot.units.len(),
                        got = results.len(),
                        "backend returned the wrong number of results"
                    );
                    let reason = format!(
                        "{name} returned {} results for {} units",
                        results.len(),
                        slot.units.len()
                    );
                    slot.fail(reason);
                }
                Err(BackendError::Fatal(message)) => {
                    warn!(batch = event.batch, backend = name, error = %message, "batch failed");
                    slot.fail(format!("{name}: {message}"));
                }
                Err(error @ BackendError::Transient { .. }) => {
                    if slot.attempts_on_backend < self.policy.max_attempts() {
                        let delay = self.policy.delay_for(&error, slot.attempts_on_backend);
                        warn!(
                            batch = event.batch,
                            backend = name,
                            attempt = slot.attempts_on_backend,
                            max_attempts = self.policy.max_attempts(),
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "retrying after transient error"
                        );
                        slot.state = BatchState::Retrying;
                        stats.retries += 1;
                        schedule(&mut backoff, event.batch, delay);
                    } else {
                        let attempts = slot.attempts_on_backend;
                        warn!(batch = event.batch, backend = name, attempts, error = %error, "retries exhausted");
                        slot.fail(format!("{name}: {error} (after {attempts} attempts)"));
                    }
                }
                Err(error @ BackendError::RateLimited { .. }) => {
                    last_failure = format!("{name}: {error}");
                    let recurring = slot.rate_limit_retried;
                    let backend = &mut health[event.backend];
                    backend.consecutive_rate_limits += 1;
                    if !backend.degraded
                        && (recurring
                            || backend.consecutive_rate_limits >= self.policy.rotate_after())
                    {
                        backend.degraded = true;
                        stats.degraded.push(name.to_string());
                        warn!(
                            backend = name,
                            consecutive = backend.consecutive_rate_limits,
                            recurring,
                            "backend degraded after repeated rate limits"
                        );
                    }

                    if health[event.backend].degraded {
                        match first_healthy(&health) {
                            Some(next) => {
                                info!(
                                    batch = event.batch,
                                    from = name,
                                    to = self.backends[next].name(),
                                    "rotating batch to fallback backend"
                                );
                                slot.move_to(next);
                                slot.state = BatchState::Pending;
                                stats.rotations += 1;
                                ready.push_front(event.batch);
                            }
                            None => {
                                in_flight.detach_all();
                                backoff.abort_all();
                                return Err(exhausted(&slots, last_failure));
                            }
                        }
                    } else {
                        slot.rate_limit_retried = true;
                        let delay = self.policy.delay_for(&error, slot.attempts_on_backend);
                        warn!(
                            batch = event.batch,
                            backend = name,
                            delay_ms = delay.as_millis() as u64,
                            "rate limited, retrying once"
                        );
                        slot.state = BatchState::Retrying;
                        stats.retries += 1;
                        schedule(&mut backoff, event.batch, delay);
                    }
                }
            }
        }

        let batches = slots
            .into_iter()
            .zip(indices)
            .map(|(slot, index)| {
                let units = Arc::try_unwrap(slot.units).unwrap_or_else(|shared| (*shared).clone());
                let results = slot.results.unwrap_or_else(|| {
                    vec![ReviewResult::unavailable("batch was never reviewed"); units.len()]
                });
                ReviewedBatch {
                    index,
                    units,
                    results,
                    backend: slot.assigned,
                    state: slot.state,
                    attempts: slot.total_attempts,
                }
            })
            .collect();

        info!(
            requests = stats.requests,
            retries = stats.retries,
            rotations = stats.rotations,
            degraded = stats.degraded.len(),
            "review dispatch complete"
        );
        Ok(OrchestratorOutput { batches, stats })
    }

    fn cancelled(
        &self,
        in_flight: &mut JoinSet<Event>,
        backoff: &mut JoinSet<usize>,
    ) -> DuckgateError {
        let detached = in_flight.len();
        in_flight.detach_all();
        backoff.abort_all();
        info!(detached, "review cancelled");
        DuckgateError::Cancelled
    }
}

fn schedule(backoff: &mut JoinSet<usize>, batch: usize, delay: Duration) {
    backoff.spawn(async move {
        tokio::time::sleep(delay).await;
        batch
    });
}

fn first_healthy(health: &[BackendHealth]) -> Option<usize> {
    health.iter().position(|h| !h.degraded)
}

fn exhausted(slots: &[Slot], reason: String) -> DuckgateError {
    let pending = slots.iter().filter(|s| s.results.is_none()).count();
    warn!(pending, reason = %reason, "all review backends exhausted");
    DuckgateError::AllBackendsExhausted { pending, reason }
}
