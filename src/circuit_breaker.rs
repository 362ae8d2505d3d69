use crate::errors::AppError;
use crate::models::CircuitBreakerState;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Circuit breaker around every outbound scoring call.
///
/// # States
///
/// - **CLOSED**: Normal operation, calls pass through.
/// - **OPEN**: `failure_threshold` consecutive transport failures; calls fail fast
///   with `ServiceUnavailable` until `cooldown` has elapsed since the last failure.
/// - **HALF_OPEN**: After cooldown exactly one probe call is admitted. Success
///   closes the circuit, failure restarts the cooldown. Other callers fail fast
///   while the probe is in flight.
///
/// Only `AppError::ScoringServiceError` counts as a failure. A scorer that answers
/// `{"success": false}` is up, so `ScoringRejected` never trips the circuit.
///
/// One instance is shared per process through an `Arc`.
///
/// # Example
///
/// ```rust
/// use rust_recon_api::circuit_breaker::ResilienceGuard;
/// use std::time::Duration;
///
/// // let guard = ResilienceGuard::new(3, Duration::from_secs(60));
/// // let score = guard.call(|| client.predict(&pair, 0.95)).await?;
/// ```
#[derive(Debug)]
pub struct ResilienceGuard {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<GuardState>,
}

#[derive(Debug, Default)]
struct GuardState {
    is_healthy: bool,
    consecutive_failures: u32,
    /// Monotonic time of the failure that opened (or re-opened) the circuit.
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    last_failure_at: Option<DateTime<Utc>>,
    last_health_check: Option<DateTime<Utc>>,
}

/// How a call was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Closed,
    Probe,
}

/// Releases the probe slot if the probing future is dropped before it settles.
struct ProbeSlot<'a> {
    guard: &'a ResilienceGuard,
    armed: bool,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.guard.lock().probe_in_flight = false;
        }
    }
}

impl ResilienceGuard {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: Mutex::new(GuardState {
                is_healthy: true,
                ..GuardState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `operation` through the breaker.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let admission = self.admit()?;
        let mut slot = ProbeSlot {
            guard: self,
            armed: admission == Admission::Probe,
        };

        let result = operation().await;

        slot.armed = false;
        self.record(&result, admission);
        result
    }

    fn admit(&self) -> Result<Admission, AppError> {
        let mut state = self.lock();
        let Some(opened_at) = state.opened_at else {
            return Ok(Admission::Closed);
        };

        let elapsed = Instant::now().saturating_duration_since(opened_at);
        if elapsed < self.cooldown {
            return Err(AppError::ServiceUnavailable {
                retry_after_secs: ceil_secs(self.cooldown - elapsed),
            });
        }
        if state.probe_in_flight {
            return Err(AppError::ServiceUnavailable { retry_after_secs: 1 });
        }

        state.probe_in_flight = true;
        tracing::info!("Circuit half-open, admitting probe call to scoring service");
        Ok(Admission::Probe)
    }

    fn record<T>(&self, result: &Result<T, AppError>, admission: Admission) {
        let mut state = self.lock();
        if admission == Admission::Probe {
            state.probe_in_flight = false;
        }

        match result {
            Err(e) if e.is_transport_failure() => {
                state.consecutive_failures += 1;
                state.last_failure_at = Some(Utc::now());

                if admission == Admission::Probe {
                    state.opened_at = Some(Instant::now());
                    tracing::warn!("Probe call failed, circuit re-opened: {}", e);
                } else if state.opened_at.is_none()
                    && state.consecutive_failures >= self.failure_threshold
                {
                    state.opened_at = Some(Instant::now());
                    tracing::warn!(
                        "Circuit opened after {} consecutive scoring failures (cooldown {}s)",
                        state.consecutive_failures,
                        self.cooldown.as_secs()
                    );
                }
            }
            // A rejected request still proves the scorer is reachable.
            Err(_) if admission == Admission::Probe => self.close(&mut state),
            Err(_) => {}
            Ok(_) => {
                if state.opened_at.is_some() {
                    self.close(&mut state);
                } else {
                    state.consecutive_failures = 0;
                }
            }
        }
    }

    fn close(&self, state: &mut GuardState) {
        state.consecutive_failures = 0;
        state.opened_at = None;
        tracing::info!("Circuit closed, scoring service recovered");
    }

    pub fn is_open(&self) -> bool {
        self.lock().opened_at.is_some()
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let state = self.lock();
        CircuitBreakerState {
            is_healthy: state.is_healthy,
            consecutive_failures: state.consecutive_failures,
            circuit_open: state.opened_at.is_some(),
            last_failure_at: state.last_failure_at,
            last_health_check: state.last_health_check,
        }
    }

    /// Record a health probe result. Never touches the trip counter.
    pub fn set_healthy(&self, healthy: bool) {
        let mut state = self.lock();
        if state.is_healthy != healthy {
            if healthy {
                tracing::info!("Scoring service health check recovered");
            } else {
                tracing::warn!("Scoring service health check failing");
            }
        }
        state.is_healthy = healthy;
        state.last_health_check = Some(Utc::now());
    }

    /// Poll `probe` every `interval` and feed the answer into `set_healthy`.
    pub fn spawn_health_monitor<F, Fut>(
        self: Arc<Self>,
        interval: Duration,
        probe: F,
    ) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let healthy = probe().await;
                self.set_healthy(healthy);
            }
        })
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn failing() -> impl Future<Output = Result<(), AppError>> {
        async { Err(AppError::ScoringServiceError("503 Service Unavailable".to_string())) }
    }

    async fn trip(guard: &ResilienceGuard) {
        for _ in 0..3 {
            assert!(guard.call(failing).await.is_err());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_fails_fast() {
        let guard = ResilienceGuard::new(3, Duration::from_secs(60));
        trip(&guard).await;
        assert!(guard.is_open());

        let attempts = AtomicUsize::new(0);
        let result = guard
            .call(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(())
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        match result {
            Err(AppError::ServiceUnavailable { retry_after_secs }) => {
                assert_eq!(retry_after_secs, 60)
            }
            other => panic!("Expected fail-fast rejection, got {:?}", other),
        }

        tokio::time::advance(Duration::from_millis(30_500)).await;
        match guard.call(failing).await {
            Err(AppError::ServiceUnavailable { retry_after_secs }) => {
                assert_eq!(retry_after_secs, 30)
            }
            other => panic!("Expected fail-fast rejection, got {:?}", other),
        }

        let snapshot = guard.snapshot();
        assert!(snapshot.circuit_open);
        assert_eq!(snapshot.consecutive_failures, 3);
        assert!(snapshot.last_failure_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_probe_closes_circuit() {
        let guard = ResilienceGuard::new(3, Duration::from_secs(60));
        trip(&guard).await;
        tokio::time::advance(Duration::from_secs(60)).await;

        let value = guard.call(|| async { Ok::<_, AppError>(7) }).await.unwrap();
        assert_eq!(value, 7);

        let snapshot = guard.snapshot();
        assert!(!snapshot.circuit_open);
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_restarts_cooldown() {
        let guard = ResilienceGuard::new(3, Duration::from_secs(60));
        trip(&guard).await;
        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(matches!(
            guard.call(failing).await,
            Err(AppError::ScoringServiceError(_))
        ));
        match guard.call(failing).await {
            Err(AppError::ServiceUnavailable { retry_after_secs }) => {
                assert_eq!(retry_after_secs, 60)
            }
            other => panic!("Expected fail-fast rejection, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_probe_while_half_open() {
        let guard = Arc::new(ResilienceGuard::new(3, Duration::from_secs(60)));
        trip(&guard).await;
        tokio::time::advance(Duration::from_secs(60)).await;

        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let probe = {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .call(|| async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok::<_, AppError>("probe")
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        let concurrent = guard.call(|| async { Ok::<_, AppError>("second") }).await;
        assert!(matches!(
            concurrent,
            Err(AppError::ServiceUnavailable { .. })
        ));

        release_tx.send(()).unwrap();
        assert_eq!(probe.await.unwrap().unwrap(), "probe");
        assert!(!guard.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_releases_slot() {
        let guard = ResilienceGuard::new(3, Duration::from_secs(60));
        trip(&guard).await;
        tokio::time::advance(Duration::from_secs(60)).await;

        let pending = guard.call(|| std::future::pending::<Result<(), AppError>>());
        let timed_out = tokio::time::timeout(Duration::from_secs(1), pending).await;
        assert!(timed_out.is_err());

        // Still open, but the next caller may probe again.
        assert!(guard.call(|| async { Ok::<_, AppError>(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejections_do_not_trip() {
        let guard = ResilienceGuard::new(3, Duration::from_secs(60));
        for _ in 0..5 {
            let result = guard
                .call(|| async {
                    Err::<(), _>(AppError::ScoringRejected("invalid payload".to_string()))
                })
                .await;
            assert!(matches!(result, Err(AppError::ScoringRejected(_))));
        }
        assert!(!guard.is_open());
        assert_eq!(guard.snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_success_resets_counter_below_threshold() {
        let guard = ResilienceGuard::new(3, Duration::from_secs(60));
        let _ = guard.call(failing).await;
        let _ = guard.call(failing).await;
        guard.call(|| async { Ok::<_, AppError>(()) }).await.unwrap();
        let _ = guard.call(failing).await;
        assert!(!guard.is_open());
        assert_eq!(guard.snapshot().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_monitor_updates_health_only() {
        let guard = Arc::new(ResilienceGuard::new(3, Duration::from_secs(60)));
        let _ = guard.call(failing).await;

        let handle = guard
            .clone()
            .spawn_health_monitor(Duration::from_secs(30), || async { false });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = guard.snapshot();
        assert!(!snapshot.is_healthy);
        assert!(snapshot.last_health_check.is_some());
        assert_eq!(snapshot.consecutive_failures, 1);
        assert!(!snapshot.circuit_open);
        handle.abort();
    }
}
