use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Failure threshold breached - reject all requests
    Open,
    /// Testing if the exchange recovered - allow limited requests
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    failure_count: usize,
    success_count: usize,
    last_failure_time: Option<Instant>,
}

/// Guards the exchange facade against hammering a broken endpoint. A run of
/// consecutive failures opens the circuit; after `cooldown` one probe is let
/// through, and `success_threshold` consecutive successes close it again.
pub struct CircuitBreaker {
    inner: Arc<RwLock<Inner>>,
    failure_threshold: usize,
    success_threshold: usize,
    cooldown: Duration,
    name: String,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: usize,
        success_threshold: usize,
        cooldown: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            })),
            failure_threshold,
            success_threshold,
            cooldown,
            name: name.into(),
        }
    }

    /// Whether a request may proceed right now. Transitions Open -> HalfOpen
    /// once the cooldown has elapsed.
    pub async fn check(&self) -> Result<(), String> {
        let mut inner = self.inner.write().await;

        if inner.state == CircuitState::Open {
            match inner.last_failure_time {
                Some(last) if last.elapsed() > self.cooldown => {
                    info!(
                        "CircuitBreaker [{}]: Open -> HalfOpen (cooldown elapsed)",
                        self.name
                    );
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                }
                Some(last) => {
                    return Err(format!(
                        "circuit breaker [{}] open, retry in {:?}",
                        self.name,
                        self.cooldown.saturating_sub(last.elapsed())
                    ));
                }
                None => {
                    inner.state = CircuitState::HalfOpen;
                }
            }
        }
        Ok(())
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.success_threshold {
                    info!(
                        "CircuitBreaker [{}]: HalfOpen -> Closed ({} successes)",
                        self.name, inner.success_count
                    );
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.failure_count += 1;
        inner.last_failure_time = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.failure_threshold {
                    error!(
                        "CircuitBreaker [{}]: Closed -> Open ({} failures)",
                        self.name, inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    "CircuitBreaker [{}]: HalfOpen -> Open (probe failed)",
                    self.name
                );
                inner.state = CircuitState::Open;
                inner.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_circuit_opens_after_failures() {
        let cb = CircuitBreaker::new("test", 3, 2, Duration::from_secs(1));

        for _ in 0..3 {
            assert!(cb.check().await.is_ok());
            cb.record_failure().await;
        }

        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(cb.check().await.is_err());
    }

    #[tokio::test]
    async fn test_circuit_recovers_after_cooldown() {
        let cb = CircuitBreaker::new("test", 2, 2, Duration::from_millis(50));

        for _ in 0..2 {
            cb.record_failure().await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(cb.check().await.is_ok());
        cb.record_success().await;
        cb.record_success().await;

        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_halfopen_reopens_on_failure() {
        let cb = CircuitBreaker::new("test", 2, 2, Duration::from_millis(50));

        for _ in 0..2 {
            cb.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(cb.check().await.is_ok());
        cb.record_failure().await;

        assert_eq!(cb.state().await, CircuitState::Open);
    }
}
