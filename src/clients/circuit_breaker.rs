use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{debug, info, warn};

use crate::models::circuit_breaker::{CircuitBreakerConfig, CircuitState};

/// Persistence for breaker state so that replicas can share it.
#[async_trait]
pub trait CircuitStore: Send + Sync {
    async fn state(&self, service: &str) -> Result<CircuitState, Error>;

    async fn set_state(&self, service: &str, state: CircuitState) -> Result<(), Error>;

    /// Increments the failure counter; the counter expires after `ttl`.
    async fn incr_failures(&self, service: &str, ttl: Duration) -> Result<u32, Error>;

    async fn reset_failures(&self, service: &str) -> Result<(), Error>;

    async fn incr_successes(&self, service: &str) -> Result<u32, Error>;

    async fn set_opened_at(&self, service: &str, epoch_secs: u64) -> Result<(), Error>;

    async fn opened_at(&self, service: &str) -> Result<Option<u64>, Error>;

    async fn reset(&self, service: &str) -> Result<(), Error>;
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

pub struct RedisCircuitStore {
    connection: MultiplexedConnection,
}

impl RedisCircuitStore {
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        info!("Connecting to Redis...");

        let client =
            Client::open(redis_url).map_err(|_| anyhow!("Failed to create redis client"))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self { connection })
    }

    fn key(service: &str, field: &str) -> String {
        format!("circuit:{}:{}", service, field)
    }
}

#[async_trait]
impl CircuitStore for RedisCircuitStore {
    async fn state(&self, service: &str) -> Result<CircuitState, Error> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(Self::key(service, "state")).await?;

        Ok(value
            .map(|s| CircuitState::parse(&s))
            .unwrap_or(CircuitState::Closed))
    }

    async fn set_state(&self, service: &str, state: CircuitState) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(Self::key(service, "state"), state.as_str())
            .await?;
        Ok(())
    }

    async fn incr_failures(&self, service: &str, ttl: Duration) -> Result<u32, Error> {
        let mut conn = self.connection.clone();
        let key = Self::key(service, "failures");
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, ttl.as_secs() as i64).await?;
        Ok(count)
    }

    async fn reset_failures(&self, service: &str) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(Self::key(service, "failures")).await?;
        Ok(())
    }

    async fn incr_successes(&self, service: &str) -> Result<u32, Error> {
        let mut conn = self.connection.clone();
        let count: u32 = conn.incr(Self::key(service, "successes"), 1).await?;
        Ok(count)
    }

    async fn set_opened_at(&self, service: &str, epoch_secs: u64) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(Self::key(service, "opened_at"), epoch_secs)
            .await?;
        Ok(())
    }

    async fn opened_at(&self, service: &str) -> Result<Option<u64>, Error> {
        let mut conn = self.connection.clone();
        let opened_at: Option<u64> = conn.get(Self::key(service, "opened_at")).await?;
        Ok(opened_at)
    }

    async fn reset(&self, service: &str) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        for field in ["failures", "successes", "opened_at"] {
            conn.del::<_, ()>(Self::key(service, field)).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
struct CircuitRecord {
    state: Option<CircuitState>,
    failures: u32,
    failures_expire_at: u64,
    successes: u32,
    opened_at: Option<u64>,
}

/// Process-local breaker state, used when no Redis is configured.
#[derive(Default)]
pub struct MemoryCircuitStore {
    records: Mutex<HashMap<String, CircuitRecord>>,
}

impl MemoryCircuitStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<T>(&self, service: &str, f: impl FnOnce(&mut CircuitRecord) -> T) -> T {
        let mut records = self.records.lock();
        f(records.entry(service.to_string()).or_default())
    }
}

#[async_trait]
impl CircuitStore for MemoryCircuitStore {
    async fn state(&self, service: &str) -> Result<CircuitState, Error> {
        Ok(self.with_record(service, |r| r.state.unwrap_or(CircuitState::Closed)))
    }

    async fn set_state(&self, service: &str, state: CircuitState) -> Result<(), Error> {
        self.with_record(service, |r| r.state = Some(state));
        Ok(())
    }

    async fn incr_failures(&self, service: &str, ttl: Duration) -> Result<u32, Error> {
        let now = now_secs();
        Ok(self.with_record(service, |r| {
            if r.failures_expire_at != 0 && now >= r.failures_expire_at {
                r.failures = 0;
            }
            r.failures += 1;
            r.failures_expire_at = now + ttl.as_secs();
            r.failures
        }))
    }

    async fn reset_failures(&self, service: &str) -> Result<(), Error> {
        self.with_record(service, |r| r.failures = 0);
        Ok(())
    }

    async fn incr_successes(&self, service: &str) -> Result<u32, Error> {
        Ok(self.with_record(service, |r| {
            r.successes += 1;
            r.successes
        }))
    }

    async fn set_opened_at(&self, service: &str, epoch_secs: u64) -> Result<(), Error> {
        self.with_record(service, |r| r.opened_at = Some(epoch_secs));
        Ok(())
    }

    async fn opened_at(&self, service: &str) -> Result<Option<u64>, Error> {
        Ok(self.with_record(service, |r| r.opened_at))
    }

    async fn reset(&self, service: &str) -> Result<(), Error> {
        self.with_record(service, |r| {
            r.failures = 0;
            r.successes = 0;
            r.opened_at = None;
        });
        Ok(())
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    service_name: String,
    store: Arc<dyn CircuitStore>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(
        service_name: impl Into<String>,
        store: Arc<dyn CircuitStore>,
        config: CircuitBreakerConfig,
    ) -> Self {
        let service_name = service_name.into();
        info!(service = %service_name, "Circuit breaker initialized");

        Self {
            service_name,
            store,
            config,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub async fn state(&self) -> Result<CircuitState, Error> {
        self.store.state(&self.service_name).await
    }

    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        match self.state().await? {
            CircuitState::Open => {
                if self.should_attempt_reset().await? {
                    info!(service = %self.service_name, "Circuit breaker attempting reset");
                    self.store
                        .set_state(&self.service_name, CircuitState::HalfOpen)
                        .await?;
                    return self.try_operation(operation).await;
                }
                warn!(service = %self.service_name, "Circuit breaker is open, rejecting request");
                Err(anyhow!("Circuit breaker is open for {}", self.service_name))
            }
            CircuitState::HalfOpen => {
                debug!(service = %self.service_name, "Circuit breaker in half-open state");
                self.try_operation(operation).await
            }
            CircuitState::Closed => self.try_operation(operation).await,
        }
    }

    async fn try_operation<F, Fut, T>(&self, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        match operation().await {
            Ok(result) => {
                self.record_success().await?;
                Ok(result)
            }
            Err(e) => {
                self.record_failure().await?;
                Err(e)
            }
        }
    }

    async fn record_success(&self) -> Result<(), Error> {
        match self.state().await? {
            CircuitState::HalfOpen => {
                let successes = self.store.incr_successes(&self.service_name).await?;
                debug!(
                    service = %self.service_name,
                    successes,
                    threshold = self.config.success_threshold,
                    "Circuit breaker success recorded"
                );

                if successes >= self.config.success_threshold {
                    self.store
                        .set_state(&self.service_name, CircuitState::Closed)
                        .await?;
                    self.store.reset(&self.service_name).await?;
                    info!(service = %self.service_name, "Circuit breaker closed after successful recovery");
                }
            }
            CircuitState::Closed => self.store.reset_failures(&self.service_name).await?,
            CircuitState::Open => {}
        }

        Ok(())
    }

    async fn record_failure(&self) -> Result<(), Error> {
        if self.state().await? == CircuitState::HalfOpen {
            self.open().await?;
            warn!(service = %self.service_name, "Circuit breaker reopened after failed recovery attempt");
            return Ok(());
        }

        let failures = self
            .store
            .incr_failures(
                &self.service_name,
                Duration::from_secs(self.config.timeout_seconds),
            )
            .await?;
        debug!(
            service = %self.service_name,
            failures,
            threshold = self.config.failure_threshold,
            "Circuit breaker failure recorded"
        );

        if failures >= self.config.failure_threshold {
            self.open().await?;
            warn!(
                service = %self.service_name,
                failures,
                "Circuit breaker opened due to consecutive failures"
            );
        }

        Ok(())
    }

    async fn open(&self) -> Result<(), Error> {
        self.store
            .set_state(&self.service_name, CircuitState::Open)
            .await?;
        self.store
            .set_opened_at(&self.service_name, now_secs())
            .await
    }

    async fn should_attempt_reset(&self) -> Result<bool, Error> {
        let opened_at = self.store.opened_at(&self.service_name).await?;

        Ok(opened_at
            .map(|opened_at| now_secs().saturating_sub(opened_at) >= self.config.timeout_seconds)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, timeout_seconds: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "sms",
            Arc::new(MemoryCircuitStore::new()),
            CircuitBreakerConfig {
                failure_threshold,
                timeout_seconds,
                success_threshold: 1,
            },
        )
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = breaker(2, 60);

        for _ in 0..2 {
            let result: Result<()> = breaker.call(|| async { Err(anyhow!("boom")) }).await;
            assert!(result.is_err());
        }

        assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);

        let rejected = breaker.call(|| async { Ok::<_, Error>(()) }).await;
        assert!(rejected.is_err());
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let breaker = breaker(2, 60);

        let _ = breaker.call(|| async { Err::<(), _>(anyhow!("boom")) }).await;
        breaker.call(|| async { Ok::<_, Error>(()) }).await.unwrap();
        let _ = breaker.call(|| async { Err::<(), _>(anyhow!("boom")) }).await;

        assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_success_closes_circuit() {
        let breaker = breaker(1, 0);

        let _ = breaker.call(|| async { Err::<(), _>(anyhow!("boom")) }).await;
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);

        breaker.call(|| async { Ok::<_, Error>(()) }).await.unwrap();
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
    }
}
