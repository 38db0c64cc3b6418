use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{
    clients::{broker::MessageBroker, circuit_breaker::CircuitBreaker},
    models::health::{ComponentHealth, HealthReport},
    services::stat::StatStorage,
};

/// Checks every dependency behind `/health`. Brokers and stat storage are
/// critical; circuit breakers only ever degrade the report.
pub struct HealthChecker {
    brokers: Vec<(String, Arc<dyn MessageBroker>)>,
    stat_storage: Arc<dyn StatStorage>,
    circuit_breakers: Vec<CircuitBreaker>,
}

impl HealthChecker {
    pub fn new(stat_storage: Arc<dyn StatStorage>, circuit_breakers: Vec<CircuitBreaker>) -> Self {
        Self {
            brokers: Vec::new(),
            stat_storage,
            circuit_breakers,
        }
    }

    pub fn with_broker(mut self, name: impl Into<String>, broker: Arc<dyn MessageBroker>) -> Self {
        self.brokers.push((name.into(), broker));
        self
    }

    pub async fn check_all(&self) -> HealthReport {
        let mut components = BTreeMap::new();

        for (name, broker) in &self.brokers {
            components.insert(name.clone(), Self::check_broker(name, broker.as_ref()));
        }

        components.insert("stat_storage".to_string(), self.check_stat_storage().await);

        for breaker in &self.circuit_breakers {
            let health = Self::check_circuit_breaker(breaker).await;
            components.insert(breaker.service_name().to_string(), health);
        }

        HealthReport::new(components)
    }

    fn check_broker(name: &str, broker: &dyn MessageBroker) -> ComponentHealth {
        if broker.is_connected() {
            ComponentHealth::up(true, Duration::ZERO)
        } else {
            warn!(broker = name, "Message broker is not connected");
            ComponentHealth::down(true, "broker connection is down")
        }
    }

    async fn check_stat_storage(&self) -> ComponentHealth {
        let start = Instant::now();

        match self.stat_storage.health_check().await {
            Ok(()) => {
                let elapsed = start.elapsed();
                debug!(latency_ms = elapsed.as_millis() as u64, "Stat storage reachable");
                ComponentHealth::up(true, elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Stat storage health check failed");
                ComponentHealth::down(true, format!("health check failed: {}", e))
            }
        }
    }

    async fn check_circuit_breaker(breaker: &CircuitBreaker) -> ComponentHealth {
        match breaker.state().await {
            Ok(state) => {
                debug!(
                    service = breaker.service_name(),
                    circuit_state = %state,
                    "Circuit state read"
                );
                ComponentHealth::circuit(state)
            }
            Err(e) => {
                warn!(
                    service = breaker.service_name(),
                    error = %e,
                    "Failed to read circuit breaker state"
                );
                ComponentHealth::down(false, format!("cannot read circuit state: {}", e))
            }
        }
    }
}
