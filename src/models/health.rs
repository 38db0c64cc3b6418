use std::{collections::BTreeMap, time::Duration};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::models::circuit_breaker::CircuitState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Condition of one dependency. A critical component that is down takes the
/// whole service down; anything else only degrades it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub critical: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit: Option<CircuitState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    pub fn up(critical: bool, latency: Duration) -> Self {
        Self {
            status: HealthStatus::Healthy,
            critical,
            latency_ms: Some(latency.as_millis() as u64),
            circuit: None,
            detail: None,
        }
    }

    pub fn down(critical: bool, detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            critical,
            latency_ms: None,
            circuit: None,
            detail: Some(detail.into()),
        }
    }

    /// Breakers are never critical: an open circuit sheds load on purpose.
    pub fn circuit(state: CircuitState) -> Self {
        let (status, detail) = match state {
            CircuitState::Closed => (HealthStatus::Healthy, None),
            CircuitState::HalfOpen => (
                HealthStatus::Degraded,
                Some("letting trial calls through".to_string()),
            ),
            CircuitState::Open => (
                HealthStatus::Degraded,
                Some("rejecting calls until the open timeout elapses".to_string()),
            ),
        };

        Self {
            status,
            critical: false,
            latency_ms: None,
            circuit: Some(state),
            detail,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: String,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthReport {
    pub fn new(components: BTreeMap<String, ComponentHealth>) -> Self {
        Self {
            status: Self::overall_status(&components),
            checked_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            components,
        }
    }

    pub fn overall_status(components: &BTreeMap<String, ComponentHealth>) -> HealthStatus {
        let mut overall = HealthStatus::Healthy;

        for component in components.values() {
            match component.status {
                HealthStatus::Unhealthy if component.critical => return HealthStatus::Unhealthy,
                HealthStatus::Unhealthy | HealthStatus::Degraded => {
                    overall = HealthStatus::Degraded
                }
                HealthStatus::Healthy => {}
            }
        }

        overall
    }

    pub fn is_serving(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(entries: Vec<(&str, ComponentHealth)>) -> HealthReport {
        HealthReport::new(
            entries
                .into_iter()
                .map(|(name, health)| (name.to_string(), health))
                .collect(),
        )
    }

    #[test]
    fn critical_component_down_is_unhealthy() {
        let report = report(vec![
            ("worker_broker", ComponentHealth::down(true, "consumer lost")),
            ("stat_storage", ComponentHealth::up(true, Duration::from_millis(2))),
        ]);

        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.is_serving());
    }

    #[test]
    fn open_circuit_degrades() {
        let report = report(vec![
            ("dispatch_broker", ComponentHealth::up(true, Duration::ZERO)),
            ("sms", ComponentHealth::circuit(CircuitState::Open)),
        ]);

        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.is_serving());
    }

    #[test]
    fn non_critical_component_down_only_degrades() {
        let report = report(vec![
            ("dispatch_broker", ComponentHealth::up(true, Duration::ZERO)),
            ("contact_vault", ComponentHealth::down(false, "redis down")),
        ]);

        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[test]
    fn closed_circuit_is_healthy_and_serialized_with_state() {
        let health = ComponentHealth::circuit(CircuitState::Closed);
        let json = serde_json::to_value(&health).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["circuit"], "closed");
        assert!(json.get("detail").is_none());
    }
}
