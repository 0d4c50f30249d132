use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    clients::{circuit_breaker::CircuitBreakers, rbmq::RabbitMqClient, redis::StatusStore},
    error::{PipelineError, Result},
    models::health::{HealthCheckResponse, HealthStatus, ServiceHealth},
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// A dependency whose reachability is reported by `/health`.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> Result<()>;
}

pub struct StoreProbe(pub Arc<dyn StatusStore>);

#[async_trait]
impl HealthProbe for StoreProbe {
    fn name(&self) -> &str {
        "store"
    }

    async fn check(&self) -> Result<()> {
        self.0.ping().await
    }
}

#[async_trait]
impl HealthProbe for RabbitMqClient {
    fn name(&self) -> &str {
        "message_broker"
    }

    async fn check(&self) -> Result<()> {
        self.channel().await.map(|_| ())
    }
}

pub struct HealthChecker {
    probes: Vec<Arc<dyn HealthProbe>>,
    breakers: Arc<CircuitBreakers>,
}

impl HealthChecker {
    pub fn new(probes: Vec<Arc<dyn HealthProbe>>, breakers: Arc<CircuitBreakers>) -> Self {
        Self { probes, breakers }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = BTreeMap::new();

        for probe in &self.probes {
            checks.insert(probe.name().to_string(), Self::run_probe(probe.as_ref()).await);
        }

        for (service, state) in self.breakers.states() {
            debug!(service = %service, circuit_state = %state, "Circuit breaker state checked");
            checks.insert(service, ServiceHealth::from_circuit(state));
        }

        HealthCheckResponse {
            status: Self::determine_overall_status(&checks),
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn run_probe(probe: &dyn HealthProbe) -> ServiceHealth {
        let start = Instant::now();

        let outcome = match timeout(PROBE_TIMEOUT, probe.check()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(PipelineError::Timeout {
                service: probe.name().to_string(),
                timeout_ms: PROBE_TIMEOUT.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(dependency = probe.name(), response_time_ms = elapsed, "Health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(dependency = probe.name(), error = %e, "Health check failed");
                ServiceHealth::unhealthy(e.to_string())
            }
        }
    }

    /// Any unhealthy dependency makes the process unhealthy; an open or
    /// half-open circuit only degrades it.
    pub fn determine_overall_status(checks: &BTreeMap<String, ServiceHealth>) -> HealthStatus {
        let statuses = || checks.values().map(|health| health.status);

        if statuses().any(|s| s == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if statuses().any(|s| s == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
