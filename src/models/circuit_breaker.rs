use std::{fmt::Display, time::Duration};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Upper bound on a single protected call; exceeding it is a failure.
    pub timeout: Duration,
    /// How long the circuit stays open before admitting a probe.
    pub reset_timeout: Duration,
    pub error_threshold_percentage: u8,
    /// Minimum calls in the rolling window before the failure rate is judged.
    pub volume_threshold: u32,
    pub rolling_window: Duration,
}

impl CircuitBreakerConfig {
    /// Development profile: tolerant of slow local services, trips early.
    pub fn lenient() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(1),
            error_threshold_percentage: 50,
            volume_threshold: 1,
            rolling_window: Duration::from_secs(10),
        }
    }

    /// Production profile.
    pub fn strict() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            reset_timeout: Duration::from_secs(30),
            error_threshold_percentage: 20,
            volume_threshold: 10,
            rolling_window: Duration::from_secs(10),
        }
    }
}
