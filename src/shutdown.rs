//! Ordered process shutdown.

use std::{future::Future, pin::Pin, time::Duration};

use tokio::{signal, time::timeout};
use tracing::{error, info, warn};

use crate::error::Result;

type Step = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub outcome: StepOutcome,
}

/// Cleanup steps run one after another, each bounded by `step_timeout`. A
/// failed or timed-out step is logged and the next one still runs.
pub struct ShutdownSequence {
    step_timeout: Duration,
    steps: Vec<(String, Step)>,
}

impl ShutdownSequence {
    pub fn new(step_timeout: Duration) -> Self {
        Self {
            step_timeout,
            steps: Vec::new(),
        }
    }

    pub fn step<F>(mut self, name: impl Into<String>, step: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.steps.push((name.into(), Box::pin(step)));
        self
    }

    pub async fn run(self) -> Vec<StepReport> {
        let mut reports = Vec::with_capacity(self.steps.len());

        for (name, step) in self.steps {
            let outcome = match timeout(self.step_timeout, step).await {
                Ok(Ok(())) => {
                    info!(step = %name, "Shutdown step completed");
                    StepOutcome::Completed
                }
                Ok(Err(e)) => {
                    error!(step = %name, error = %e, "Shutdown step failed");
                    StepOutcome::Failed(e.to_string())
                }
                Err(_) => {
                    warn!(
                        step = %name,
                        timeout_secs = self.step_timeout.as_secs(),
                        "Shutdown step timed out"
                    );
                    StepOutcome::TimedOut
                }
            };

            reports.push(StepReport { name, outcome });
        }

        reports
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
