use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use tokio::{sync::broadcast, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    error::{PipelineError, Result},
    models::circuit_breaker::{CircuitBreakerConfig, CircuitState},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerTransition {
    pub service: String,
    pub from: CircuitState,
    pub to: CircuitState,
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    at: Instant,
    failed: bool,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    window: VecDeque<Outcome>,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            failure_count: 0,
            last_failure_time: None,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Guards a single category of calls (one logical service).
///
/// State is owned by the breaker and only mutated from [`CircuitBreaker::call`].
/// Admission is decided under a short synchronous lock, so of many concurrent
/// callers arriving after `reset_timeout` exactly one becomes the half-open
/// probe.
#[derive(Debug)]
pub struct CircuitBreaker {
    service_name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    events: broadcast::Sender<BreakerTransition>,
}

impl CircuitBreaker {
    pub fn new(service_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let service_name = service_name.into();
        let (events, _) = broadcast::channel(16);

        debug!(service = %service_name, "Circuit breaker initialized");

        Self {
            service_name,
            config,
            state: Mutex::new(BreakerState::new()),
            events,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn last_failure_time(&self) -> Option<Instant> {
        self.lock().last_failure_time
    }

    /// Receives every state transition of this breaker.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerTransition> {
        self.events.subscribe()
    }

    /// Runs `operation` under the breaker. Fails fast with `CircuitOpen` when
    /// the circuit is open; bounds the call with the configured timeout.
    /// Never retries.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let admission = self.admit()?;
        let mut guard = ProbeGuard {
            breaker: self,
            armed: admission == Admission::Probe,
        };

        let result = match timeout(self.config.timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout {
                service: self.service_name.clone(),
                timeout_ms: self.config.timeout.as_millis() as u64,
            }),
        };

        let failed = matches!(&result, Err(e) if e.trips_breaker());
        self.record(admission, failed);
        guard.armed = false;

        result
    }

    fn admit(&self) -> Result<Admission> {
        let mut transition = None;

        let admission = {
            let mut state = self.lock();

            match state.state {
                CircuitState::Closed => Ok(Admission::Normal),
                CircuitState::Open => {
                    let cooled_down = state
                        .opened_at
                        .is_none_or(|opened| opened.elapsed() >= self.config.reset_timeout);

                    if cooled_down {
                        state.state = CircuitState::HalfOpen;
                        state.probe_in_flight = true;
                        transition = Some((CircuitState::Open, CircuitState::HalfOpen));
                        Ok(Admission::Probe)
                    } else {
                        Err(PipelineError::circuit_open(&self.service_name))
                    }
                }
                CircuitState::HalfOpen => {
                    if state.probe_in_flight {
                        Err(PipelineError::circuit_open(&self.service_name))
                    } else {
                        state.probe_in_flight = true;
                        Ok(Admission::Probe)
                    }
                }
            }
        };

        if let Some((from, to)) = transition {
            self.emit(from, to);
        }

        if admission.is_err() {
            debug!(service = %self.service_name, "Circuit breaker is open, rejecting request");
        }

        admission
    }

    /// Only the probe decides a half-open circuit. Calls admitted while the
    /// circuit was still closed are ignored once it has left `Closed`.
    fn record(&self, admission: Admission, failed: bool) {
        let now = Instant::now();
        let mut transition = None;

        {
            let mut state = self.lock();

            match (admission, state.state) {
                (Admission::Probe, CircuitState::HalfOpen) => {
                    state.probe_in_flight = false;
                    if failed {
                        Self::note_failure(&mut state, now);
                        Self::trip(&mut state, now);
                        transition = Some((CircuitState::HalfOpen, CircuitState::Open));
                    } else {
                        Self::reset(&mut state);
                        transition = Some((CircuitState::HalfOpen, CircuitState::Closed));
                    }
                }
                (Admission::Normal, CircuitState::Closed) => {
                    if failed {
                        Self::note_failure(&mut state, now);
                    }
                    state.window.push_back(Outcome { at: now, failed });
                    self.prune(&mut state, now);

                    if failed && self.threshold_exceeded(&state) {
                        Self::trip(&mut state, now);
                        transition = Some((CircuitState::Closed, CircuitState::Open));
                    }
                }
                // Stale: admitted before another caller tripped the circuit.
                (Admission::Normal, _) => {}
                (Admission::Probe, _) => state.probe_in_flight = false,
            }
        }

        if let Some((from, to)) = transition {
            self.emit(from, to);
        }
    }

    fn note_failure(state: &mut BreakerState, now: Instant) {
        state.failure_count += 1;
        state.last_failure_time = Some(now);
    }

    fn threshold_exceeded(&self, state: &BreakerState) -> bool {
        let volume = state.window.len() as u64;
        if volume == 0 || volume < u64::from(self.config.volume_threshold) {
            return false;
        }

        let failures = state.window.iter().filter(|o| o.failed).count() as u64;
        failures * 100 >= u64::from(self.config.error_threshold_percentage) * volume
    }

    fn prune(&self, state: &mut BreakerState, now: Instant) {
        while let Some(oldest) = state.window.front() {
            if now.duration_since(oldest.at) > self.config.rolling_window {
                state.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn trip(state: &mut BreakerState, now: Instant) {
        state.state = CircuitState::Open;
        state.opened_at = Some(now);
        state.window.clear();
    }

    fn reset(state: &mut BreakerState) {
        state.state = CircuitState::Closed;
        state.opened_at = None;
        state.failure_count = 0;
        state.window.clear();
    }

    fn emit(&self, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => {
                warn!(service = %self.service_name, from = %from, "Circuit OPEN, service appears to be down")
            }
            CircuitState::HalfOpen => {
                info!(service = %self.service_name, "Circuit HALF-OPEN, testing service")
            }
            CircuitState::Closed => {
                info!(service = %self.service_name, "Circuit CLOSED, service restored")
            }
        }

        let _ = self.events.send(BreakerTransition {
            service: self.service_name.clone(),
            from,
            to,
        });
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Frees the half-open probe slot if the probing future is dropped before
/// it reports an outcome.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}

/// One breaker per logical service name, created on first use.
#[derive(Debug)]
pub struct CircuitBreakers {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, service_name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        breakers
            .entry(service_name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(service_name, self.config.clone())))
            .clone()
    }

    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let breakers = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut states: Vec<_> = breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}
