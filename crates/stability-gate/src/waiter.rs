//! Deadline-bounded polling loop
//!
//! The loop itself branches on [`PollOutcome`]; only the outward
//! [`Stabilizer`] and [`wait_for_stability`] turn a timed-out outcome into a
//! [`StabilizationTimeout`] error.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use crate::clock::{elapsed_between, Clock, TokioClock};
use crate::config::{ConfigOverrides, PolicyConfiguration};
use crate::diagnostics::{DiagnosticRecord, DiagnosticReport};
use crate::errors::{InstrumentationError, StabilityError, StabilizationTimeout};
use crate::evaluator::{blocking_factors, evaluate};
use crate::signals::StabilityStatus;
use crate::telemetry::TelemetrySnapshot;
use crate::timeline::{Timeline, TimelineEntry};

/// Fetch attempts allowed within one poll tick
pub const FETCH_ATTEMPTS: u32 = 3;

/// Anything that can produce a fresh telemetry snapshot
///
/// Fetches must be idempotent: repeated calls return fresh but comparable
/// snapshots and never consume collector state.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn fetch(&self) -> Result<TelemetrySnapshot, InstrumentationError>;
}

#[async_trait]
impl<T: TelemetrySource + ?Sized> TelemetrySource for Arc<T> {
    async fn fetch(&self) -> Result<TelemetrySnapshot, InstrumentationError> {
        (**self).fetch().await
    }
}

#[async_trait]
impl<'a, T: TelemetrySource + ?Sized> TelemetrySource for &'a T {
    async fn fetch(&self) -> Result<TelemetrySnapshot, InstrumentationError> {
        (**self).fetch().await
    }
}

/// Fetch once, retrying transient failures up to [`FETCH_ATTEMPTS`] times
pub async fn fetch_with_retry<S>(source: &S) -> Result<TelemetrySnapshot, InstrumentationError>
where
    S: TelemetrySource + ?Sized,
{
    let mut last = None;
    for attempt in 1..=FETCH_ATTEMPTS {
        match source.fetch().await {
            Ok(snapshot) => return Ok(snapshot),
            Err(err) if err.is_retryable() => {
                debug!(attempt, error = %err, "telemetry fetch failed, retrying");
                last = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(InstrumentationError::Exhausted {
        attempts: FETCH_ATTEMPTS,
        last: Box::new(last.unwrap_or_else(|| {
            InstrumentationError::NotReady("no fetch attempted".to_string())
        })),
    })
}

/// Result of one complete polling run
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Stable(StabilityStatus),
    TimedOut(DiagnosticRecord),
}

/// State accumulated while polling, kept whatever the outcome
#[derive(Debug, Clone)]
pub struct WaitState {
    pub wait_id: Uuid,
    pub timeline: Timeline,
    pub last_status: Option<StabilityStatus>,
    pub blocking_factors: BTreeMap<String, Value>,
    pub polls: u32,
    pub elapsed: Duration,
}

impl WaitState {
    pub fn new() -> Self {
        Self {
            wait_id: Uuid::new_v4(),
            timeline: Timeline::default(),
            last_status: None,
            blocking_factors: BTreeMap::new(),
            polls: 0,
            elapsed: Duration::ZERO,
        }
    }
}

impl Default for WaitState {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `source` until the policy is satisfied or the deadline passes
///
/// Errors only when the per-tick fetch budget is exhausted or the payload is
/// malformed; a missed deadline is a normal [`PollOutcome::TimedOut`].
pub async fn poll_until_stable<S, C>(
    source: &S,
    config: &PolicyConfiguration,
    clock: &C,
    state: &mut WaitState,
) -> Result<PollOutcome, InstrumentationError>
where
    S: TelemetrySource + ?Sized,
    C: Clock + ?Sized,
{
    let span = info_span!(
        "stability_wait",
        wait_id = %state.wait_id,
        strictness = %config.strictness(),
        timeout_ms = config.timeout().as_millis() as u64,
    );

    async {
        let start = clock.now();
        loop {
            let snapshot = fetch_with_retry(source).await?;
            let now = clock.now();
            let status = evaluate(&snapshot, now, config);
            state.polls += 1;
            state.elapsed = elapsed_between(start, now);

            if status.is_stable {
                state.blocking_factors.clear();
                state.last_status = Some(status.clone());
                info!(
                    polls = state.polls,
                    elapsed_ms = state.elapsed.as_millis() as u64,
                    "page stable"
                );
                return Ok(PollOutcome::Stable(status));
            }

            let blocking = status.blocking_names();
            if config.debug_mode() {
                debug!(poll = state.polls, ?blocking, "page not stable yet");
            } else {
                trace!(poll = state.polls, ?blocking, "page not stable yet");
            }

            state.timeline.push(TimelineEntry::from_status(&status));
            state.blocking_factors = blocking_factors(&status, &snapshot);
            state.last_status = Some(status);

            if state.elapsed >= config.timeout() {
                warn!(
                    polls = state.polls,
                    elapsed_ms = state.elapsed.as_millis() as u64,
                    ?blocking,
                    "stabilization deadline reached"
                );
                return Ok(PollOutcome::TimedOut(DiagnosticRecord::new(
                    config.clone(),
                    state.blocking_factors.clone(),
                    state.timeline.snapshot(),
                    now,
                )));
            }

            let remaining = config.timeout() - state.elapsed;
            clock.sleep(config.poll_interval().min(remaining)).await;
        }
    }
    .instrument(span)
    .await
}

fn timeout_error(record: DiagnosticRecord) -> StabilizationTimeout {
    let message = format!(
        "page did not stabilize within {}",
        humantime::format_duration(record.config.timeout())
    );
    StabilizationTimeout::new(message, record)
}

/// One-shot wait without keeping diagnostics around
pub async fn wait_for_stability<S, C>(
    source: &S,
    config: &PolicyConfiguration,
    clock: &C,
) -> Result<StabilityStatus, StabilityError>
where
    S: TelemetrySource + ?Sized,
    C: Clock + ?Sized,
{
    let mut state = WaitState::new();
    match poll_until_stable(source, config, clock, &mut state).await? {
        PollOutcome::Stable(status) => Ok(status),
        PollOutcome::TimedOut(record) => Err(timeout_error(record).into()),
    }
}

/// How the most recent wait ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitOutcome {
    Stable,
    TimedOut,
    Failed(String),
}

/// Diagnostics of the most recent wait, success or failure
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    pub wait_id: Uuid,
    pub outcome: WaitOutcome,
    pub last_status: Option<StabilityStatus>,
    pub timeline: Vec<TimelineEntry>,
    pub config: PolicyConfiguration,
    pub blocking_factors: BTreeMap<String, Value>,
    pub polls: u32,
    pub elapsed: Duration,
}

impl Diagnostics {
    fn from_state(state: WaitState, config: PolicyConfiguration, outcome: WaitOutcome) -> Self {
        Self {
            wait_id: state.wait_id,
            outcome,
            last_status: state.last_status,
            timeline: state.timeline.snapshot(),
            config,
            blocking_factors: state.blocking_factors,
            polls: state.polls,
            elapsed: state.elapsed,
        }
    }

    pub fn is_stable(&self) -> bool {
        self.outcome == WaitOutcome::Stable
    }

    /// Record of this wait, stamped with the last poll time
    pub fn record(&self) -> Option<DiagnosticRecord> {
        let captured_at = self.last_status.as_ref()?.timestamp;
        Some(DiagnosticRecord::new(
            self.config.clone(),
            self.blocking_factors.clone(),
            self.timeline.clone(),
            captured_at,
        ))
    }

    pub fn report(&self) -> Option<DiagnosticReport> {
        self.record().map(|record| DiagnosticReport::build(&record))
    }
}

/// Stability gate bound to one telemetry source
///
/// Keeps the diagnostics of its last wait so callers can inspect them after
/// success as well as after a timeout.
pub struct Stabilizer<S, C = TokioClock> {
    source: S,
    clock: C,
    config: PolicyConfiguration,
    last: Mutex<Option<Diagnostics>>,
}

impl<S: TelemetrySource> Stabilizer<S, TokioClock> {
    pub fn new(source: S, config: PolicyConfiguration) -> Self {
        Self::with_clock(source, config, TokioClock::new())
    }
}

impl<S: TelemetrySource, C: Clock> Stabilizer<S, C> {
    pub fn with_clock(source: S, config: PolicyConfiguration, clock: C) -> Self {
        Self {
            source,
            clock,
            config,
            last: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PolicyConfiguration {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Wait using the configured policy
    pub async fn wait_for_stability(&self) -> Result<StabilityStatus, StabilityError> {
        let config = self.config.clone();
        self.wait_with(&config).await
    }

    /// Wait with per-call overrides on top of the configured policy
    pub async fn wait_with_overrides(
        &self,
        overrides: ConfigOverrides,
    ) -> Result<StabilityStatus, StabilityError> {
        let config = self.config.with_overrides(overrides)?;
        self.wait_with(&config).await
    }

    /// Wait using an explicit policy
    pub async fn wait_with(
        &self,
        config: &PolicyConfiguration,
    ) -> Result<StabilityStatus, StabilityError> {
        let mut state = WaitState::new();
        let result = poll_until_stable(&self.source, config, &self.clock, &mut state).await;

        let (outcome, result) = match result {
            Ok(PollOutcome::Stable(status)) => (WaitOutcome::Stable, Ok(status)),
            Ok(PollOutcome::TimedOut(record)) => (
                WaitOutcome::TimedOut,
                Err(StabilityError::from(timeout_error(record))),
            ),
            Err(err) => (
                WaitOutcome::Failed(err.to_string()),
                Err(StabilityError::from(err)),
            ),
        };

        *self.last.lock() = Some(Diagnostics::from_state(state, config.clone(), outcome));
        result
    }

    /// Diagnostics of the last wait, `None` before any wait ran
    pub fn diagnostics(&self) -> Option<Diagnostics> {
        self.last.lock().clone()
    }

    pub fn require_diagnostics(&self) -> Result<Diagnostics, StabilityError> {
        self.diagnostics().ok_or(StabilityError::NotStabilized)
    }
}
