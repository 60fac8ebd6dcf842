//! Error types for the stability gate

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::diagnostics::{render_summary, DiagnosticRecord};
use crate::timeline::TimelineEntry;

/// Invalid configuration value or combination, raised at construction time only
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    /// A duration that must be strictly positive was zero
    #[error("{field} must be positive")]
    NotPositive { field: &'static str },

    /// A numeric field outside its allowed range
    #[error("{field} is out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },

    /// poll_interval must never exceed timeout
    #[error("poll_interval ({poll_interval:?}) must not exceed timeout ({timeout:?})")]
    PollIntervalExceedsTimeout {
        poll_interval: Duration,
        timeout: Duration,
    },

    /// Unknown strictness profile name
    #[error("unknown strictness '{0}' (expected strict, normal or relaxed)")]
    InvalidStrictness(String),

    /// Unknown preset name
    #[error("unknown preset '{0}' (expected default, strict, relaxed or ci)")]
    InvalidPreset(String),

    /// A raw value could not be parsed for a field
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Telemetry fetch failure
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InstrumentationError {
    /// Collector missing from the page (not yet injected, or wiped by navigation)
    #[error("instrumentation not ready: {0}")]
    NotReady(String),

    /// The collector script raised or the host could not run it
    #[error("instrumentation script failed: {0}")]
    ScriptFailed(String),

    /// The host reported a failure that repeating the call will not fix
    #[error("host failure: {0}")]
    HostFailed(String),

    /// Payload returned by the collector has an unusable shape
    #[error("malformed telemetry payload: {0}")]
    Malformed(String),

    /// Retry budget for a single poll tick exhausted
    #[error("telemetry fetch failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<InstrumentationError>,
    },
}

impl InstrumentationError {
    /// Transient failures are absorbed by the in-tick retry budget
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InstrumentationError::NotReady(_) | InstrumentationError::ScriptFailed(_)
        )
    }
}

/// Deadline elapsed without a stable verdict
///
/// Self-describing: everything needed to explain the failure is captured in the
/// attached [`DiagnosticRecord`], no further browser round-trip required.
#[derive(Debug, Clone, PartialEq)]
pub struct StabilizationTimeout {
    message: String,
    record: DiagnosticRecord,
}

impl StabilizationTimeout {
    pub fn new(message: impl Into<String>, record: DiagnosticRecord) -> Self {
        Self {
            message: message.into(),
            record,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timeout(&self) -> Duration {
        self.record.config.timeout()
    }

    pub fn blocking_factors(&self) -> &BTreeMap<String, Value> {
        &self.record.blocking_factors
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.record.timeline
    }

    pub fn record(&self) -> &DiagnosticRecord {
        &self.record
    }

    pub fn into_record(self) -> DiagnosticRecord {
        self.record
    }

    /// Ranked blocking factors with one remediation hint each
    pub fn diagnostic_summary(&self) -> String {
        render_summary(&self.record)
    }
}

impl fmt::Display for StabilizationTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n\n{}", self.message, self.diagnostic_summary())
    }
}

impl std::error::Error for StabilizationTimeout {}

/// Top-level error surfaced by the gate
#[derive(Debug, Error, Clone)]
pub enum StabilityError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Instrumentation(#[from] InstrumentationError),

    #[error(transparent)]
    Timeout(#[from] StabilizationTimeout),

    /// Diagnostics requested before any wait has run
    #[error("no stabilization has run yet; diagnostics are unavailable")]
    NotStabilized,
}

impl StabilityError {
    /// Check if the caller may reasonably retry the whole wait
    pub fn is_retryable(&self) -> bool {
        match self {
            StabilityError::Timeout(_) => true,
            StabilityError::Instrumentation(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Get error severity (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            StabilityError::Configuration(_) => 3,
            StabilityError::Instrumentation(_) => 2,
            StabilityError::Timeout(_) => 1,
            StabilityError::NotStabilized => 0,
        }
    }

    pub fn as_timeout(&self) -> Option<&StabilizationTimeout> {
        match self {
            StabilityError::Timeout(timeout) => Some(timeout),
            _ => None,
        }
    }
}
