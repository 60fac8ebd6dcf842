//! Signal model: one verdict per telemetry category

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Telemetry category contributing to the stability verdict
///
/// Variant order is the fixed evaluation and reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalType {
    NetworkRequests,
    DomMutations,
    CssAnimations,
    LayoutShift,
    MutationRate,
}

impl SignalType {
    pub const ALL: [SignalType; 5] = [
        SignalType::NetworkRequests,
        SignalType::DomMutations,
        SignalType::CssAnimations,
        SignalType::LayoutShift,
        SignalType::MutationRate,
    ];

    /// Get signal name
    pub fn name(&self) -> &'static str {
        match self {
            SignalType::NetworkRequests => "network-requests",
            SignalType::DomMutations => "dom-mutations",
            SignalType::CssAnimations => "css-animations",
            SignalType::LayoutShift => "layout-shift",
            SignalType::MutationRate => "mutation-rate",
        }
    }

    /// Key under which a blocking value is recorded in diagnostics
    pub fn factor_key(&self) -> &'static str {
        match self {
            SignalType::NetworkRequests => "pending_requests",
            SignalType::DomMutations => "last_mutation_ms_ago",
            SignalType::CssAnimations => "active_animations",
            SignalType::LayoutShift => "layout_shifting",
            SignalType::MutationRate => "mutation_rate",
        }
    }

    pub fn from_factor_key(key: &str) -> Option<SignalType> {
        SignalType::ALL
            .into_iter()
            .find(|signal| signal.factor_key() == key)
    }

    /// Position in the fixed order; lower ranks are reported first
    pub fn rank(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalState {
    Stable,
    Unstable,
}

/// Observed value or threshold of a signal, in the unit the evaluator uses
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SignalValue {
    Count(u64),
    Millis(f64),
    PerSecond(f64),
    Flag(bool),
}

impl SignalValue {
    /// Plain JSON form used in blocking-factor maps
    pub fn to_json(&self) -> Value {
        match self {
            SignalValue::Count(count) => json!(count),
            SignalValue::Millis(ms) => json!(ms.round() as u64),
            SignalValue::PerSecond(rate) => json!(rate),
            SignalValue::Flag(flag) => json!(flag),
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Count(count) => write!(f, "{}", count),
            SignalValue::Millis(ms) => write!(f, "{:.0}ms", ms),
            SignalValue::PerSecond(rate) => write!(f, "{:.1}/s", rate),
            SignalValue::Flag(flag) => write!(f, "{}", flag),
        }
    }
}

/// One evaluated signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub signal_type: SignalType,
    pub state: SignalState,
    pub value: SignalValue,
    pub threshold: SignalValue,
    pub is_mandatory: bool,
}

impl Signal {
    pub fn is_stable(&self) -> bool {
        self.state == SignalState::Stable
    }

    /// Mandatory and currently unstable
    pub fn is_blocking(&self) -> bool {
        self.is_mandatory && self.state == SignalState::Unstable
    }
}

/// Verdict of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityStatus {
    pub is_stable: bool,
    pub signals: Vec<Signal>,
    pub timestamp: DateTime<Utc>,
}

impl StabilityStatus {
    /// Build a status, deriving `is_stable` from the blocking signals
    pub fn new(signals: Vec<Signal>, timestamp: DateTime<Utc>) -> Self {
        let is_stable = !signals.iter().any(Signal::is_blocking);
        Self {
            is_stable,
            signals,
            timestamp,
        }
    }

    pub fn blocking_signals(&self) -> Vec<&Signal> {
        self.signals.iter().filter(|s| s.is_blocking()).collect()
    }

    pub fn blocking_names(&self) -> Vec<String> {
        self.signals
            .iter()
            .filter(|s| s.is_blocking())
            .map(|s| s.signal_type.name().to_string())
            .collect()
    }

    pub fn signal(&self, signal_type: SignalType) -> Option<&Signal> {
        self.signals.iter().find(|s| s.signal_type == signal_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn signal(signal_type: SignalType, state: SignalState, is_mandatory: bool) -> Signal {
        Signal {
            signal_type,
            state,
            value: SignalValue::Count(1),
            threshold: SignalValue::Count(0),
            is_mandatory,
        }
    }

    #[test]
    fn test_signal_blocking_rules() {
        let stable = signal(SignalType::NetworkRequests, SignalState::Stable, true);
        assert!(stable.is_stable());
        assert!(!stable.is_blocking());

        let blocking = signal(SignalType::NetworkRequests, SignalState::Unstable, true);
        assert!(!blocking.is_stable());
        assert!(blocking.is_blocking());

        let optional = signal(SignalType::CssAnimations, SignalState::Unstable, false);
        assert!(!optional.is_stable());
        assert!(!optional.is_blocking());
    }

    #[test]
    fn test_status_blocking_signals() {
        let status = StabilityStatus::new(
            vec![
                signal(SignalType::NetworkRequests, SignalState::Unstable, true),
                signal(SignalType::DomMutations, SignalState::Stable, true),
                signal(SignalType::CssAnimations, SignalState::Unstable, false),
            ],
            Utc.timestamp_millis_opt(12_345).unwrap(),
        );

        assert!(!status.is_stable);
        let blocking = status.blocking_signals();
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].signal_type, SignalType::NetworkRequests);
        assert_eq!(status.blocking_names(), vec!["network-requests".to_string()]);
        assert!(status.signal(SignalType::CssAnimations).is_some());
        assert!(status.signal(SignalType::LayoutShift).is_none());
    }

    #[test]
    fn test_factor_keys_round_trip() {
        for signal in SignalType::ALL {
            assert_eq!(SignalType::from_factor_key(signal.factor_key()), Some(signal));
        }
        assert_eq!(SignalType::from_factor_key("pending_request_details"), None);
        assert!(SignalType::NetworkRequests.rank() < SignalType::MutationRate.rank());
    }

    #[test]
    fn test_signal_value_json() {
        assert_eq!(SignalValue::Count(3).to_json(), json!(3));
        assert_eq!(SignalValue::Millis(49.6).to_json(), json!(50));
        assert_eq!(SignalValue::Flag(true).to_json(), json!(true));
        assert_eq!(SignalValue::Millis(120.0).to_string(), "120ms");
    }
}
