//! Signal evaluation: (policy, snapshot, now) -> verdict
//!
//! Pure and deterministic. Time enters only through `now`; every duration is
//! compared in milliseconds, the unit the page reports mutation times in.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::config::PolicyConfiguration;
use crate::signals::{Signal, SignalState, SignalType, SignalValue, StabilityStatus};
use crate::telemetry::TelemetrySnapshot;

/// Evaluate a snapshot against the policy at instant `now`
pub fn evaluate(
    snapshot: &TelemetrySnapshot,
    now: DateTime<Utc>,
    config: &PolicyConfiguration,
) -> StabilityStatus {
    let signals = SignalType::ALL
        .into_iter()
        .map(|signal_type| evaluate_signal(signal_type, snapshot, now, config))
        .collect();
    StabilityStatus::new(signals, now)
}

fn evaluate_signal(
    signal_type: SignalType,
    snapshot: &TelemetrySnapshot,
    now: DateTime<Utc>,
    config: &PolicyConfiguration,
) -> Signal {
    let (value, threshold, settled) = match signal_type {
        SignalType::NetworkRequests => {
            let pending = snapshot.pending_requests;
            let limit = config.network_idle_threshold();
            (
                SignalValue::Count(pending as u64),
                SignalValue::Count(limit as u64),
                pending <= limit,
            )
        }
        SignalType::DomMutations => {
            let quiet_ms = mutation_age_ms(snapshot, now);
            let settle_ms = config.dom_settle_time().as_micros() as f64 / 1000.0;
            (
                SignalValue::Millis(quiet_ms),
                SignalValue::Millis(settle_ms),
                quiet_ms >= settle_ms,
            )
        }
        SignalType::CssAnimations => {
            let active = snapshot.active_animations;
            (
                SignalValue::Count(active as u64),
                SignalValue::Count(0),
                active == 0,
            )
        }
        SignalType::LayoutShift => {
            let shifting = snapshot.layout_shifting;
            (
                SignalValue::Flag(shifting),
                SignalValue::Flag(false),
                !shifting,
            )
        }
        SignalType::MutationRate => {
            let rate = snapshot.mutation_rate;
            let limit = config.mutation_rate_threshold();
            (
                SignalValue::PerSecond(rate),
                SignalValue::PerSecond(limit),
                rate <= limit,
            )
        }
    };

    Signal {
        signal_type,
        state: if settled {
            SignalState::Stable
        } else {
            SignalState::Unstable
        },
        value,
        threshold,
        is_mandatory: config.is_mandatory(signal_type),
    }
}

/// Milliseconds since the last DOM mutation, clamped at zero for clock skew
fn mutation_age_ms(snapshot: &TelemetrySnapshot, now: DateTime<Utc>) -> f64 {
    let now_ms = now.timestamp_micros() as f64 / 1000.0;
    (now_ms - snapshot.last_mutation_time).max(0.0)
}

/// Observed values of the blocking signals, keyed by factor name
///
/// Network blocking also carries the pending request details so a report can
/// name the endpoints.
pub fn blocking_factors(
    status: &StabilityStatus,
    snapshot: &TelemetrySnapshot,
) -> BTreeMap<String, Value> {
    let mut factors = BTreeMap::new();
    for signal in status.blocking_signals() {
        factors.insert(
            signal.signal_type.factor_key().to_string(),
            signal.value.to_json(),
        );
        if signal.signal_type == SignalType::NetworkRequests
            && !snapshot.pending_request_details.is_empty()
        {
            factors.insert(
                "pending_request_details".to_string(),
                json!(snapshot.pending_request_details),
            );
        }
    }
    factors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigOverrides, Strictness};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn ms_ago(ms: f64) -> f64 {
        now().timestamp_millis() as f64 - ms
    }

    fn settled_snapshot() -> TelemetrySnapshot {
        TelemetrySnapshot {
            last_mutation_time: ms_ago(200.0),
            ..TelemetrySnapshot::default()
        }
    }

    fn config(overrides: ConfigOverrides) -> PolicyConfiguration {
        overrides.build().unwrap()
    }

    fn blocking(status: &StabilityStatus) -> Vec<SignalType> {
        status
            .blocking_signals()
            .iter()
            .map(|s| s.signal_type)
            .collect()
    }

    #[test]
    fn test_scenario_a_settled_page_is_stable() {
        let cfg = config(
            ConfigOverrides::new()
                .network_idle_threshold(0)
                .dom_settle_time_secs(0.1),
        );
        let status = evaluate(&settled_snapshot(), now(), &cfg);
        assert!(status.is_stable);
        assert!(status.blocking_signals().is_empty());
    }

    #[test]
    fn test_scenario_b_pending_requests_block() {
        let cfg = config(ConfigOverrides::new().network_idle_threshold(0));
        let snapshot = TelemetrySnapshot {
            pending_requests: 2,
            ..settled_snapshot()
        };
        let status = evaluate(&snapshot, now(), &cfg);
        assert!(!status.is_stable);
        assert_eq!(blocking(&status), vec![SignalType::NetworkRequests]);
    }

    #[test]
    fn test_scenario_c_threshold_is_inclusive() {
        let cfg = config(ConfigOverrides::new().network_idle_threshold(2));
        let snapshot = TelemetrySnapshot {
            pending_requests: 2,
            ..settled_snapshot()
        };
        assert!(evaluate(&snapshot, now(), &cfg).is_stable);
    }

    #[test]
    fn test_scenario_d_recent_mutation_blocks() {
        let cfg = config(ConfigOverrides::new().dom_settle_time_secs(0.1));
        let snapshot = TelemetrySnapshot {
            last_mutation_time: ms_ago(50.0),
            ..TelemetrySnapshot::default()
        };
        let status = evaluate(&snapshot, now(), &cfg);
        assert!(!status.is_stable);
        assert_eq!(blocking(&status), vec![SignalType::DomMutations]);

        let dom = status.signal(SignalType::DomMutations).unwrap();
        assert_eq!(dom.value, SignalValue::Millis(50.0));
        assert_eq!(dom.threshold, SignalValue::Millis(100.0));
    }

    #[test]
    fn test_scenario_e_relaxed_ignores_animations() {
        let cfg = config(ConfigOverrides::new().strictness(Strictness::Relaxed));
        let snapshot = TelemetrySnapshot {
            active_animations: 5,
            ..settled_snapshot()
        };
        let status = evaluate(&snapshot, now(), &cfg);
        assert!(status.is_stable);

        // still recorded for diagnostics
        let animations = status.signal(SignalType::CssAnimations).unwrap();
        assert_eq!(animations.state, SignalState::Unstable);
        assert!(!animations.is_mandatory);
    }

    #[test]
    fn test_strict_requires_animations_settled() {
        let snapshot = TelemetrySnapshot {
            active_animations: 1,
            ..settled_snapshot()
        };
        let strict = evaluate(&snapshot, now(), &PolicyConfiguration::strict());
        assert!(!strict.is_stable);
        assert_eq!(blocking(&strict), vec![SignalType::CssAnimations]);

        let relaxed = evaluate(&snapshot, now(), &PolicyConfiguration::relaxed());
        assert!(relaxed.is_stable);
    }

    #[test]
    fn test_strict_layout_and_mutation_rate() {
        let snapshot = TelemetrySnapshot {
            layout_shifting: true,
            mutation_rate: 50.0,
            ..settled_snapshot()
        };
        let strict = evaluate(&snapshot, now(), &PolicyConfiguration::strict());
        assert_eq!(
            blocking(&strict),
            vec![SignalType::LayoutShift, SignalType::MutationRate]
        );

        let normal = evaluate(&snapshot, now(), &PolicyConfiguration::default());
        assert!(normal.is_stable);
    }

    #[test]
    fn test_output_order_is_fixed() {
        let status = evaluate(&settled_snapshot(), now(), &PolicyConfiguration::default());
        let order: Vec<SignalType> = status.signals.iter().map(|s| s.signal_type).collect();
        assert_eq!(order, SignalType::ALL.to_vec());
    }

    #[test]
    fn test_evaluate_is_pure() {
        let snapshot = TelemetrySnapshot {
            pending_requests: 3,
            active_animations: 2,
            mutation_rate: 12.5,
            last_mutation_time: ms_ago(10.0),
            ..TelemetrySnapshot::default()
        };
        let cfg = PolicyConfiguration::strict();
        assert_eq!(
            evaluate(&snapshot, now(), &cfg),
            evaluate(&snapshot, now(), &cfg)
        );
    }

    #[test]
    fn test_raising_network_threshold_is_monotonic() {
        let snapshot = TelemetrySnapshot {
            pending_requests: 4,
            ..settled_snapshot()
        };
        let mut was_stable = false;
        for threshold in 0..8 {
            let cfg = config(ConfigOverrides::new().network_idle_threshold(threshold));
            let stable = evaluate(&snapshot, now(), &cfg).is_stable;
            assert!(!(was_stable && !stable), "regressed at {}", threshold);
            assert_eq!(stable, threshold >= 4);
            was_stable = stable;
        }
    }

    #[test]
    fn test_stable_whenever_mandatory_signals_hold() {
        // every combination of optional-signal noise under normal strictness
        let cfg = PolicyConfiguration::default();
        for animations in [0u32, 3] {
            for shifting in [false, true] {
                for rate in [0.0, 500.0] {
                    let snapshot = TelemetrySnapshot {
                        active_animations: animations,
                        layout_shifting: shifting,
                        mutation_rate: rate,
                        ..settled_snapshot()
                    };
                    assert!(evaluate(&snapshot, now(), &cfg).is_stable);
                }
            }
        }
    }

    #[test]
    fn test_future_mutation_time_is_clamped() {
        let cfg = config(ConfigOverrides::new().dom_settle_time_secs(0.0));
        let snapshot = TelemetrySnapshot {
            last_mutation_time: ms_ago(-500.0),
            ..TelemetrySnapshot::default()
        };
        let status = evaluate(&snapshot, now(), &cfg);
        let dom = status.signal(SignalType::DomMutations).unwrap();
        assert_eq!(dom.value, SignalValue::Millis(0.0));
        assert!(status.is_stable);
    }

    #[test]
    fn test_blocking_factors_include_request_details() {
        let snapshot = TelemetrySnapshot {
            pending_requests: 1,
            pending_request_details: vec![crate::telemetry::PendingRequest {
                url: "https://api.test/slow".into(),
                method: "GET".into(),
                started_at: 0.0,
            }],
            last_mutation_time: ms_ago(20.0),
            ..TelemetrySnapshot::default()
        };
        let status = evaluate(&snapshot, now(), &PolicyConfiguration::default());
        let factors = blocking_factors(&status, &snapshot);

        assert_eq!(factors["pending_requests"], json!(1));
        assert_eq!(factors["last_mutation_ms_ago"], json!(20));
        assert_eq!(
            factors["pending_request_details"][0]["url"],
            json!("https://api.test/slow")
        );
        assert!(!factors.contains_key("active_animations"));
    }
}
