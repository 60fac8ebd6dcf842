//! Timeout diagnostics: captured record plus structured and text rendering

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::PolicyConfiguration;
use crate::signals::SignalType;
use crate::timeline::{TimelineEntry, TIMELINE_CAPACITY};

/// Timeline entries shown in the text report
pub const REPORT_TIMELINE_TAIL: usize = 10;

const REQUEST_DETAIL_LIMIT: usize = 5;
const RULE: &str = "============================================================";

/// Everything captured when a wait misses its deadline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    #[serde(default)]
    pub config: PolicyConfiguration,
    #[serde(default)]
    pub blocking_factors: BTreeMap<String, Value>,
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
    pub captured_at: DateTime<Utc>,
}

impl DiagnosticRecord {
    pub fn new(
        config: PolicyConfiguration,
        blocking_factors: BTreeMap<String, Value>,
        mut timeline: Vec<TimelineEntry>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        if timeline.len() > TIMELINE_CAPACITY {
            timeline.drain(..timeline.len() - TIMELINE_CAPACITY);
        }
        Self {
            config,
            blocking_factors,
            timeline,
            captured_at,
        }
    }

    /// Blocking factors, most severe first, each with a remediation hint
    pub fn ranked_factors(&self) -> Vec<FactorReport> {
        let mut factors: Vec<FactorReport> = self
            .blocking_factors
            .iter()
            .filter(|(key, _)| key.as_str() != "pending_request_details")
            .map(|(key, value)| describe_factor(self, key, value))
            .collect();
        factors.sort_by(|a, b| {
            let rank_a = a.signal.map(|s| s.rank()).unwrap_or(usize::MAX);
            let rank_b = b.signal.map(|s| s.rank()).unwrap_or(usize::MAX);
            rank_a.cmp(&rank_b).then_with(|| a.key.cmp(&b.key))
        });
        factors
    }

    pub fn report(&self) -> DiagnosticReport {
        DiagnosticReport::build(self)
    }
}

/// One rendered blocking factor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactorReport {
    pub key: String,
    pub signal: Option<SignalType>,
    pub headline: String,
    pub details: Vec<String>,
    pub suggestion: String,
}

fn describe_factor(record: &DiagnosticRecord, key: &str, value: &Value) -> FactorReport {
    let config = &record.config;
    let signal = SignalType::from_factor_key(key);
    let (headline, details, suggestion) = match signal {
        Some(SignalType::NetworkRequests) => (
            format!(
                "NETWORK: {} request(s) still pending (threshold {})",
                display_value(value),
                config.network_idle_threshold()
            ),
            request_details(record),
            "raise network_idle_threshold or investigate the endpoint",
        ),
        Some(SignalType::DomMutations) => (
            format!(
                "DOM: last mutation {}ms ago, needs {}ms of quiet",
                display_value(value),
                config.dom_settle_time().as_millis()
            ),
            Vec::new(),
            "the DOM is still changing; raise dom_settle_time or find the element that keeps re-rendering",
        ),
        Some(SignalType::CssAnimations) => (
            format!("ANIMATIONS: {} active animation(s)", display_value(value)),
            Vec::new(),
            "disable animation_detection or switch to relaxed strictness",
        ),
        Some(SignalType::LayoutShift) => (
            "LAYOUT: Elements are still changing position or size".to_string(),
            Vec::new(),
            "elements are still moving; check CSS containment",
        ),
        Some(SignalType::MutationRate) => (
            format!(
                "MUTATION RATE: {} mutations/s (threshold {}/s)",
                display_value(value),
                config.mutation_rate_threshold()
            ),
            Vec::new(),
            "raise mutation_rate_threshold or use normal strictness",
        ),
        None => (
            format!("unknown factor '{}': {}", key, display_value(value)),
            Vec::new(),
            "unknown factor; inspect the timeline and raw telemetry",
        ),
    };

    FactorReport {
        key: key.to_string(),
        signal,
        headline,
        details,
        suggestion: suggestion.to_string(),
    }
}

fn request_details(record: &DiagnosticRecord) -> Vec<String> {
    let Some(Value::Array(items)) = record.blocking_factors.get("pending_request_details") else {
        return Vec::new();
    };

    let mut lines: Vec<String> = items
        .iter()
        .take(REQUEST_DETAIL_LIMIT)
        .map(|item| {
            let url = item
                .get("url")
                .and_then(Value::as_str)
                .or_else(|| item.as_str())
                .unwrap_or("<unknown url>");
            match item.get("method").and_then(Value::as_str) {
                Some(method) if !method.is_empty() => format!("{} {}", method, url),
                _ => url.to_string(),
            }
        })
        .collect();
    if items.len() > REQUEST_DETAIL_LIMIT {
        lines.push(format!("... and {} more", items.len() - REQUEST_DETAIL_LIMIT));
    }
    lines
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "unknown".to_string(),
        other => other.to_string(),
    }
}

fn factor_lines(factors: &[FactorReport]) -> Vec<String> {
    let mut lines = vec!["BLOCKING FACTORS AND SUGGESTIONS".to_string()];
    if factors.is_empty() {
        lines.push("  none captured".to_string());
        lines.push("  -> raise timeout if the page is simply slow to settle".to_string());
        return lines;
    }
    for (i, factor) in factors.iter().enumerate() {
        lines.push(format!("  {}. {}", i + 1, factor.headline));
        for detail in &factor.details {
            lines.push(format!("       {}", detail));
        }
        lines.push(format!("     -> {}", factor.suggestion));
    }
    lines
}

fn config_lines(config: &PolicyConfiguration) -> Vec<String> {
    vec![
        "CONFIGURATION".to_string(),
        format!("  Timeout: {}", humantime::format_duration(config.timeout())),
        format!(
            "  Poll interval: {}",
            humantime::format_duration(config.poll_interval())
        ),
        format!("  Strictness: {}", config.strictness()),
        format!(
            "  Network idle threshold: {}",
            config.network_idle_threshold()
        ),
        format!(
            "  DOM settle time: {}",
            humantime::format_duration(config.dom_settle_time())
        ),
        format!(
            "  Animation detection: {}",
            on_off(config.animation_detection())
        ),
        format!("  Layout stability: {}", on_off(config.layout_stability())),
        format!(
            "  Mutation rate threshold: {}/s",
            config.mutation_rate_threshold()
        ),
    ]
}

fn timeline_lines(timeline: &[TimelineEntry]) -> Vec<String> {
    if timeline.is_empty() {
        return vec!["RECENT EVENTS".to_string(), "  none recorded".to_string()];
    }

    let skip = timeline.len().saturating_sub(REPORT_TIMELINE_TAIL);
    let mut lines = vec![format!("RECENT EVENTS (last {})", timeline.len() - skip)];
    if skip > 0 {
        lines.push(format!("  ... {} earlier event(s) omitted", skip));
    }
    for entry in &timeline[skip..] {
        let blocking = if entry.blocking.is_empty() {
            "(none)".to_string()
        } else {
            entry.blocking.join(", ")
        };
        lines.push(format!(
            "  {}  {}",
            entry.timestamp.format("%H:%M:%S%.3f"),
            blocking
        ));
    }
    lines
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

/// Compact failure explanation attached to a timeout
pub fn render_summary(record: &DiagnosticRecord) -> String {
    let mut lines = vec![format!(
        "STABILIZATION TIMEOUT after {} (strictness {})",
        humantime::format_duration(record.config.timeout()),
        record.config.strictness()
    )];
    lines.extend(factor_lines(&record.ranked_factors()));
    lines.join("\n")
}

/// Rendered diagnostics: canonical structured data and a text report
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticReport {
    pub structured: Value,
    pub text: String,
}

impl DiagnosticReport {
    pub fn build(record: &DiagnosticRecord) -> Self {
        let factors = record.ranked_factors();
        Self {
            structured: structured(record, &factors),
            text: text(record, &factors),
        }
    }

    /// Pretty JSON of the structured form; identical records give identical bytes
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.structured)
    }

    pub fn print(&self) {
        println!("{}", self.text);
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn structured(record: &DiagnosticRecord, factors: &[FactorReport]) -> Value {
    json!({
        "captured_at": record.captured_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        "config": record.config,
        "blocking_factors": record.blocking_factors,
        "ranked_factors": factors,
        "timeline": record.timeline,
    })
}

fn text(record: &DiagnosticRecord, factors: &[FactorReport]) -> String {
    let mut lines = vec![
        RULE.to_string(),
        "QUIESCE STABILITY REPORT".to_string(),
        RULE.to_string(),
        format!(
            "Captured at: {}",
            record.captured_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        ),
        String::new(),
    ];
    lines.extend(config_lines(&record.config));
    lines.push(String::new());
    lines.extend(factor_lines(factors));
    lines.push(String::new());
    lines.extend(timeline_lines(&record.timeline));
    lines.push(RULE.to_string());
    lines.join("\n")
}
