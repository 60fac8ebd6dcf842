//! Telemetry snapshot and boundary parsing of the collector payload

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::InstrumentationError;

/// An in-flight request as reported by the collector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub url: String,
    #[serde(default)]
    pub method: String,
    /// Epoch milliseconds when the request was issued, 0 if unknown
    #[serde(default)]
    pub started_at: f64,
}

/// One point-in-time read of browser state
///
/// Always built through [`TelemetrySnapshot::from_payload`] when the data comes
/// from a page, so the evaluator never sees an unvalidated shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub pending_requests: u32,
    pub pending_request_details: Vec<PendingRequest>,
    /// Epoch milliseconds of the last observed DOM mutation, 0 if none
    pub last_mutation_time: f64,
    /// Mutations per second over the collector's sampling window
    pub mutation_rate: f64,
    pub active_animations: u32,
    pub layout_shifting: bool,
}

impl TelemetrySnapshot {
    /// Parse the loosely-typed collector payload
    ///
    /// Missing, null or mistyped fields fall back to their quiet default.
    /// `null` means the collector is absent; any other non-object is malformed.
    pub fn from_payload(payload: &Value) -> Result<Self, InstrumentationError> {
        let obj = match payload {
            Value::Object(obj) => obj,
            Value::Null => {
                return Err(InstrumentationError::NotReady(
                    "collector returned no status".to_string(),
                ))
            }
            other => {
                return Err(InstrumentationError::Malformed(format!(
                    "expected an object, got {}",
                    type_name(other)
                )))
            }
        };

        let pending_request_details = read_details(obj);
        let pending_requests = match obj.get("pending_requests") {
            Some(value) => count(value),
            None => pending_request_details.len() as u32,
        };

        Ok(Self {
            pending_requests,
            pending_request_details,
            last_mutation_time: number(obj.get("last_mutation_time")),
            mutation_rate: number(obj.get("mutation_rate")),
            active_animations: obj.get("active_animations").map(count).unwrap_or(0),
            layout_shifting: obj
                .get("layout_shifting")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

fn read_details(obj: &Map<String, Value>) -> Vec<PendingRequest> {
    let Some(Value::Array(items)) = obj.get("pending_request_details") else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(url) => Some(PendingRequest {
                url: url.clone(),
                ..PendingRequest::default()
            }),
            Value::Object(entry) => Some(PendingRequest {
                url: entry
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                method: entry
                    .get("method")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                started_at: number(entry.get("started_at")),
            }),
            _ => None,
        })
        .collect()
}

fn count(value: &Value) -> u32 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f > 0.0).map(|f| f as u64))
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(0),
        _ => 0,
    }
}

fn number(value: Option<&Value>) -> f64 {
    value
        .and_then(Value::as_f64)
        .filter(|f| f.is_finite() && *f >= 0.0)
        .unwrap_or(0.0)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_payload() {
        let snapshot = TelemetrySnapshot::from_payload(&json!({
            "pending_requests": 2,
            "pending_request_details": [
                { "url": "https://api.test/items", "method": "GET", "started_at": 1000.0 },
                "https://api.test/track"
            ],
            "last_mutation_time": 1_700_000_000_000.0,
            "mutation_rate": 4.5,
            "active_animations": 1,
            "layout_shifting": true
        }))
        .unwrap();

        assert_eq!(snapshot.pending_requests, 2);
        assert_eq!(snapshot.pending_request_details.len(), 2);
        assert_eq!(snapshot.pending_request_details[0].method, "GET");
        assert_eq!(snapshot.pending_request_details[1].url, "https://api.test/track");
        assert_eq!(snapshot.last_mutation_time, 1_700_000_000_000.0);
        assert_eq!(snapshot.mutation_rate, 4.5);
        assert_eq!(snapshot.active_animations, 1);
        assert!(snapshot.layout_shifting);
    }

    #[test]
    fn test_missing_fields_default_quiet() {
        let snapshot = TelemetrySnapshot::from_payload(&json!({})).unwrap();
        assert_eq!(snapshot, TelemetrySnapshot::default());
    }

    #[test]
    fn test_mistyped_fields_are_sanitised() {
        let snapshot = TelemetrySnapshot::from_payload(&json!({
            "pending_requests": -3,
            "last_mutation_time": "yesterday",
            "mutation_rate": -1,
            "active_animations": 2.0,
            "layout_shifting": "yes",
            "pending_request_details": [42, null]
        }))
        .unwrap();

        assert_eq!(snapshot.pending_requests, 0);
        assert_eq!(snapshot.last_mutation_time, 0.0);
        assert_eq!(snapshot.mutation_rate, 0.0);
        assert_eq!(snapshot.active_animations, 2);
        assert!(!snapshot.layout_shifting);
        assert!(snapshot.pending_request_details.is_empty());
    }

    #[test]
    fn test_pending_count_falls_back_to_details() {
        let snapshot = TelemetrySnapshot::from_payload(&json!({
            "pending_request_details": ["a", "b", "c"]
        }))
        .unwrap();
        assert_eq!(snapshot.pending_requests, 3);
    }

    #[test]
    fn test_non_object_payloads() {
        let err = TelemetrySnapshot::from_payload(&Value::Null).unwrap_err();
        assert!(matches!(err, InstrumentationError::NotReady(_)));
        assert!(err.is_retryable());

        let err = TelemetrySnapshot::from_payload(&json!([1, 2])).unwrap_err();
        assert_eq!(
            err,
            InstrumentationError::Malformed("expected an object, got array".to_string())
        );
    }
}
