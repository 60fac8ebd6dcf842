//! Policy configuration: thresholds plus a named strictness profile
//!
//! [`PolicyConfiguration`] is immutable once built. Every construction path,
//! including deserialization, goes through [`ConfigOverrides`] and is validated
//! eagerly, so an invalid policy never reaches a wait.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::errors::ConfigurationError;
use crate::signals::SignalType;

/// Timeouts above this are accepted but logged as suspicious
pub const HIGH_TIMEOUT_WARNING: Duration = Duration::from_secs(60);

/// Named strictness profile selecting which signal categories may block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Strictness {
    /// Every signal category blocks
    Strict,

    /// Network and DOM block; animations, layout and mutation rate are informational
    #[default]
    Normal,

    /// Only network activity blocks
    Relaxed,
}

impl Strictness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strictness::Strict => "strict",
            Strictness::Normal => "normal",
            Strictness::Relaxed => "relaxed",
        }
    }

    /// Whether this profile allows `signal` to block stability at all
    pub fn permits_blocking(&self, signal: SignalType) -> bool {
        match (self, signal) {
            (_, SignalType::NetworkRequests) => true,
            (Strictness::Strict, _) => true,
            (Strictness::Normal, SignalType::DomMutations) => true,
            (Strictness::Normal, _) | (Strictness::Relaxed, _) => false,
        }
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strictness {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Strictness::Strict),
            "normal" => Ok(Strictness::Normal),
            "relaxed" => Ok(Strictness::Relaxed),
            _ => Err(ConfigurationError::InvalidStrictness(s.to_string())),
        }
    }
}

impl Serialize for Strictness {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Strictness {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Named configuration bundles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    #[default]
    Default,
    Strict,
    Relaxed,
    Ci,
}

impl Preset {
    pub fn config(&self) -> PolicyConfiguration {
        match self {
            Preset::Default => PolicyConfiguration::default(),
            Preset::Strict => PolicyConfiguration::strict(),
            Preset::Relaxed => PolicyConfiguration::relaxed(),
            Preset::Ci => PolicyConfiguration::ci(),
        }
    }
}

impl FromStr for Preset {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" | "normal" => Ok(Preset::Default),
            "strict" => Ok(Preset::Strict),
            "relaxed" => Ok(Preset::Relaxed),
            "ci" => Ok(Preset::Ci),
            _ => Err(ConfigurationError::InvalidPreset(s.to_string())),
        }
    }
}

/// Immutable stability policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConfigOverrides", into = "ConfigOverrides")]
pub struct PolicyConfiguration {
    timeout: Duration,
    poll_interval: Duration,
    dom_settle_time: Duration,
    network_idle_threshold: u32,
    animation_detection: bool,
    layout_stability: bool,
    strictness: Strictness,
    mutation_rate_threshold: f64,
    debug_mode: bool,
}

impl Default for PolicyConfiguration {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
            dom_settle_time: Duration::from_millis(100),
            network_idle_threshold: 0,
            animation_detection: true,
            layout_stability: true,
            strictness: Strictness::Normal,
            mutation_rate_threshold: 10.0,
            debug_mode: false,
        }
    }
}

impl PolicyConfiguration {
    /// Build from the defaults plus `overrides`, validating every invariant
    pub fn new(overrides: ConfigOverrides) -> Result<Self, ConfigurationError> {
        Self::default().with_overrides(overrides)
    }

    /// Start an override set; finish with [`ConfigOverrides::build`]
    pub fn builder() -> ConfigOverrides {
        ConfigOverrides::default()
    }

    /// Wait for everything: 5s deadline, all signals mandatory
    pub fn strict() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            strictness: Strictness::Strict,
            animation_detection: true,
            layout_stability: true,
            ..Self::default()
        }
    }

    /// Tolerate background traffic and ignore animations and layout
    pub fn relaxed() -> Self {
        Self {
            strictness: Strictness::Relaxed,
            network_idle_threshold: 2,
            animation_detection: false,
            layout_stability: false,
            ..Self::default()
        }
    }

    /// Longer deadline and verbose per-poll logging for CI runs
    pub fn ci() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            debug_mode: true,
            strictness: Strictness::Normal,
            ..Self::default()
        }
    }

    /// Copy with overrides applied; `self` is never modified
    pub fn with_overrides(&self, overrides: ConfigOverrides) -> Result<Self, ConfigurationError> {
        let mut next = self.clone();

        if let Some(secs) = overrides.timeout {
            next.timeout = positive_duration("timeout", secs)?;
        }
        if let Some(secs) = overrides.poll_interval {
            next.poll_interval = positive_duration("poll_interval", secs)?;
        }
        if let Some(secs) = overrides.dom_settle_time {
            next.dom_settle_time = non_negative_duration("dom_settle_time", secs)?;
        }
        if let Some(threshold) = overrides.network_idle_threshold {
            next.network_idle_threshold = threshold;
        }
        if let Some(flag) = overrides.animation_detection {
            next.animation_detection = flag;
        }
        if let Some(flag) = overrides.layout_stability {
            next.layout_stability = flag;
        }
        if let Some(strictness) = overrides.strictness {
            next.strictness = strictness;
        }
        if let Some(rate) = overrides.mutation_rate_threshold {
            next.mutation_rate_threshold = rate;
        }
        if let Some(flag) = overrides.debug_mode {
            next.debug_mode = flag;
        }

        next.validate()?;
        if next.timeout > HIGH_TIMEOUT_WARNING {
            warn!(
                timeout_s = next.timeout.as_secs_f64(),
                "timeout is very high; a page that needs this long to settle usually hides a real problem"
            );
        }
        Ok(next)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.timeout.is_zero() {
            return Err(ConfigurationError::NotPositive { field: "timeout" });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigurationError::NotPositive {
                field: "poll_interval",
            });
        }
        if self.poll_interval > self.timeout {
            return Err(ConfigurationError::PollIntervalExceedsTimeout {
                poll_interval: self.poll_interval,
                timeout: self.timeout,
            });
        }
        if !self.mutation_rate_threshold.is_finite() || self.mutation_rate_threshold < 0.0 {
            return Err(ConfigurationError::OutOfRange {
                field: "mutation_rate_threshold",
                reason: format!(
                    "expected a finite value >= 0, got {}",
                    self.mutation_rate_threshold
                ),
            });
        }
        Ok(())
    }

    /// Whether `signal` blocks stability under this policy
    ///
    /// The strictness profile decides which categories may block; the
    /// animation and layout flags can only switch their category off.
    pub fn is_mandatory(&self, signal: SignalType) -> bool {
        let enabled = match signal {
            SignalType::CssAnimations => self.animation_detection,
            SignalType::LayoutShift => self.layout_stability,
            _ => true,
        };
        enabled && self.strictness.permits_blocking(signal)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn dom_settle_time(&self) -> Duration {
        self.dom_settle_time
    }

    pub fn network_idle_threshold(&self) -> u32 {
        self.network_idle_threshold
    }

    pub fn animation_detection(&self) -> bool {
        self.animation_detection
    }

    pub fn layout_stability(&self) -> bool {
        self.layout_stability
    }

    pub fn strictness(&self) -> Strictness {
        self.strictness
    }

    pub fn mutation_rate_threshold(&self) -> f64 {
        self.mutation_rate_threshold
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }
}

impl TryFrom<ConfigOverrides> for PolicyConfiguration {
    type Error = ConfigurationError;

    fn try_from(value: ConfigOverrides) -> Result<Self, Self::Error> {
        PolicyConfiguration::new(value)
    }
}

impl From<PolicyConfiguration> for ConfigOverrides {
    fn from(config: PolicyConfiguration) -> Self {
        Self {
            timeout: Some(config.timeout.as_secs_f64()),
            poll_interval: Some(config.poll_interval.as_secs_f64()),
            dom_settle_time: Some(config.dom_settle_time.as_secs_f64()),
            network_idle_threshold: Some(config.network_idle_threshold),
            animation_detection: Some(config.animation_detection),
            layout_stability: Some(config.layout_stability),
            strictness: Some(config.strictness),
            mutation_rate_threshold: Some(config.mutation_rate_threshold),
            debug_mode: Some(config.debug_mode),
        }
    }
}

/// Partial policy: every field optional, durations in seconds
///
/// Doubles as the builder and as the on-disk shape. Duration fields accept a
/// number of seconds or a humantime string such as `"250ms"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_seconds"
    )]
    pub timeout: Option<f64>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_seconds"
    )]
    pub poll_interval: Option<f64>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_seconds"
    )]
    pub dom_settle_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_idle_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation_detection: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_stability: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strictness: Option<Strictness>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutation_rate_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_mode: Option<bool>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.as_secs_f64());
        self
    }

    pub fn timeout_secs(mut self, secs: f64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval.as_secs_f64());
        self
    }

    pub fn poll_interval_secs(mut self, secs: f64) -> Self {
        self.poll_interval = Some(secs);
        self
    }

    pub fn dom_settle_time(mut self, settle: Duration) -> Self {
        self.dom_settle_time = Some(settle.as_secs_f64());
        self
    }

    pub fn dom_settle_time_secs(mut self, secs: f64) -> Self {
        self.dom_settle_time = Some(secs);
        self
    }

    pub fn network_idle_threshold(mut self, threshold: u32) -> Self {
        self.network_idle_threshold = Some(threshold);
        self
    }

    pub fn animation_detection(mut self, flag: bool) -> Self {
        self.animation_detection = Some(flag);
        self
    }

    pub fn layout_stability(mut self, flag: bool) -> Self {
        self.layout_stability = Some(flag);
        self
    }

    pub fn strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = Some(strictness);
        self
    }

    pub fn mutation_rate_threshold(mut self, rate: f64) -> Self {
        self.mutation_rate_threshold = Some(rate);
        self
    }

    pub fn debug_mode(mut self, flag: bool) -> Self {
        self.debug_mode = Some(flag);
        self
    }

    /// Layer `other` on top of `self`; fields set in `other` win
    pub fn merge(self, other: ConfigOverrides) -> Self {
        Self {
            timeout: other.timeout.or(self.timeout),
            poll_interval: other.poll_interval.or(self.poll_interval),
            dom_settle_time: other.dom_settle_time.or(self.dom_settle_time),
            network_idle_threshold: other.network_idle_threshold.or(self.network_idle_threshold),
            animation_detection: other.animation_detection.or(self.animation_detection),
            layout_stability: other.layout_stability.or(self.layout_stability),
            strictness: other.strictness.or(self.strictness),
            mutation_rate_threshold: other
                .mutation_rate_threshold
                .or(self.mutation_rate_threshold),
            debug_mode: other.debug_mode.or(self.debug_mode),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ConfigOverrides::default()
    }

    /// Set a field from its textual form, as read from env vars or CLI flags
    pub fn set(&mut self, field: &str, raw: &str) -> Result<(), ConfigurationError> {
        match field {
            "timeout" => self.timeout = Some(parse_seconds(field, raw)?),
            "poll_interval" => self.poll_interval = Some(parse_seconds(field, raw)?),
            "dom_settle_time" => self.dom_settle_time = Some(parse_seconds(field, raw)?),
            "network_idle_threshold" => {
                self.network_idle_threshold = Some(parse_value(field, raw)?)
            }
            "animation_detection" => self.animation_detection = Some(parse_flag(field, raw)?),
            "layout_stability" => self.layout_stability = Some(parse_flag(field, raw)?),
            "strictness" => self.strictness = Some(raw.parse()?),
            "mutation_rate_threshold" => {
                self.mutation_rate_threshold = Some(parse_value(field, raw)?)
            }
            "debug_mode" => self.debug_mode = Some(parse_flag(field, raw)?),
            other => {
                return Err(ConfigurationError::InvalidValue {
                    field: other.to_string(),
                    reason: "unknown configuration field".to_string(),
                })
            }
        }
        Ok(())
    }

    /// Validate and apply on top of the defaults
    pub fn build(self) -> Result<PolicyConfiguration, ConfigurationError> {
        PolicyConfiguration::new(self)
    }
}

/// Parse seconds given as a plain number (`"0.25"`) or humantime (`"250ms"`)
pub fn parse_seconds(field: &str, raw: &str) -> Result<f64, ConfigurationError> {
    let trimmed = raw.trim();
    if let Ok(secs) = trimmed.parse::<f64>() {
        return Ok(secs);
    }
    humantime::parse_duration(trimmed)
        .map(|duration| duration.as_secs_f64())
        .map_err(|err| ConfigurationError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{}' is not a duration: {}", raw, err),
        })
}

fn parse_value<T: FromStr>(field: &str, raw: &str) -> Result<T, ConfigurationError>
where
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|err: T::Err| ConfigurationError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{}': {}", raw, err),
        })
}

fn parse_flag(field: &str, raw: &str) -> Result<bool, ConfigurationError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigurationError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{}' is not a boolean", raw),
        }),
    }
}

fn positive_duration(field: &'static str, secs: f64) -> Result<Duration, ConfigurationError> {
    if secs.is_nan() || secs <= 0.0 {
        return Err(ConfigurationError::NotPositive { field });
    }
    to_duration(field, secs)
}

fn non_negative_duration(field: &'static str, secs: f64) -> Result<Duration, ConfigurationError> {
    if secs.is_nan() || secs < 0.0 {
        return Err(ConfigurationError::OutOfRange {
            field,
            reason: format!("expected >= 0 seconds, got {}", secs),
        });
    }
    to_duration(field, secs)
}

fn to_duration(field: &'static str, secs: f64) -> Result<Duration, ConfigurationError> {
    Duration::try_from_secs_f64(secs).map_err(|err| ConfigurationError::OutOfRange {
        field,
        reason: err.to_string(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSeconds {
    Number(f64),
    Text(String),
}

fn deserialize_seconds<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawSeconds>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawSeconds::Number(secs)) => Ok(Some(secs)),
        Some(RawSeconds::Text(raw)) => parse_seconds("duration", &raw)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
