use std::fmt;

use serde::{Deserialize, Serialize};
use stability_gate::{InstrumentationError, StabilityError};
use thiserror::Error;

/// Failure categories surfaced by a script host
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum HostErrorKind {
    #[error("browser launch failed")]
    Launch,
    #[error("navigation failed")]
    Navigation,
    #[error("script evaluation failed")]
    Script,
    #[error("target element not found")]
    TargetNotFound,
    #[error("browser i/o failure")]
    Io,
    #[error("internal error")]
    Internal,
}

/// Host error with an optional hint and structured context
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostError {
    pub kind: HostErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for HostError {}

impl HostError {
    pub fn new(kind: HostErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
            data: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<HostError> for InstrumentationError {
    fn from(err: HostError) -> Self {
        if err.retriable {
            InstrumentationError::ScriptFailed(err.to_string())
        } else {
            InstrumentationError::HostFailed(err.to_string())
        }
    }
}

/// Error from a stabilized page operation
#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Stability(#[from] StabilityError),
}

impl PageError {
    pub fn as_stability(&self) -> Option<&StabilityError> {
        match self {
            PageError::Stability(err) => Some(err),
            PageError::Host(_) => None,
        }
    }
}
