//! Pre-action stability gate
//!
//! This crate decides whether a page is settled enough to interact with:
//! - PolicyConfiguration with strict/normal/relaxed profiles and presets
//! - Pure signal evaluation (network, DOM, animations, layout, mutation rate)
//! - Deadline-bounded polling against a pluggable telemetry source
//! - Timeout diagnostics with ranked blocking factors and remediation hints

pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod evaluator;
pub mod signals;
pub mod telemetry;
pub mod timeline;
pub mod waiter;

pub use clock::*;
pub use config::*;
pub use diagnostics::*;
pub use errors::*;
pub use evaluator::*;
pub use signals::*;
pub use telemetry::*;
pub use timeline::*;
pub use waiter::*;
