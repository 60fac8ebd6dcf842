//! Browser side of the quiesce stability gate
//!
//! Installs the in-page collector, reads its telemetry through a
//! [`ScriptHost`], and wraps a page so interactions wait for stability.

pub mod chromium;
pub mod collector;
pub mod error;
pub mod host;
pub mod scripts;
pub mod session;

#[cfg(test)]
mod testing;

pub use chromium::{detect_chrome_executable, ChromiumHost, LaunchOptions};
pub use collector::InstrumentationCollector;
pub use error::{HostError, HostErrorKind, PageError};
pub use host::ScriptHost;
pub use scripts::{CHECK_ALIVE_SCRIPT, GET_STATUS_SCRIPT, INSTRUMENTATION_SCRIPT};
pub use session::StabilizedPage;
