//! Telemetry source backed by the in-page collector

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use stability_gate::{InstrumentationError, TelemetrySnapshot, TelemetrySource};
use tracing::{debug, info};

use crate::host::ScriptHost;
use crate::scripts::{CHECK_ALIVE_SCRIPT, GET_STATUS_SCRIPT, INSTRUMENTATION_SCRIPT};

/// Keeps the collector installed in the host page and reads its status
///
/// The in-page state is wiped by every navigation. Each fetch checks the
/// alive probe first and re-injects when the collector is gone.
pub struct InstrumentationCollector<H> {
    host: H,
    injections: AtomicU32,
}

impl<H: ScriptHost> InstrumentationCollector<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            injections: AtomicU32::new(0),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn into_host(self) -> H {
        self.host
    }

    /// Number of times the collector script has been installed
    pub fn injections(&self) -> u32 {
        self.injections.load(Ordering::SeqCst)
    }

    /// Install the collector; harmless when it is already present
    pub async fn inject(&self) -> Result<(), InstrumentationError> {
        let result = self.host.execute_script(INSTRUMENTATION_SCRIPT).await?;
        if result != Value::Bool(true) {
            return Err(InstrumentationError::NotReady(format!(
                "collector did not initialize (returned {})",
                result
            )));
        }
        let count = self.injections.fetch_add(1, Ordering::SeqCst) + 1;
        if count > 1 {
            info!(injections = count, "collector reset detected, re-instrumented page");
        } else {
            debug!("collector installed");
        }
        Ok(())
    }

    pub async fn is_alive(&self) -> Result<bool, InstrumentationError> {
        let result = self.host.execute_script(CHECK_ALIVE_SCRIPT).await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    /// Inject unless the alive probe reports the collector present
    pub async fn ensure_instrumented(&self) -> Result<(), InstrumentationError> {
        if self.is_alive().await? {
            return Ok(());
        }
        self.inject().await
    }

    /// Raw collector payload, without parsing
    pub async fn raw_status(&self) -> Result<Value, InstrumentationError> {
        Ok(self.host.execute_script(GET_STATUS_SCRIPT).await?)
    }
}

#[async_trait]
impl<H: ScriptHost> TelemetrySource for InstrumentationCollector<H> {
    async fn fetch(&self) -> Result<TelemetrySnapshot, InstrumentationError> {
        self.ensure_instrumented().await?;
        let payload = self.raw_status().await?;
        TelemetrySnapshot::from_payload(&payload)
    }
}
