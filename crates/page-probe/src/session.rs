//! A page whose interactions are gated on stability

use serde_json::Value;
use stability_gate::{
    Clock, ConfigOverrides, Diagnostics, PolicyConfiguration, StabilityError, StabilityStatus,
    Stabilizer, TokioClock,
};
use tracing::debug;

use crate::collector::InstrumentationCollector;
use crate::error::{HostError, HostErrorKind, PageError};
use crate::host::ScriptHost;

/// Host wrapper that waits for stability before every interaction
pub struct StabilizedPage<H, C = TokioClock> {
    stabilizer: Stabilizer<InstrumentationCollector<H>, C>,
}

impl<H: ScriptHost> StabilizedPage<H, TokioClock> {
    pub fn new(host: H, config: PolicyConfiguration) -> Self {
        Self {
            stabilizer: Stabilizer::new(InstrumentationCollector::new(host), config),
        }
    }
}

impl<H: ScriptHost, C: Clock> StabilizedPage<H, C> {
    pub fn with_clock(host: H, config: PolicyConfiguration, clock: C) -> Self {
        Self {
            stabilizer: Stabilizer::with_clock(InstrumentationCollector::new(host), config, clock),
        }
    }

    pub fn host(&self) -> &H {
        self.stabilizer.source().host()
    }

    pub fn collector(&self) -> &InstrumentationCollector<H> {
        self.stabilizer.source()
    }

    pub fn config(&self) -> &PolicyConfiguration {
        self.stabilizer.config()
    }

    /// Navigate, re-instrument the fresh document and wait for it to settle
    pub async fn navigate(&self, url: &str) -> Result<StabilityStatus, PageError> {
        self.host().navigate(url).await?;
        debug!(url, "navigation finished, waiting for stability");
        Ok(self.stabilizer.wait_for_stability().await?)
    }

    /// Gate an interaction on the configured policy
    pub async fn before_action(&self) -> Result<StabilityStatus, StabilityError> {
        self.stabilizer.wait_for_stability().await
    }

    /// Gate an interaction with per-call overrides
    pub async fn before_action_with(
        &self,
        overrides: ConfigOverrides,
    ) -> Result<StabilityStatus, StabilityError> {
        self.stabilizer.wait_with_overrides(overrides).await
    }

    /// Wait, then run `script` in the page
    pub async fn evaluate(&self, script: &str) -> Result<Value, PageError> {
        self.before_action().await?;
        Ok(self.host().execute_script(script).await?)
    }

    /// Wait, then click the first element matching `selector`
    pub async fn click(&self, selector: &str) -> Result<(), PageError> {
        self.before_action().await?;
        let clicked = self.host().execute_script(&click_script(selector)).await?;
        if clicked != Value::Bool(true) {
            return Err(HostError::new(HostErrorKind::TargetNotFound)
                .with_hint(format!("no element matches '{}'", selector))
                .into());
        }
        Ok(())
    }

    /// Diagnostics of the last wait, `None` before any wait ran
    pub fn diagnostics(&self) -> Option<Diagnostics> {
        self.stabilizer.diagnostics()
    }

    pub fn require_diagnostics(&self) -> Result<Diagnostics, StabilityError> {
        self.stabilizer.require_diagnostics()
    }

    /// Give back the undecorated host
    pub fn into_host(self) -> H {
        let Self { stabilizer } = self;
        stabilizer.into_source().into_host()
    }
}

fn click_script(selector: &str) -> String {
    // a JSON string literal is a valid JavaScript string literal
    let literal = Value::String(selector.to_string()).to_string();
    format!(
        "(function () {{ var el = document.querySelector({literal}); if (!el) {{ return false; }} el.click(); return true; }})()"
    )
}
