use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HostError;

/// The two capabilities the gate needs from a browser session
#[async_trait]
pub trait ScriptHost: Send + Sync {
    /// Evaluate a JavaScript expression and return its JSON-decoded value
    async fn execute_script(&self, script: &str) -> Result<Value, HostError>;

    /// Load `url` in the current page
    async fn navigate(&self, url: &str) -> Result<(), HostError>;
}

#[async_trait]
impl<T: ScriptHost + ?Sized> ScriptHost for Arc<T> {
    async fn execute_script(&self, script: &str) -> Result<Value, HostError> {
        (**self).execute_script(script).await
    }

    async fn navigate(&self, url: &str) -> Result<(), HostError> {
        (**self).navigate(url).await
    }
}

#[async_trait]
impl<'a, T: ScriptHost + ?Sized> ScriptHost for &'a T {
    async fn execute_script(&self, script: &str) -> Result<Value, HostError> {
        (**self).execute_script(script).await
    }

    async fn navigate(&self, url: &str) -> Result<(), HostError> {
        (**self).navigate(url).await
    }
}
