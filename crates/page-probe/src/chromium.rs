//! [`ScriptHost`] over a chromiumoxide page

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use which::which;

use crate::error::{HostError, HostErrorKind};
use crate::host::ScriptHost;

/// How to start a local Chromium
#[derive(Clone, Debug)]
pub struct LaunchOptions {
    pub executable: Option<PathBuf>,
    pub headless: bool,
    pub no_sandbox: bool,
    pub request_timeout: Duration,
    pub launch_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            executable: detect_chrome_executable(),
            headless: env_flag("QUIESCE_HEADLESS").unwrap_or(true),
            no_sandbox: env_flag("QUIESCE_DISABLE_SANDBOX").unwrap_or(false),
            request_timeout: Duration::from_secs(30),
            launch_timeout: Duration::from_secs(20),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Locate a Chrome/Chromium binary: `QUIESCE_CHROME`, then `PATH`, then OS defaults
pub fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("QUIESCE_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    os_specific_chrome_paths()
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(not(target_os = "windows"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/snap/bin/chromium"),
        ]
    }
}

struct OwnedBrowser {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
}

/// A single chromiumoxide page, optionally owning the browser behind it
pub struct ChromiumHost {
    page: Page,
    owned: Option<OwnedBrowser>,
}

impl ChromiumHost {
    /// Launch a browser and open a blank page
    pub async fn launch(options: LaunchOptions) -> Result<Self, HostError> {
        let config = browser_config(&options)?;
        let (browser, mut handler) = Browser::launch(config).await.map_err(|err| {
            HostError::new(HostErrorKind::Launch)
                .with_hint(err.to_string())
                .with_data(json!({
                    "executable": options.executable,
                    "hint": "Set QUIESCE_CHROME to the full path of chrome/chromium."
                }))
        })?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler error");
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(|err| {
            HostError::new(HostErrorKind::Io).with_hint(format!("failed to open page: {err}"))
        })?;
        info!(headless = options.headless, "chromium launched");

        Ok(Self {
            page,
            owned: Some(OwnedBrowser {
                browser: Mutex::new(browser),
                handler,
            }),
        })
    }

    /// Wrap a page whose browser is managed elsewhere
    pub fn attach(page: Page) -> Self {
        Self { page, owned: None }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Close the browser if this host launched it
    pub async fn shutdown(self) {
        let Some(owned) = self.owned else {
            return;
        };
        let mut browser = owned.browser.lock().await;
        if let Err(err) = browser.close().await {
            warn!(error = %err, "failed to close chromium");
        }
        if let Err(err) = browser.wait().await {
            warn!(error = %err, "failed to reap chromium process");
        }
        owned.handler.abort();
    }
}

fn browser_config(options: &LaunchOptions) -> Result<BrowserConfig, HostError> {
    let mut builder = BrowserConfig::builder()
        .request_timeout(options.request_timeout)
        .launch_timeout(options.launch_timeout);

    if let Some(executable) = &options.executable {
        if !executable.exists() {
            return Err(HostError::new(HostErrorKind::Launch).with_hint(format!(
                "chrome executable not found at {}",
                executable.display()
            )));
        }
        builder = builder.chrome_executable(executable);
    }
    if !options.headless {
        builder = builder.with_head();
    }
    if options.no_sandbox {
        builder = builder.no_sandbox();
    }

    builder = builder
        .arg("--disable-background-timer-throttling")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--no-first-run")
        .arg("--no-default-browser-check");

    builder.build().map_err(|err| {
        HostError::new(HostErrorKind::Internal).with_hint(format!("browser config error: {err}"))
    })
}

#[async_trait]
impl ScriptHost for ChromiumHost {
    async fn execute_script(&self, script: &str) -> Result<Value, HostError> {
        let params = EvaluateParams::builder()
            .expression(script)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(|err| HostError::new(HostErrorKind::Internal).with_hint(err))?;

        let result = self.page.evaluate_expression(params).await.map_err(|err| {
            HostError::new(HostErrorKind::Script)
                .retriable(true)
                .with_hint(err.to_string())
        })?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn navigate(&self, url: &str) -> Result<(), HostError> {
        self.page.goto(url).await.map_err(|err| {
            HostError::new(HostErrorKind::Navigation)
                .with_hint(err.to_string())
                .with_data(json!({ "url": url }))
        })?;
        debug!(url, "navigated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_executable_is_reported() {
        let options = LaunchOptions {
            executable: Some(PathBuf::from("/definitely/not/chrome")),
            ..LaunchOptions::default()
        };
        let err = browser_config(&options).unwrap_err();
        assert_eq!(err.kind, HostErrorKind::Launch);
        assert!(err.to_string().contains("/definitely/not/chrome"));
    }

    #[test]
    fn test_executable_names_are_known() {
        assert!(!chrome_executable_names().is_empty());
        assert!(!os_specific_chrome_paths().is_empty());
    }
}
