use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use page_probe::{ChromiumHost, LaunchOptions, PageError, StabilizedPage};
use serde_json::json;
use tokio::fs;
use stability_gate::{DiagnosticRecord, StabilityError, StabilityStatus};
use tracing::{info, warn};

use super::output::{render, OutputFormat};
use super::EXIT_NOT_STABLE;
use crate::config::LoadedConfig;

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Page to open
    pub url: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    pub output: OutputFormat,

    /// Show the browser window
    #[arg(long)]
    pub headful: bool,

    /// Chrome/Chromium executable
    #[arg(long, value_name = "PATH")]
    pub chrome: Option<PathBuf>,

    /// Launch Chromium without its sandbox
    #[arg(long)]
    pub no_sandbox: bool,

    /// Write the diagnostic record as JSON when the page does not settle
    #[arg(long, value_name = "FILE")]
    pub save_record: Option<PathBuf>,
}

impl CheckArgs {
    fn launch_options(&self) -> LaunchOptions {
        let mut options = LaunchOptions::default();
        if self.headful {
            options.headless = false;
        }
        if self.no_sandbox {
            options.no_sandbox = true;
        }
        if let Some(chrome) = &self.chrome {
            options.executable = Some(chrome.clone());
        }
        options
    }
}

pub async fn cmd_check(args: CheckArgs, loaded: &LoadedConfig) -> Result<ExitCode> {
    let host = ChromiumHost::launch(args.launch_options())
        .await
        .context("failed to launch chromium")?;
    let page = StabilizedPage::new(host, loaded.config.clone());

    info!(url = %args.url, strictness = %loaded.config.strictness(), "checking page");
    let outcome = page.navigate(&args.url).await;
    page.into_host().shutdown().await;

    match outcome {
        Ok(status) => {
            print_stable(&args, &status)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(PageError::Stability(StabilityError::Timeout(timeout))) => {
            warn!(url = %args.url, "{}", timeout.message());
            let record = timeout.record();
            if let Some(path) = &args.save_record {
                save_record(path, record).await?;
            }
            print_unstable(&args, record)?;
            Ok(ExitCode::from(EXIT_NOT_STABLE))
        }
        Err(err) => Err(err).with_context(|| format!("check of {} failed", args.url)),
    }
}

fn print_stable(args: &CheckArgs, status: &StabilityStatus) -> Result<()> {
    let payload = json!({
        "url": args.url,
        "stable": true,
        "status": status,
    });
    if let Some(rendered) = render(args.output, &payload)? {
        println!("{}", rendered);
        return Ok(());
    }

    println!("STABLE  {}", args.url);
    for signal in &status.signals {
        let marker = if signal.is_stable() { "ok" } else { "--" };
        let role = if signal.is_mandatory { "mandatory" } else { "advisory" };
        println!(
            "  [{}] {:<16} {:>10}  threshold {:<8} ({})",
            marker,
            signal.signal_type.name(),
            signal.value.to_string(),
            signal.threshold.to_string(),
            role
        );
    }
    Ok(())
}

fn print_unstable(args: &CheckArgs, record: &DiagnosticRecord) -> Result<()> {
    let report = record.report();
    match args.output {
        OutputFormat::Human => report.print(),
        format => {
            let payload = json!({
                "url": args.url,
                "stable": false,
                "report": report.structured,
            });
            if let Some(rendered) = render(format, &payload)? {
                println!("{}", rendered);
            }
        }
    }
    Ok(())
}

async fn save_record(path: &Path, record: &DiagnosticRecord) -> Result<()> {
    let body = serde_json::to_string_pretty(record)?;
    fs::write(path, body)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "diagnostic record saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stability_gate::PolicyConfiguration;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn saved_record_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        let mut factors = BTreeMap::new();
        factors.insert("pending_requests".to_string(), json!(1));
        let record = DiagnosticRecord::new(
            PolicyConfiguration::strict(),
            factors,
            Vec::new(),
            chrono::Utc::now(),
        );

        save_record(&path, &record).await.unwrap();

        let raw = fs::read_to_string(&path).await.unwrap();
        let loaded: DiagnosticRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(loaded.blocking_factors, record.blocking_factors);
        assert_eq!(loaded.captured_at, record.captured_at);
        assert_eq!(loaded.config.timeout(), record.config.timeout());
    }
}
