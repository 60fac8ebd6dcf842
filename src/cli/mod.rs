//! Command-line surface of the `quiesce` binary

pub mod check;
pub mod config;
pub mod explain;
pub mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use stability_gate::{ConfigOverrides, ConfigurationError, Preset};

use crate::config::{load_config, LoadOptions, LoadedConfig};

pub use check::{cmd_check, CheckArgs};
pub use config::{cmd_config, ConfigAction, ConfigArgs};
pub use explain::{cmd_explain, ExplainArgs};
pub use output::OutputFormat;

/// Exit code when the page did not settle before the deadline
pub const EXIT_NOT_STABLE: u8 = 2;

/// quiesce - wait for web pages to settle before acting on them
#[derive(Parser, Debug)]
#[command(name = "quiesce", author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Enable debug logging and per-poll policy logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Log line format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Ignore QUIESCE__* environment overrides
    #[arg(long, global = true)]
    pub no_env: bool,

    #[command(flatten)]
    pub policy: PolicyArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Open a URL in Chromium and wait for it to settle
    Check(CheckArgs),

    /// Inspect or initialize the effective configuration
    Config(ConfigArgs),

    /// Render a saved diagnostic record as a report
    Explain(ExplainArgs),
}

/// Policy flags; they override the file and environment layers
#[derive(Args, Debug, Clone, Default)]
pub struct PolicyArgs {
    /// Named preset: default, strict, relaxed or ci
    #[arg(long, value_name = "NAME", global = true)]
    pub preset: Option<String>,

    /// Deadline for one wait (seconds or e.g. "1500ms")
    #[arg(long, value_name = "DURATION", global = true)]
    pub timeout: Option<String>,

    /// Delay between polls
    #[arg(long, value_name = "DURATION", global = true)]
    pub poll_interval: Option<String>,

    /// Quiet time required after the last DOM mutation
    #[arg(long, value_name = "DURATION", global = true)]
    pub dom_settle_time: Option<String>,

    /// Pending requests tolerated while still considered idle
    #[arg(long, value_name = "COUNT", global = true)]
    pub network_idle_threshold: Option<u32>,

    /// strict, normal or relaxed
    #[arg(long, value_name = "PROFILE", global = true)]
    pub strictness: Option<String>,

    /// Let running animations block stability
    #[arg(long, value_name = "BOOL", global = true)]
    pub animation_detection: Option<bool>,

    /// Let layout movement block stability
    #[arg(long, value_name = "BOOL", global = true)]
    pub layout_stability: Option<bool>,

    /// Mutations per second tolerated under strict
    #[arg(long, value_name = "RATE", global = true)]
    pub mutation_rate_threshold: Option<f64>,
}

impl PolicyArgs {
    pub fn preset(&self) -> Result<Option<Preset>, ConfigurationError> {
        self.preset.as_deref().map(str::parse).transpose()
    }

    pub fn overrides(&self) -> Result<ConfigOverrides, ConfigurationError> {
        let mut overrides = ConfigOverrides::default();
        let textual = [
            ("timeout", &self.timeout),
            ("poll_interval", &self.poll_interval),
            ("dom_settle_time", &self.dom_settle_time),
            ("strictness", &self.strictness),
        ];
        for (field, raw) in textual {
            if let Some(raw) = raw {
                overrides.set(field, raw)?;
            }
        }
        overrides.network_idle_threshold = self.network_idle_threshold;
        overrides.animation_detection = self.animation_detection;
        overrides.layout_stability = self.layout_stability;
        overrides.mutation_rate_threshold = self.mutation_rate_threshold;
        Ok(overrides)
    }
}

impl Cli {
    pub fn load_options(&self) -> Result<LoadOptions> {
        let mut cli = self.policy.overrides().context("invalid policy flag")?;
        if self.debug {
            cli.debug_mode = Some(true);
        }
        Ok(LoadOptions {
            path: self.config.clone(),
            preset: self.policy.preset().context("invalid --preset")?,
            include_env: !self.no_env,
            cli,
        })
    }

    pub fn load_config(&self) -> Result<LoadedConfig> {
        let options = self.load_options()?;
        load_config(&options).context("failed to load configuration")
    }
}

/// Dispatch a parsed command line
pub async fn run(cli: Cli) -> Result<ExitCode> {
    let loaded = cli.load_config()?;
    match cli.command {
        Commands::Check(args) => cmd_check(args, &loaded).await,
        Commands::Config(args) => cmd_config(args, &loaded, cli.config.as_deref()).await,
        Commands::Explain(args) => cmd_explain(args),
    }
}
