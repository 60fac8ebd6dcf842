use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Subcommand};
use tokio::fs;
use tracing::info;

use super::output::{render, OutputFormat};
use crate::config::{preset_name, render_yaml, resolve_config_path, ConfigSource, LoadedConfig};

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective policy and where each value came from
    Show {
        #[arg(short, long, value_enum, default_value = "yaml")]
        output: OutputFormat,
    },

    /// Validate every configuration layer
    Validate,

    /// Write the effective policy to a config file
    Init {
        /// Target file; defaults to the resolved config path
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn cmd_config(
    args: ConfigArgs,
    loaded: &LoadedConfig,
    explicit: Option<&Path>,
) -> Result<ExitCode> {
    match args.action {
        ConfigAction::Show { output } => show(loaded, output)?,
        ConfigAction::Validate => {
            // loading already ran every layer through validation
            match &loaded.file {
                Some(path) => println!("Configuration file {} is valid", path.display()),
                None => println!("No configuration file found; defaults are valid"),
            }
        }
        ConfigAction::Init { path, force } => {
            let target = path
                .or_else(|| resolve_config_path(explicit))
                .ok_or_else(|| anyhow!("no config directory on this platform; pass a path"))?;
            init(&target, loaded, force).await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn show(loaded: &LoadedConfig, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Human => {
            let file = loaded
                .file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string());
            println!("Preset: {}", preset_name(loaded.preset));
            println!("File:   {}", file);
            let fields = serde_json::to_value(&loaded.config)?;
            if let Some(fields) = fields.as_object() {
                for (name, value) in fields {
                    let source = loaded
                        .provenance
                        .get(name)
                        .copied()
                        .unwrap_or(ConfigSource::Builtin);
                    println!("  {:<24} {:<8} ({})", name, value.to_string(), source);
                }
            }
        }
        format => {
            if let Some(rendered) = render(format, loaded)? {
                println!("{}", rendered);
            }
        }
    }
    Ok(())
}

async fn init(target: &Path, loaded: &LoadedConfig, force: bool) -> Result<()> {
    if fs::try_exists(target).await? && !force {
        bail!(
            "{} already exists; pass --force to overwrite",
            target.display()
        );
    }
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let body = render_yaml(&loaded.config)?;
    fs::write(target, body)
        .await
        .with_context(|| format!("writing {}", target.display()))?;
    info!(path = %target.display(), "configuration written");
    println!("Wrote configuration to {}", target.display());
    Ok(())
}
