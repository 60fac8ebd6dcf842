use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    Yaml,
}

/// Serialize `value` for the machine-readable formats
pub fn render<T: Serialize>(format: OutputFormat, value: &T) -> Result<Option<String>> {
    match format {
        OutputFormat::Human => Ok(None),
        OutputFormat::Json => Ok(Some(serde_json::to_string_pretty(value)?)),
        OutputFormat::Yaml => Ok(Some(serde_yaml::to_string(value)?)),
    }
}
