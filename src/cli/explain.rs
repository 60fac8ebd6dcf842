use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use stability_gate::DiagnosticRecord;

use super::output::{render, OutputFormat};

#[derive(Args, Debug, Clone)]
pub struct ExplainArgs {
    /// Diagnostic record saved by `check --save-record`
    pub record: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    pub output: OutputFormat,
}

pub fn cmd_explain(args: ExplainArgs) -> Result<ExitCode> {
    let raw = std::fs::read_to_string(&args.record)
        .with_context(|| format!("reading {}", args.record.display()))?;
    let record: DiagnosticRecord = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", args.record.display()))?;

    let report = record.report();
    match render(args.output, &report.structured)? {
        Some(rendered) => println!("{}", rendered),
        None => report.print(),
    }
    Ok(ExitCode::SUCCESS)
}
