use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::cli::context::CliContext;
use crate::cli::output::{render, OutputFormat};
use crate::metrics::render_metrics;
use crate::scenario::{replay, Scenario};

#[derive(Args, Clone, Debug)]
pub struct ReplayArgs {
    /// Scenario file (YAML, or JSON by extension)
    pub scenario: PathBuf,

    /// Print only the final page records
    #[arg(long)]
    pub records_only: bool,

    /// Append the Prometheus metrics text after the report
    #[arg(long)]
    pub metrics: bool,
}

pub async fn cmd_replay(args: ReplayArgs, ctx: &CliContext, format: OutputFormat) -> Result<()> {
    let scenario = Scenario::from_path(&args.scenario)?;
    info!(
        scenario = %args.scenario.display(),
        steps = scenario.steps.len(),
        "replaying scenario"
    );
    let report = replay(scenario, ctx.config().clone()).await?;
    if args.records_only {
        println!("{}", render(&report.records, &format)?);
    } else {
        println!("{}", render(&report, &format)?);
    }
    if args.metrics {
        println!("{}", render_metrics()?);
    }
    Ok(())
}
