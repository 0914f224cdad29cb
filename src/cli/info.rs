use anyhow::Result;

use crate::cli::context::CliContext;
use crate::config::ENV_PREFIX;

pub async fn cmd_info(ctx: &CliContext) -> Result<()> {
    println!("pagesync v{}", env!("CARGO_PKG_VERSION"));
    let path = ctx.config_path();
    let state = if path.exists() { "found" } else { "missing, defaults in use" };
    println!("Config file:      {} ({})", path.display(), state);
    println!("Env overrides:    {}SECTION__KEY", ENV_PREFIX);
    match &ctx.config().engine.records_path {
        Some(records) => println!("Record store:     {}", records.display()),
        None => println!("Record store:     memory only"),
    }
    Ok(())
}
