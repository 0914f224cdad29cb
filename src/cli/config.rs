use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use serde_json::Value as JsonValue;

use crate::cli::context::CliContext;
use crate::cli::output::{render, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration (defaults, file and environment merged)
    Show,

    /// Get one configuration value
    Get {
        /// Dotted key, e.g. `reconciler.max_urls_per_tab`
        key: String,
    },

    /// Validate the configuration file
    Validate,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext, format: OutputFormat) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            println!("Effective configuration ({}):", ctx.config_path().display());
            println!("{}", render(ctx.config(), &format)?);
        }
        ConfigAction::Get { key } => {
            let json = serde_json::to_value(ctx.config())?;
            let segments = split_key(&key)?;
            match get_json_value(&json, &segments) {
                Some(value) => println!("{}", render(value, &format)?),
                None => bail!("{} not found in configuration", key),
            }
        }
        ConfigAction::Validate => {
            // Loading already rejected unknown keys and bad values.
            println!("Configuration is valid ({})", ctx.config_path().display());
        }
    }
    Ok(())
}

fn split_key(key: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = key
        .split('.')
        .filter(|segment| !segment.is_empty())
        .collect();
    if segments.is_empty() {
        bail!("configuration key cannot be empty");
    }
    Ok(segments)
}

fn get_json_value<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut current = value;
    for segment in path {
        match current {
            JsonValue::Object(map) => {
                current = map.get(*segment)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn dotted_keys_resolve_against_effective_config() {
        let json = serde_json::to_value(AppConfig::default()).unwrap();
        let value = get_json_value(&json, &split_key("bridge.request_ms").unwrap());
        assert_eq!(value, Some(&JsonValue::from(10_000)));
        assert!(get_json_value(&json, &split_key("bridge.nope").unwrap()).is_none());
        assert!(split_key("..").is_err());
    }
}
