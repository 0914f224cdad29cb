use clap::Subcommand;

use super::config::ConfigArgs;
use super::replay::ReplayArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Replay a scripted scenario through the coordinator
    Replay(ReplayArgs),

    /// Inspect the effective configuration
    Config(ConfigArgs),

    /// Show version and configuration sources
    Info,
}
