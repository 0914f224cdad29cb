//! Navigation-aware page state coordinator.
//!
//! The member crates hold the detection, redirect tracking and reconciliation logic. This
//! crate wires them into a [`SyncEngine`], loads [`AppConfig`] and hosts the CLI.

pub mod cli;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod scenario;

pub use config::{load_config, load_config_with_options, AppConfig, ConfigError, LoadOptions};
pub use engine::{EngineResponse, ExtractionResolution, JanitorHandle, SyncEngine};
pub use scenario::{replay, ReplayReport, Scenario, Step};
