//! bleserver host process
//!
//! Loads layered configuration, runs the BLE peripheral on the chosen
//! backend, reports produced events and hands completed call and message
//! requests to the action dispatcher.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;

pub use app::{BleServerApp, RunSummary};
pub use cli::{Cli, Commands};
pub use config::{AppConfig, Backend, ConfigError};
pub use dispatch::{Action, ActionDispatcher};
pub use error::{CliError, Result};
