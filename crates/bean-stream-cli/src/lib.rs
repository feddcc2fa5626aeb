//! bean-stream CLI library
//!
//! Command-line front end for Bean reading streams: argument parsing,
//! TOML configuration, sinks and the stream driver with Ctrl-C handling.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod sinks;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::AppConfig;
pub use error::{CliError, Result};
