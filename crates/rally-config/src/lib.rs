//! Configuration system for Rally.
//!
//! Server and client settings persist to disk as a RON file and can be
//! overridden from the command line via clap.

mod cli;
mod config;
mod error;

pub use cli::{CliArgs, Role};
pub use config::{Config, DebugConfig, default_config_dir};
pub use error::ConfigError;
