//! Command-line argument parsing for Rally.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::Config;

/// Which side of the connection to run.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Listen for players.
    Host,
    /// Connect to a host.
    Join,
}

/// Rally command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "rally", about = "Rally host/join networking demo")]
pub struct CliArgs {
    /// Run as host or join.
    #[command(subcommand)]
    pub role: Role,

    /// Address to bind (host) or connect to (join).
    #[arg(long, global = true)]
    pub address: Option<String>,

    /// Port to bind (host) or connect to (join).
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Enable TLS on both sides.
    #[arg(long, global = true)]
    pub tls: Option<bool>,

    /// Idle timeout in seconds (host only, 0 disables).
    #[arg(long, global = true)]
    pub idle_timeout: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.address {
            match args.role {
                Role::Host => self.server.bind_address = addr.clone(),
                Role::Join => self.client.server_address = addr.clone(),
            }
        }
        if let Some(port) = args.port {
            match args.role {
                Role::Host => self.server.bind_port = port,
                Role::Join => self.client.server_port = port,
            }
        }
        if let Some(tls) = args.tls {
            self.server.tls_enabled = tls;
            self.client.tls_enabled = tls;
        }
        if let Some(secs) = args.idle_timeout {
            self.server.idle_timeout_secs = secs;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
