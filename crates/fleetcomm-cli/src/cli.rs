//! Clap CLI definitions for fleetcomm.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  fleetcomm config show                          Print the effective server configuration
  fleetcomm config show --set KEY=VALUE          Preview the effect of an override
  fleetcomm limits list                          Show every concurrency limit
  fleetcomm limits set inventory-report 10       Persist a category limit
  fleetcomm limits set global unlimited          Remove the global limit
  fleetcomm maintenance set true                 Start the next server in maintenance mode";

/// Administer the fleetcomm agent communications server.
#[derive(Parser)]
#[command(name = "fleetcomm", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to the server communications configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the server properties file holding persisted admin settings
    /// (default: ~/.fleetcomm/fleetcomm-server.properties).
    #[arg(long, global = true)]
    pub properties: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect the server configuration [*].
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Read or change concurrency limits (list, get, set) [*].
    #[command(subcommand)]
    Limits(LimitCommands),
    /// Read or change the maintenance-mode-at-startup flag [*].
    #[command(subcommand)]
    Maintenance(MaintenanceCommands),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Load the configuration file, apply overrides and upgrades, and print
    /// the resulting preferences.
    Show {
        /// Override a preference (repeatable). Values may use ${VAR} or ${VAR:default}.
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
        /// File of key=value overrides, applied before --set.
        #[arg(long)]
        overrides_file: Option<PathBuf>,
        /// Address this server is registered under, used for bind defaults.
        #[arg(long)]
        address: Option<String>,
        /// Plain transport port of this server.
        #[arg(long, requires = "address")]
        port: Option<u16>,
        /// Secure transport port of this server.
        #[arg(long, requires = "address")]
        secure_port: Option<u16>,
        /// Output as JSON for scripting.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum LimitCommands {
    /// List the global limit and every category limit.
    List {
        /// Output as JSON for scripting.
        #[arg(long)]
        json: bool,
    },
    /// Show one limit.
    Get {
        /// Limit name (e.g. "global", "inventory-report").
        name: String,
    },
    /// Persist a limit. It takes effect the next time the server starts.
    Set {
        /// Limit name (e.g. "global", "inventory-report").
        name: String,
        /// Number of permits, or "unlimited".
        value: String,
    },
}

#[derive(Subcommand)]
pub enum MaintenanceCommands {
    /// Show whether the server starts in maintenance mode.
    Get,
    /// Set whether the server starts in maintenance mode.
    Set {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}
