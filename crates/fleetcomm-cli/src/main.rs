//! fleetcomm CLI: offline administration of the communications server.
//!
//! Every command works on the server's files (configuration file and server
//! properties file); nothing here needs a running server.

mod cli;
mod cmd;
mod table;
mod ui;

use crate::cli::*;
use clap::Parser;
use fleetcomm_kernel::comms::DEFAULT_CONFIG_FILE;
use fleetcomm_kernel::properties::SERVER_PROPERTIES_FILE_NAME;
use fleetcomm_kernel::PropertiesFile;
use std::path::PathBuf;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// `~/.fleetcomm`, or the working directory when there is no home.
fn fleetcomm_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".fleetcomm"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_properties_path() -> PathBuf {
    fleetcomm_home().join(SERVER_PROPERTIES_FILE_NAME)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_file = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let properties = PropertiesFile::new(cli.properties.unwrap_or_else(default_properties_path));

    match cli.command {
        Commands::Config(ConfigCommands::Show {
            overrides,
            overrides_file,
            address,
            port,
            secure_port,
            json,
        }) => cmd::config::cmd_config_show(
            cmd::config::ShowOptions {
                config_file: &config_file,
                properties: &properties,
                overrides_file: overrides_file.as_deref(),
                overrides: &overrides,
                identity: cmd::config::identity(address, port, secure_port),
            },
            json,
        ),
        Commands::Limits(sub) => match sub {
            LimitCommands::List { json } => {
                cmd::limits::cmd_limits_list(&config_file, &properties, json)
            }
            LimitCommands::Get { name } => {
                cmd::limits::cmd_limits_get(&config_file, &properties, &name)
            }
            LimitCommands::Set { name, value } => {
                cmd::limits::cmd_limits_set(&properties, &name, &value)
            }
        },
        Commands::Maintenance(sub) => match sub {
            MaintenanceCommands::Get => cmd::maintenance::cmd_maintenance_get(&properties),
            MaintenanceCommands::Set { enabled } => {
                cmd::maintenance::cmd_maintenance_set(&properties, enabled)
            }
        },
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    if let Err(e) = run(cli) {
        ui::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
