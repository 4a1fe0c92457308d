//! `fleetcomm config show`: prepare the configuration the way a server start
//! would, against a throwaway preferences node, and print the result.

use crate::table::Table;
use anyhow::{bail, Context};
use fleetcomm_kernel::config::{self, ServerConfig, ServerIdentity, DEFAULT_CONNECTOR_BIND_PORT};
use fleetcomm_kernel::preferences::{PreferencesStore, DEFAULT_NODE_NAME};
use fleetcomm_kernel::PropertiesFile;
use std::collections::BTreeMap;
use std::path::Path;

pub struct ShowOptions<'a> {
    pub config_file: &'a Path,
    pub properties: &'a PropertiesFile,
    pub overrides_file: Option<&'a Path>,
    pub overrides: &'a [String],
    pub identity: Option<ServerIdentity>,
}

/// Parse repeated `KEY=VALUE` arguments.
pub fn parse_overrides(raw: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    let mut overrides = BTreeMap::new();
    for entry in raw {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("Override '{entry}' is not of the form KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Override '{entry}' has an empty key");
        }
        overrides.insert(key.to_string(), value.trim().to_string());
    }
    Ok(overrides)
}

/// Identity from `--address/--port/--secure-port`. Ports default to the
/// standard connector port.
pub fn identity(
    address: Option<String>,
    port: Option<u16>,
    secure_port: Option<u16>,
) -> Option<ServerIdentity> {
    address.map(|address| ServerIdentity {
        address,
        port: port.unwrap_or(DEFAULT_CONNECTOR_BIND_PORT),
        secure_port: secure_port.unwrap_or(DEFAULT_CONNECTOR_BIND_PORT),
    })
}

pub fn prepare(opts: &ShowOptions<'_>) -> anyhow::Result<ServerConfig> {
    let explicit = parse_overrides(opts.overrides)?;
    let overrides = config::collect_overrides(opts.overrides_file, &explicit, opts.properties)
        .context("Failed to collect configuration overrides")?;

    let prefs = PreferencesStore::in_memory(DEFAULT_NODE_NAME);
    config::prepare_preferences(&prefs, opts.config_file, &overrides, opts.identity.as_ref())
        .with_context(|| {
            format!(
                "Failed to prepare configuration from {}",
                opts.config_file.display()
            )
        })
}

pub fn cmd_config_show(opts: ShowOptions<'_>, json: bool) -> anyhow::Result<()> {
    let config = prepare(&opts)?;

    if json {
        println!("{}", serde_json::to_string_pretty(config.preferences())?);
        return Ok(());
    }

    let mut table = Table::new(&["Preference", "Value"]);
    for (key, value) in config.preferences() {
        table.add_row(&[key.as_str(), value.as_str()]);
    }
    table.print();
    Ok(())
}
