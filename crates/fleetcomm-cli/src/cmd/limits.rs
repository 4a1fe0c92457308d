//! `fleetcomm limits`: concurrency limits as the next server start will see
//! them.
//!
//! Limits come from the configuration file and are overridden by values an
//! administrator persisted to the server properties file.

use crate::table::{Align, Table};
use crate::ui;
use anyhow::{bail, Context};
use fleetcomm_kernel::concurrency::validate_limit_name;
use fleetcomm_kernel::config::{self, limit_name_from_key, limit_property_key, ServerConfig};
use fleetcomm_kernel::PropertiesFile;
use fleetcomm_wire::concurrency::UNLIMITED;
use fleetcomm_wire::{RpcCategory, GLOBAL_LIMIT_NAME};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Where an effective limit value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitSource {
    ConfigFile,
    Persisted,
}

impl fmt::Display for LimitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitSource::ConfigFile => write!(f, "config file"),
            LimitSource::Persisted => write!(f, "properties"),
        }
    }
}

/// `unlimited` (or any value <= 0) means no limit.
pub fn parse_permits(raw: &str) -> anyhow::Result<i32> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("unlimited") || raw.eq_ignore_ascii_case("none") {
        return Ok(UNLIMITED);
    }
    let permits: i32 = raw
        .parse()
        .with_context(|| format!("'{raw}' is neither a number nor 'unlimited'"))?;
    Ok(if permits <= 0 { UNLIMITED } else { permits })
}

pub fn format_permits(permits: Option<i32>) -> String {
    match permits {
        Some(p) if p > 0 => p.to_string(),
        _ => "unlimited".to_string(),
    }
}

/// Every configured limit with its source. A missing configuration file
/// contributes nothing.
pub fn effective_limits(
    config_file: &Path,
    properties: &PropertiesFile,
) -> anyhow::Result<BTreeMap<String, (i32, LimitSource)>> {
    let mut limits: BTreeMap<String, (i32, LimitSource)> = BTreeMap::new();

    if config_file.is_file() {
        let values = config::read_config_file(config_file)?;
        for (name, permits) in ServerConfig::new(values).concurrency_limits() {
            limits.insert(name, (permits, LimitSource::ConfigFile));
        }
    } else {
        debug!(path = %config_file.display(), "No configuration file, showing persisted limits only");
    }

    let persisted: BTreeMap<String, String> = properties
        .load()?
        .into_iter()
        .filter(|(key, _)| limit_name_from_key(key).is_some())
        .collect();
    for (name, permits) in ServerConfig::new(persisted).concurrency_limits() {
        limits.insert(name, (permits, LimitSource::Persisted));
    }
    Ok(limits)
}

/// The global limit and each category, then any other configured names.
fn listed_names(limits: &BTreeMap<String, (i32, LimitSource)>) -> Vec<String> {
    let mut names: Vec<String> = std::iter::once(GLOBAL_LIMIT_NAME)
        .chain(RpcCategory::ALL.iter().map(|c| c.as_str()))
        .map(str::to_string)
        .collect();
    for name in limits.keys() {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
}

pub fn cmd_limits_list(
    config_file: &Path,
    properties: &PropertiesFile,
    json: bool,
) -> anyhow::Result<()> {
    let limits = effective_limits(config_file, properties)?;
    let names = listed_names(&limits);

    if json {
        let out: serde_json::Map<String, serde_json::Value> = names
            .iter()
            .map(|name| {
                let value = match limits.get(name) {
                    Some((p, source)) => serde_json::json!({
                        "permits": p,
                        "source": source.to_string(),
                    }),
                    None => serde_json::json!({ "permits": UNLIMITED, "source": null }),
                };
                (name.clone(), value)
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new(&["Limit", "Permits", "Source"]).align(1, Align::Right);
    for name in &names {
        let (permits, source) = match limits.get(name) {
            Some((p, s)) => (format_permits(Some(*p)), s.to_string()),
            None => (format_permits(None), "-".to_string()),
        };
        table.add_row(&[name.as_str(), permits.as_str(), source.as_str()]);
    }
    table.print();
    Ok(())
}

pub fn cmd_limits_get(
    config_file: &Path,
    properties: &PropertiesFile,
    name: &str,
) -> anyhow::Result<()> {
    validate_limit_name(name)?;
    let limits = effective_limits(config_file, properties)?;
    let permits = limits.get(name).map(|(p, _)| *p);
    ui::kv(name, &format_permits(permits));
    Ok(())
}

pub fn set_limit(properties: &PropertiesFile, name: &str, raw: &str) -> anyhow::Result<i32> {
    validate_limit_name(name)?;
    let permits = parse_permits(raw)?;
    if name != GLOBAL_LIMIT_NAME && RpcCategory::from_name(name).is_none() {
        bail!(
            "Unknown limit '{name}'. Known limits: {GLOBAL_LIMIT_NAME}, {}",
            RpcCategory::ALL.map(|c| c.as_str()).join(", ")
        );
    }
    properties.update(&limit_property_key(name), &permits.to_string())?;
    Ok(permits)
}

pub fn cmd_limits_set(properties: &PropertiesFile, name: &str, raw: &str) -> anyhow::Result<()> {
    let permits = set_limit(properties, name, raw)?;
    ui::success(&format!(
        "Limit '{name}' set to {}",
        format_permits(Some(permits))
    ));
    ui::hint(&format!(
        "Saved to {}. It takes effect the next time the server starts.",
        properties.path().display()
    ));
    Ok(())
}
