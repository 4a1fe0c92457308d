//! `fleetcomm maintenance`: the maintenance-mode-at-startup flag.

use crate::ui;
use fleetcomm_kernel::comms::MAINTENANCE_MODE_AT_START;
use fleetcomm_kernel::PropertiesFile;

/// Unset means `false`.
pub fn read_flag(properties: &PropertiesFile) -> anyhow::Result<bool> {
    Ok(properties
        .get(MAINTENANCE_MODE_AT_START)?
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false))
}

pub fn cmd_maintenance_get(properties: &PropertiesFile) -> anyhow::Result<()> {
    let enabled = read_flag(properties)?;
    ui::kv("maintenance at startup", &enabled.to_string());
    if !properties.path().is_file() {
        ui::hint(&format!(
            "{} does not exist yet, showing the default.",
            properties.path().display()
        ));
    }
    Ok(())
}

pub fn cmd_maintenance_set(properties: &PropertiesFile, enabled: bool) -> anyhow::Result<()> {
    properties.update(MAINTENANCE_MODE_AT_START, &enabled.to_string())?;
    ui::success(&format!("Maintenance mode at startup set to {enabled}"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let props = PropertiesFile::new(dir.path().join("server.properties"));
        assert!(!read_flag(&props).unwrap());

        cmd_maintenance_set(&props, true).unwrap();
        assert!(read_flag(&props).unwrap());

        cmd_maintenance_set(&props, false).unwrap();
        assert!(!read_flag(&props).unwrap());
    }

    #[test]
    fn test_flag_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.properties");
        std::fs::write(&path, format!("# admin settings\n{MAINTENANCE_MODE_AT_START}=TRUE\n")).unwrap();
        assert!(read_flag(&PropertiesFile::new(path)).unwrap());
    }
}
