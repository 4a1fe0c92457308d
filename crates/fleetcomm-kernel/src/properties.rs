//! The server properties file (`key=value` lines).
//!
//! Admin changes that must survive a restart (concurrency limits, the
//! maintenance-mode flag) are written here. Updates rewrite the matching
//! line in place so operator comments and ordering are left alone.
//!
//! Clones share one write lock, so concurrent updates of different keys
//! through the same file handle never drop each other's line. The new
//! contents land in a sibling temporary file that is renamed over the old
//! one, so a crash leaves either the old file or the new one.

use crate::error::{KernelError, KernelResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Default file name of the server properties file.
pub const SERVER_PROPERTIES_FILE_NAME: &str = "fleetcomm-server.properties";

#[derive(Debug, Clone)]
pub struct PropertiesFile {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

fn parse_line(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    Some((key.trim(), value.trim()))
}

impl PropertiesFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every property in the file. A missing file reads as empty.
    pub fn load(&self) -> KernelResult<BTreeMap<String, String>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(fleetcomm_types::FleetError::Io(e).into()),
        };
        Ok(contents
            .lines()
            .filter_map(parse_line)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect())
    }

    pub fn get(&self, name: &str) -> KernelResult<Option<String>> {
        Ok(self.load()?.remove(name))
    }

    /// Set `name` to `value`, replacing the existing line or appending one.
    pub fn update(&self, name: &str, value: &str) -> KernelResult<()> {
        let persist_error = |reason: String| KernelError::PropertyPersist {
            name: name.to_string(),
            value: value.to_string(),
            path: self.path.clone(),
            reason,
        };

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let existing = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(persist_error(e.to_string())),
        };

        let mut replaced = false;
        let mut lines: Vec<String> = existing
            .lines()
            .map(|line| match parse_line(line) {
                Some((key, _)) if key == name && !replaced => {
                    replaced = true;
                    format!("{name}={value}")
                }
                _ => line.to_string(),
            })
            .collect();
        if !replaced {
            lines.push(format!("{name}={value}"));
        }
        let mut contents = lines.join("\n");
        contents.push('\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| persist_error(e.to_string()))?;
        }
        let tmp = self.temp_path();
        if let Err(e) = std::fs::write(&tmp, contents) {
            let _ = std::fs::remove_file(&tmp);
            return Err(persist_error(e.to_string()));
        }
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(persist_error(e.to_string()));
        }
        debug!(name, value, path = %self.path.display(), "Saved server property");
        Ok(())
    }

    /// `<file>.tmp` next to the properties file.
    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let props = PropertiesFile::new(dir.path().join("absent.properties"));
        assert!(props.load().unwrap().is_empty());
        assert_eq!(props.get("x").unwrap(), None);
    }

    #[test]
    fn test_update_in_place_preserves_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SERVER_PROPERTIES_FILE_NAME);
        std::fs::write(&path, "# limits\na=1\nb = 2\n").unwrap();

        let props = PropertiesFile::new(&path);
        props.update("b", "20").unwrap();
        props.update("c", "3").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "# limits\na=1\nb=20\nc=3\n");
        assert_eq!(props.get("b").unwrap().as_deref(), Some("20"));
    }

    #[test]
    fn test_update_unwritable_path_is_persist_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be written as a file.
        let props = PropertiesFile::new(dir.path());
        let err = props.update("a", "1").unwrap_err();
        assert!(matches!(err, KernelError::PropertyPersist { .. }));
    }

    #[test]
    fn test_concurrent_updates_through_clones_keep_every_key() {
        let dir = tempfile::tempdir().unwrap();
        let props = PropertiesFile::new(dir.path().join(SERVER_PROPERTIES_FILE_NAME));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let props = props.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        props.update(&format!("key-{t}"), &i.to_string()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let values = props.load().unwrap();
        assert_eq!(values.len(), 4);
        for t in 0..4 {
            assert_eq!(values.get(&format!("key-{t}")).map(String::as_str), Some("49"));
        }
    }

    #[test]
    fn test_update_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SERVER_PROPERTIES_FILE_NAME);
        let props = PropertiesFile::new(&path);
        props.update("a", "1").unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(SERVER_PROPERTIES_FILE_NAME)]);
    }
}
