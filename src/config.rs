//! Runtime configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ReloadError, ReloadResult};

/// Tunables for a reload session. All fields have working defaults; a TOML
/// file can override any subset of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// File extension (without the dot) that marks a script file.
    pub script_extension: String,
    /// Poll interval of the file watcher, in milliseconds. Also the
    /// coalescing window for repeated change events on one path.
    pub poll_interval_ms: u64,
    /// Retry ceiling for the bulk load's dependency-resolution passes.
    pub dependency_passes: u32,
    /// Directory names never crawled or reported by the watcher.
    pub ignored_dirs: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            script_extension: "ember".to_string(),
            poll_interval_ms: 500,
            dependency_passes: 10,
            ignored_dirs: vec![".git".to_string(), ".svn".to_string(), ".hg".to_string()],
        }
    }
}

impl RuntimeConfig {
    pub fn from_file(path: &Path) -> ReloadResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| ReloadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ReloadError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// True if `name` is one of the directories the crawler and watcher
    /// skip. Comparison is case-insensitive, matching path routing.
    pub fn is_ignored_dir(&self, name: &str) -> bool {
        self.ignored_dirs
            .iter()
            .any(|dir| dir.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.script_extension, "ember");
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.dependency_passes, 10);
        assert!(config.is_ignored_dir(".git"));
        assert!(config.is_ignored_dir(".GIT"));
        assert!(!config.is_ignored_dir("scripts"));
    }

    #[test]
    fn test_from_file_overrides_subset() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            "poll_interval_ms = 100\nscript_extension = \"es\"\n"
        )
        .expect("write config");

        let config = RuntimeConfig::from_file(file.path()).expect("load config");
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.script_extension, "es");
        // Unset fields keep their defaults.
        assert_eq!(config.dependency_passes, 10);
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_malformed_toml_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "poll_interval_ms = \"not a number\"\n").expect("write config");

        let err = RuntimeConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ReloadError::Config { .. }));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let err = RuntimeConfig::from_file(Path::new("/nonexistent/reload.toml")).unwrap_err();
        assert!(matches!(err, ReloadError::Io { .. }));
    }
}
