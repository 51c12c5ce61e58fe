//! Session options loaded from a JSON file

use crate::error::{ErrorCategory, ErrorKind, Result, VaultError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// How the previous container is kept when a save overwrites it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    /// No backup.
    #[default]
    None,
    /// One `<stem>.ibak` next to the container, replaced on every save.
    Single,
    /// Numbered `<stem>_NNN.ibak` files, oldest deleted past `max_backups`.
    Incremental,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub mode: BackupMode,

    /// Maximum number of incremental backups to retain
    pub max_backups: usize,

    /// Backup directory; defaults to the container's own directory
    pub backup_dir: Option<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            mode: BackupMode::None,
            max_backups: 3,
            backup_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub backup: BackupConfig,

    /// Append entries added since the last save instead of rewriting the
    /// whole container, when nothing earlier was removed or replaced.
    pub append_on_save: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            backup: BackupConfig::default(),
            append_on_save: true,
        }
    }
}

impl VaultConfig {
    /// Load options from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(VaultError::with_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    format!("failed to read config {}", path.display()),
                    e,
                ));
            }
        };
        serde_json::from_str(&text).map_err(|e| {
            VaultError::with_source(
                ErrorCategory::User,
                ErrorKind::InvalidConfig,
                format!("malformed config {}", path.display()),
                e,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = VaultConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(cfg, VaultConfig::default());
        assert!(cfg.append_on_save);
        assert_eq!(cfg.backup.mode, BackupMode::None);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(&path, r#"{"backup": {"mode": "incremental", "max_backups": 5}}"#).unwrap();

        let cfg = VaultConfig::load(&path).unwrap();
        assert_eq!(cfg.backup.mode, BackupMode::Incremental);
        assert_eq!(cfg.backup.max_backups, 5);
        assert!(cfg.backup.backup_dir.is_none());
        assert!(cfg.append_on_save);
    }

    #[test]
    fn test_malformed_file_is_invalid_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(&path, "{ not json").unwrap();

        let err = VaultConfig::load(&path).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_unknown_backup_mode_is_invalid_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(&path, r#"{"backup": {"mode": "hourly"}}"#).unwrap();

        let err = VaultConfig::load(&path).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_unreadable_path_is_io_error() {
        let dir = TempDir::new().unwrap();

        // A directory exists but cannot be read as a file.
        let err = VaultConfig::load(dir.path()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
        assert_eq!(err.category, ErrorCategory::Internal);
        assert!(err.message().contains("failed to read config"));
    }

    #[test]
    fn test_serialized_form() {
        let json = serde_json::to_value(VaultConfig::default()).unwrap();
        assert_eq!(json["backup"]["mode"], "none");
        assert_eq!(json["append_on_save"], true);
    }
}
