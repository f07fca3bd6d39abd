use std::path::{Path, PathBuf};

use crate::context::REPAIR_BINARY_NAME;
use crate::profile::ContainerId;

pub const DEFAULT_BACKUP_DIR_NAME: &str = "plex-db-backups";
pub const DEFAULT_BARE_METAL_CONFIG_ROOT: &str = "/var/lib/plexmediaserver";
pub const DEFAULT_CONTAINER_CONFIG_ROOT: &str = "/opt/plex/config";
pub const HOST_PLUGIN_ROOT: &str = "/usr/lib";
pub const CONTAINER_LOG_SINCE: &str = "10m";
pub const CONTAINER_LOG_TAIL: usize = 100;
pub const APP_LOG_TAIL: usize = 50;
pub const JOURNAL_HINT_LINES: usize = 100;

const STAGED_BINARY_DIR: &str = "bin";

/// Run-wide knobs. Built once by the binary and shared read-only by every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backup_root: PathBuf,
    pub host_plugin_root: PathBuf,
    pub bare_metal_config_root: PathBuf,
    pub container_config_root: PathBuf,
    pub container_log_since: String,
    pub container_log_tail: usize,
    pub app_log_tail: usize,
}

impl Settings {
    #[must_use]
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        Self {
            backup_root: backup_root.into(),
            host_plugin_root: PathBuf::from(HOST_PLUGIN_ROOT),
            bare_metal_config_root: PathBuf::from(DEFAULT_BARE_METAL_CONFIG_ROOT),
            container_config_root: PathBuf::from(DEFAULT_CONTAINER_CONFIG_ROOT),
            container_log_since: CONTAINER_LOG_SINCE.to_string(),
            container_log_tail: CONTAINER_LOG_TAIL,
            app_log_tail: APP_LOG_TAIL,
        }
    }

    /// Host location of the repair binary copied out of `container`.
    #[must_use]
    pub fn staged_binary_path(&self, container: &ContainerId) -> PathBuf {
        self.staging_dir().join(container.as_str()).join(REPAIR_BINARY_NAME)
    }

    fn staging_dir(&self) -> PathBuf {
        self.backup_root.join(STAGED_BINARY_DIR)
    }

    #[must_use]
    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }
}
