//! Offline maintenance of a Plex Media Server library database.
//!
//! The pipeline resolves a deployment profile, stops the owning service, takes a
//! verified backup, diagnoses (and optionally repairs) the database, reconciles
//! ownership and modes, restarts the service and surfaces logs. Every external
//! system is reached through the traits in [`ports`], so the stages themselves
//! never spawn processes.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub mod backup;
pub mod context;
pub mod permissions;
pub mod pipeline;
pub mod ports;
pub mod postcheck;
pub mod profile;
pub mod repair;
pub mod resolver;
pub mod service;
pub mod settings;

#[cfg(test)]
mod testkit;

pub use backup::{BackupManifest, BackupSnapshot, CaptureTimestamp};
pub use context::DeploymentContext;
pub use pipeline::{RunReport, Session, Toolkit};
pub use ports::{
    Accounts, CommandOutput, ContainerRuntime, MountInfo, Operator, Ownership, ServiceManager,
    SqlShell,
};
pub use profile::{ContainerId, CustomTarget, Detected, DetectionSource, Profile, ProfileKind};
pub use repair::{IntegrityVerdict, RepairOutcome};
pub use settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Stop,
    Start,
}

impl ServiceAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Start => "start",
        }
    }
}

impl Display for ServiceAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conditions that abort the run. Anything not listed here is a warning.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("{what} not found: {}", path.display())]
    MissingPath { what: &'static str, path: PathBuf },
    #[error("database file is not readable: {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("repair binary is not executable: {}", .0.display())]
    NotExecutable(PathBuf),
    #[error("failed to {action} {target}: {detail}")]
    ServiceControl { action: ServiceAction, target: String, detail: String },
    #[error("could not stage the repair binary from container {container}: {detail}")]
    Staging { container: String, detail: String },
    #[error("no plexmediaserver plugin directory with a repair binary inside container {0}")]
    PluginDirNotFound(String),
    #[error("backup failed: {0}")]
    Backup(String),
    #[error("database dump failed: {0}")]
    Dump(String),
    #[error("rebuild from dump failed: {0}")]
    Rebuild(String),
    #[error("input closed before a required answer was given")]
    InputClosed,
}
