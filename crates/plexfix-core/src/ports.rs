//! Narrow interfaces to the systems this tool drives but does not own.
//!
//! Implementations shell out (see the `plexfix-host` crate); the pipeline only
//! ever sees these traits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::profile::ContainerId;

/// Captured result of one external invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { success: true, code: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    #[must_use]
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self { success: false, code: Some(1), stdout: String::new(), stderr: stderr.into() }
    }

    /// Stdout followed by stderr, for showing to the operator verbatim.
    #[must_use]
    pub fn combined(&self) -> String {
        match (self.stdout.trim_end().is_empty(), self.stderr.trim_end().is_empty()) {
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
            (false, false) => {
                format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end())
            }
        }
    }

    /// `exit code N`, or `killed by a signal` when there is no code.
    #[must_use]
    pub fn status(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => "killed by a signal".to_string(),
        }
    }
}

pub trait ServiceManager {
    /// # Errors
    /// Returns an error when the unit could not be stopped.
    fn stop(&self, unit: &str) -> Result<()>;

    /// # Errors
    /// Returns an error when the unit could not be started.
    fn start(&self, unit: &str) -> Result<()>;

    /// The `User=` of the unit definition, if one is configured.
    ///
    /// # Errors
    /// Returns an error when the unit definition cannot be queried.
    fn run_as_user(&self, unit: &str) -> Result<Option<String>>;

    /// Owner of a running process whose command line contains `process_name`.
    ///
    /// # Errors
    /// Returns an error when the process table cannot be read.
    fn process_owner(&self, process_name: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub source: PathBuf,
    pub destination: String,
    pub read_write: Option<bool>,
}

pub trait ContainerRuntime {
    /// First container (running or stopped) created from any of `images`.
    ///
    /// # Errors
    /// Returns an error when the runtime cannot list containers.
    fn find_by_image(&self, images: &[&str]) -> Result<Option<ContainerId>>;

    /// # Errors
    /// Returns an error when the container cannot be inspected.
    fn is_running(&self, container: &ContainerId) -> Result<bool>;

    /// # Errors
    /// Returns an error when the runtime refuses to start the container.
    fn start(&self, container: &ContainerId) -> Result<()>;

    /// # Errors
    /// Returns an error when the runtime refuses to stop the container.
    fn stop(&self, container: &ContainerId) -> Result<()>;

    /// # Errors
    /// Returns an error when the declared mounts cannot be inspected.
    fn mounts(&self, container: &ContainerId) -> Result<Vec<MountInfo>>;

    /// Environment declared in the container configuration.
    ///
    /// # Errors
    /// Returns an error when the configuration cannot be inspected.
    fn env(&self, container: &ContainerId) -> Result<BTreeMap<String, String>>;

    /// Paths of regular files named `name` at most two levels below `root`.
    ///
    /// # Errors
    /// Returns an error when the search cannot be executed in the container.
    fn find_files(&self, container: &ContainerId, root: &str, name: &str) -> Result<Vec<String>>;

    /// # Errors
    /// Returns an error when the copy fails.
    fn copy_out(&self, container: &ContainerId, source: &str, destination: &Path) -> Result<()>;

    /// # Errors
    /// Returns an error when the logs cannot be read.
    fn logs(&self, container: &ContainerId, since: &str, tail: usize) -> Result<String>;
}

/// A sqlite3-compatible command-line binary.
pub trait SqlShell {
    /// Run `statements` (SQL or dot-commands) against `database`.
    ///
    /// A non-zero exit is reported through [`CommandOutput::success`].
    ///
    /// # Errors
    /// Returns an error only when `binary` cannot be executed at all.
    fn run(&self, binary: &Path, database: &Path, statements: &[String]) -> Result<CommandOutput>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

impl std::fmt::Display for Ownership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

pub trait Accounts {
    /// UID and primary GID of a named account.
    ///
    /// # Errors
    /// Returns an error when the account database cannot be read.
    fn lookup_user(&self, name: &str) -> Result<Option<Ownership>>;
}

/// The human at the terminal.
pub trait Operator {
    /// Present numbered `options` and return the zero-based index picked.
    ///
    /// # Errors
    /// Returns an error when input ends before a valid choice is made.
    fn select(&mut self, title: &str, options: &[&str]) -> Result<usize>;

    /// Free-text question; an empty answer yields `default`.
    ///
    /// # Errors
    /// Returns an error when input ends.
    fn ask(&mut self, question: &str, default: &str) -> Result<String>;

    /// Yes/no question defaulting to no.
    ///
    /// # Errors
    /// Returns an error when input ends.
    fn confirm(&mut self, question: &str) -> Result<bool>;

    /// # Errors
    /// Returns an error when output cannot be written.
    fn show(&mut self, text: &str) -> Result<()>;
}
