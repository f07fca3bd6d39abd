use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use plexfix_core::{ContainerId, ContainerRuntime, MountInfo};
use serde::Deserialize;
use tracing::warn;

use crate::command::{capture, check};

pub const DEFAULT_CONTAINER_CLI: &str = "docker";

/// A docker-compatible CLI (`docker`, `podman`, ...).
#[derive(Debug, Clone)]
pub struct ContainerCli {
    program: String,
}

impl Default for ContainerCli {
    fn default() -> Self {
        Self::new(DEFAULT_CONTAINER_CLI)
    }
}

impl ContainerCli {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut command = Command::new(&self.program);
        command.args(args);
        command
    }

    fn inspect(&self, container: &ContainerId, format: &str) -> Result<String> {
        let output = check(&mut self.command(["inspect", "--format", format, container.as_str()]))
            .with_context(|| format!("failed to inspect container {container}"))?;
        Ok(output.stdout)
    }
}

impl ContainerRuntime for ContainerCli {
    /// First container created from any of `images`. A listing that fails for
    /// one image moves on to the next; the error surfaces only when every
    /// listing failed.
    fn find_by_image(&self, images: &[&str]) -> Result<Option<ContainerId>> {
        let mut failures = Vec::new();
        for image in images {
            let filter = format!("ancestor={image}");
            let mut command =
                self.command(["ps", "-a", "--filter", filter.as_str(), "--format", "{{.Names}}"]);
            let output = match check(&mut command) {
                Ok(output) => output,
                Err(err) => {
                    warn!(image, error = %format!("{err:#}"), "could not list containers");
                    failures.push(err.context(format!("failed to list containers for {image}")));
                    continue;
                }
            };
            if let Some(name) = output.stdout.lines().map(str::trim).find(|name| !name.is_empty()) {
                return Ok(Some(ContainerId::new(name)));
            }
        }
        match failures.pop() {
            Some(err) if failures.len() + 1 == images.len() => Err(err),
            _ => Ok(None),
        }
    }

    fn is_running(&self, container: &ContainerId) -> Result<bool> {
        Ok(self.inspect(container, "{{.State.Running}}")?.trim() == "true")
    }

    fn start(&self, container: &ContainerId) -> Result<()> {
        check(&mut self.command(["start", container.as_str()]))?;
        Ok(())
    }

    fn stop(&self, container: &ContainerId) -> Result<()> {
        check(&mut self.command(["stop", container.as_str()]))?;
        Ok(())
    }

    fn mounts(&self, container: &ContainerId) -> Result<Vec<MountInfo>> {
        parse_mounts(&self.inspect(container, "{{json .Mounts}}")?)
    }

    fn env(&self, container: &ContainerId) -> Result<BTreeMap<String, String>> {
        parse_env(&self.inspect(container, "{{json .Config.Env}}")?)
    }

    fn find_files(&self, container: &ContainerId, root: &str, name: &str) -> Result<Vec<String>> {
        let output = check(&mut self.command([
            "exec",
            container.as_str(),
            "find",
            root,
            "-maxdepth",
            "2",
            "-type",
            "f",
            "-name",
            name,
        ]))?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn copy_out(&self, container: &ContainerId, source: &str, destination: &Path) -> Result<()> {
        let from = format!("{container}:{source}");
        let mut command = self.command(["cp", from.as_str()]);
        command.arg(destination);
        check(&mut command)?;
        Ok(())
    }

    fn logs(&self, container: &ContainerId, since: &str, tail: usize) -> Result<String> {
        let tail = tail.to_string();
        let output = capture(&mut self.command([
            "logs",
            "--since",
            since,
            "--tail",
            tail.as_str(),
            container.as_str(),
        ]))?;
        let mut text = output.stdout;
        text.push_str(&output.stderr);
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct RawMount {
    #[serde(rename = "Source", default)]
    source: String,
    #[serde(rename = "Destination", default)]
    destination: String,
    #[serde(rename = "RW")]
    read_write: Option<bool>,
}

/// Parse `{{json .Mounts}}`.
///
/// # Errors
/// Returns an error when the output is not a JSON mount list.
pub fn parse_mounts(raw: &str) -> Result<Vec<MountInfo>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let mounts: Vec<RawMount> =
        serde_json::from_str(trimmed).context("failed to parse container mounts")?;
    Ok(mounts
        .into_iter()
        .map(|mount| MountInfo {
            source: PathBuf::from(mount.source),
            destination: mount.destination,
            read_write: mount.read_write,
        })
        .collect())
}

/// Parse `{{json .Config.Env}}` into a map. Entries without `=` are skipped.
///
/// # Errors
/// Returns an error when the output is not a JSON string list.
pub fn parse_env(raw: &str) -> Result<BTreeMap<String, String>> {
    let entries: Option<Vec<String>> =
        serde_json::from_str(raw.trim()).context("failed to parse container environment")?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| {
            entry.split_once('=').map(|(key, value)| (key.to_string(), value.to_string()))
        })
        .collect())
}
