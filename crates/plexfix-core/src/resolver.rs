//! Turns the operator's menu choice into a verified [`DeploymentContext`].
//!
//! Every path the context carries is checked before it is returned, and the
//! database directory is checked before any question about the repair binary
//! is asked, so a wrong config root fails fast.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::context::{
    database_dir_for, is_executable, require_dir, DeploymentContext, CONTAINER_CONFIG_MOUNT,
    PLUGIN_DIR_PREFIX, REPAIR_BINARY_NAME,
};
use crate::ports::{ContainerRuntime, MountInfo, Operator};
use crate::profile::{
    ContainerId, CustomTarget, Detected, Profile, ProfileKind, DEFAULT_CONTAINER_NAME,
    DEFAULT_SERVICE_UNIT,
};
use crate::settings::{Settings, HOST_PLUGIN_ROOT};
use crate::FatalError;

const STAGED_BINARY_MODE: u32 = 0o755;

pub struct Resolver<'a> {
    containers: &'a dyn ContainerRuntime,
    settings: &'a Settings,
}

impl<'a> Resolver<'a> {
    #[must_use]
    pub fn new(containers: &'a dyn ContainerRuntime, settings: &'a Settings) -> Self {
        Self { containers, settings }
    }

    /// # Errors
    /// Returns a [`FatalError`] when a required path is missing or the repair
    /// binary cannot be located or staged, and an error when input ends.
    pub fn resolve(&self, operator: &mut dyn Operator) -> Result<DeploymentContext> {
        let labels = ProfileKind::ALL.map(ProfileKind::menu_label);
        let choice = operator.select("Select the Plex installation type", &labels)?;
        let kind = ProfileKind::ALL
            .get(choice)
            .copied()
            .ok_or_else(|| anyhow!("menu choice {choice} out of range"))?;

        let context = match kind {
            ProfileKind::BareMetal => self.resolve_bare(
                Profile::BareMetal { unit: DEFAULT_SERVICE_UNIT.to_string() },
                operator,
            )?,
            ProfileKind::Official => {
                let container = self.container_id(kind, operator)?;
                self.resolve_container(Profile::Official { container }, operator)?
            }
            ProfileKind::Community => {
                let container = self.container_id(kind, operator)?;
                self.resolve_container(Profile::Community { container }, operator)?
            }
            ProfileKind::Custom => {
                if operator.confirm("Does this Plex install run in a container?")? {
                    let container = self.container_id(kind, operator)?;
                    self.resolve_container(
                        Profile::Custom(CustomTarget::Container(container)),
                        operator,
                    )?
                } else {
                    let unit = operator.ask("Service unit name", DEFAULT_SERVICE_UNIT)?;
                    let unit = non_blank(&unit, DEFAULT_SERVICE_UNIT);
                    self.resolve_bare(Profile::Custom(CustomTarget::Bare { unit }), operator)?
                }
            }
        };

        info!(
            profile = context.profile().label(),
            database = %context.database_file().display(),
            repair_binary = %context.repair_binary().display(),
            "deployment resolved"
        );
        Ok(context)
    }

    fn resolve_bare(
        &self,
        profile: Profile,
        operator: &mut dyn Operator,
    ) -> Result<DeploymentContext> {
        let default_root = self.settings.bare_metal_config_root.to_string_lossy().into_owned();
        let config_root = PathBuf::from(operator.ask("Plex config root", &default_root)?.trim());
        require_dir("database directory", &database_dir_for(&config_root))?;

        let binary = if let Some(found) = find_plugin_binary(&self.settings.host_plugin_root) {
            info!(path = %found.display(), "found repair binary");
            found
        } else {
            warn!(
                root = %self.settings.host_plugin_root.display(),
                "no {PLUGIN_DIR_PREFIX}* directory with {REPAIR_BINARY_NAME}"
            );
            let answer = operator.ask(&format!("Path to {REPAIR_BINARY_NAME}"), "")?;
            let path = PathBuf::from(answer.trim());
            if answer.trim().is_empty() || !path.is_file() {
                return Err(FatalError::MissingPath { what: "repair binary", path }.into());
            }
            path
        };

        Ok(DeploymentContext::verified(profile, config_root, binary)?)
    }

    fn resolve_container(
        &self,
        profile: Profile,
        operator: &mut dyn Operator,
    ) -> Result<DeploymentContext> {
        let container = profile
            .container()
            .cloned()
            .ok_or_else(|| anyhow!("profile {} has no container", profile.label()))?;

        let config_root = match self.config_mount(&container) {
            Some(mount) => {
                let source = mount.source.display();
                match mount.read_write {
                    Some(true) => {}
                    Some(false) => {
                        warn!(%source, "{CONTAINER_CONFIG_MOUNT} is mounted read-only");
                    }
                    None => {
                        warn!(
                            %source,
                            "could not tell whether {CONTAINER_CONFIG_MOUNT} is writable"
                        );
                    }
                }
                info!(%container, %source, "config root taken from container mounts");
                mount.source
            }
            None => {
                let default_root =
                    self.settings.container_config_root.to_string_lossy().into_owned();
                let answer = operator.ask(
                    &format!("Host path mounted at {CONTAINER_CONFIG_MOUNT} in {container}"),
                    &default_root,
                )?;
                PathBuf::from(answer.trim())
            }
        };
        require_dir("database directory", &database_dir_for(&config_root))?;

        let binary = self.stage_repair_binary(&container)?;
        Ok(DeploymentContext::verified(profile, config_root, binary)?)
    }

    fn container_id(&self, kind: ProfileKind, operator: &mut dyn Operator) -> Result<ContainerId> {
        let detected = self.detect_container(kind);
        if detected.is_fallback() {
            info!(default = %detected.value, "no matching container found, offering default name");
        } else {
            info!(container = %detected.value, "detected container by image");
        }
        let answer = operator.ask("Container name", detected.value.as_str())?;
        Ok(ContainerId::new(non_blank(&answer, detected.value.as_str())))
    }

    /// First container built from the variant's images, else the default name.
    #[must_use]
    pub fn detect_container(&self, kind: ProfileKind) -> Detected<ContainerId> {
        let images = kind.images();
        if !images.is_empty() {
            match self.containers.find_by_image(images) {
                Ok(Some(container)) => return Detected::detected(container),
                Ok(None) => {}
                Err(err) => warn!(error = %format!("{err:#}"), "container lookup by image failed"),
            }
        }
        Detected::fallback(ContainerId::new(DEFAULT_CONTAINER_NAME))
    }

    fn config_mount(&self, container: &ContainerId) -> Option<MountInfo> {
        match self.containers.mounts(container) {
            Ok(mounts) => mounts
                .into_iter()
                .find(|mount| mount.destination.trim_end_matches('/') == CONTAINER_CONFIG_MOUNT),
            Err(err) => {
                warn!(
                    %container,
                    error = %format!("{err:#}"),
                    "could not inspect container mounts"
                );
                None
            }
        }
    }

    /// Reuse the staged copy, or copy the binary out of the container.
    ///
    /// A stopped container is started for the copy and stopped again afterwards.
    ///
    /// # Errors
    /// Returns [`FatalError::PluginDirNotFound`] when the container has no
    /// plugin directory holding the binary and [`FatalError::Staging`] when the
    /// runtime calls or the host copy fail.
    pub fn stage_repair_binary(&self, container: &ContainerId) -> Result<PathBuf, FatalError> {
        let staged = self.settings.staged_binary_path(container);
        if is_executable(&staged) {
            info!(path = %staged.display(), "reusing staged repair binary");
            return Ok(staged);
        }

        let staging = |err: anyhow::Error| FatalError::Staging {
            container: container.to_string(),
            detail: format!("{err:#}"),
        };
        let was_running = self.containers.is_running(container).map_err(staging)?;
        if !was_running {
            info!(%container, "starting container to copy the repair binary out");
            self.containers.start(container).map_err(staging)?;
        }

        let copied = self.copy_binary_out(container, &staged);

        if !was_running {
            if let Err(err) = self.containers.stop(container) {
                warn!(
                    %container,
                    error = %format!("{err:#}"),
                    "could not return container to its stopped state"
                );
            }
        }
        copied?;
        info!(path = %staged.display(), "staged repair binary");
        Ok(staged)
    }

    fn copy_binary_out(&self, container: &ContainerId, staged: &Path) -> Result<(), FatalError> {
        let staging = |err: anyhow::Error| FatalError::Staging {
            container: container.to_string(),
            detail: format!("{err:#}"),
        };

        let candidates = self
            .containers
            .find_files(container, HOST_PLUGIN_ROOT, REPAIR_BINARY_NAME)
            .map_err(staging)?;
        let source = latest_plugin_binary(&candidates)
            .ok_or_else(|| FatalError::PluginDirNotFound(container.to_string()))?;

        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))
                .map_err(staging)?;
        }
        self.containers.copy_out(container, source, staged).map_err(staging)?;
        fs::set_permissions(staged, fs::Permissions::from_mode(STAGED_BINARY_MODE))
            .with_context(|| format!("failed to mark {} executable", staged.display()))
            .map_err(staging)?;
        Ok(())
    }
}

/// `root/<plexmediaserver*>/Plex SQLite` for the lexicographically latest
/// plugin directory that contains the binary.
#[must_use]
pub fn find_plugin_binary(root: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(PLUGIN_DIR_PREFIX))
        .map(|entry| entry.path().join(REPAIR_BINARY_NAME))
        .filter(|candidate| candidate.is_file())
        .max()
}

/// Pick the in-container binary under the latest plugin directory.
fn latest_plugin_binary(candidates: &[String]) -> Option<&str> {
    candidates
        .iter()
        .map(String::as_str)
        .filter(|candidate| {
            Path::new(candidate)
                .parent()
                .and_then(Path::file_name)
                .is_some_and(|dir| dir.to_string_lossy().starts_with(PLUGIN_DIR_PREFIX))
        })
        .max()
}

/// The trimmed answer, or `default` when nothing but whitespace was given.
fn non_blank(answer: &str, default: &str) -> String {
    let answer = answer.trim();
    if answer.is_empty() { default } else { answer }.to_string()
}
