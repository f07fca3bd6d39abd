//! Ownership and mode reconciliation after the database has been touched.
//!
//! Nothing in here aborts the run. Every failure is logged and counted in the
//! [`ReconcileReport`]; re-running the tool repeats the same steps.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::{lchown, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::context::DeploymentContext;
use crate::ports::{Accounts, ContainerRuntime, Ownership, ServiceManager};
use crate::profile::{PermissionStrategy, ServiceTarget};

pub const DATABASE_DIR_MODE: u32 = 0o775;
pub const DATABASE_FILE_MODE: u32 = 0o664;
pub const SERVER_PROCESS_NAME: &str = "Plex Media Server";
pub const DEFAULT_SERVICE_ACCOUNT: &str = "plex";
pub const COMMUNITY_UID_VAR: &str = "PUID";
pub const COMMUNITY_GID_VAR: &str = "PGID";
pub const COMMUNITY_DEFAULT_ID: u32 = 911;
pub const OFFICIAL_UID_VAR: &str = "PLEX_UID";
pub const OFFICIAL_GID_VAR: &str = "PLEX_GID";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub owner: Option<Ownership>,
    pub chown_failures: usize,
    pub removed_side_files: Vec<PathBuf>,
    pub mode_failures: usize,
}

pub struct PermissionReconciler<'a> {
    services: &'a dyn ServiceManager,
    containers: &'a dyn ContainerRuntime,
    accounts: &'a dyn Accounts,
}

impl<'a> PermissionReconciler<'a> {
    #[must_use]
    pub fn new(
        services: &'a dyn ServiceManager,
        containers: &'a dyn ContainerRuntime,
        accounts: &'a dyn Accounts,
    ) -> Self {
        Self { services, containers, accounts }
    }

    pub fn reconcile(&self, context: &DeploymentContext) -> ReconcileReport {
        let (owner, tree) = self.target(context);
        apply_ownership(context, owner, &tree)
    }

    /// The owner to enforce and the tree it applies to: `Library/` for host
    /// installs, the whole config root for containers.
    #[must_use]
    pub fn target(&self, context: &DeploymentContext) -> (Option<Ownership>, PathBuf) {
        match context.profile().permission_strategy() {
            PermissionStrategy::HostOwner => {
                let library = context.library_dir();
                let observed = fs::metadata(&library)
                    .map(|metadata| Ownership { uid: metadata.uid(), gid: metadata.gid() })
                    .ok();
                let unit = match context.profile().service_target() {
                    ServiceTarget::Unit(unit) => Some(unit),
                    ServiceTarget::Container(_) => None,
                };
                (self.host_owner(observed, unit), library)
            }
            PermissionStrategy::CommunityEnv => {
                let owner = community_owner(&self.container_env(context));
                (Some(owner), context.config_root().to_path_buf())
            }
            PermissionStrategy::OfficialEnv => {
                let observed = fs::metadata(context.config_root())
                    .map(|metadata| Ownership { uid: metadata.uid(), gid: metadata.gid() })
                    .ok();
                let owner = official_owner(&self.container_env(context), observed);
                (owner, context.config_root().to_path_buf())
            }
        }
    }

    /// Owner of the library directory unless it is root or unknown; then the
    /// account the service runs as.
    #[must_use]
    pub fn host_owner(&self, observed: Option<Ownership>, unit: Option<&str>) -> Option<Ownership> {
        if let Some(owner) = observed.filter(|owner| owner.uid != 0) {
            return Some(owner);
        }

        let account = self.service_account(unit);
        match self.accounts.lookup_user(&account) {
            Ok(Some(owner)) => {
                debug!(%account, %owner, "resolved service account");
                Some(owner)
            }
            Ok(None) => {
                warn!(%account, "service account does not exist");
                None
            }
            Err(err) => {
                warn!(%account, error = %format!("{err:#}"), "account lookup failed");
                None
            }
        }
    }

    fn service_account(&self, unit: Option<&str>) -> String {
        let configured = unit.and_then(|unit| match self.services.run_as_user(unit) {
            Ok(user) => user,
            Err(err) => {
                debug!(unit, error = %format!("{err:#}"), "unit user not available");
                None
            }
        });
        let running = || match self.services.process_owner(SERVER_PROCESS_NAME) {
            Ok(user) => user,
            Err(err) => {
                debug!(error = %format!("{err:#}"), "process owner not available");
                None
            }
        };

        configured
            .or_else(running)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT.to_string())
    }

    fn container_env(&self, context: &DeploymentContext) -> BTreeMap<String, String> {
        let Some(container) = context.profile().container() else {
            return BTreeMap::new();
        };
        self.containers.env(container).unwrap_or_else(|err| {
            warn!(%container, error = %format!("{err:#}"), "could not read container environment");
            BTreeMap::new()
        })
    }
}

/// Chown `tree` when an owner is known, then clear side files and fix
/// modes either way.
pub fn apply_ownership(
    context: &DeploymentContext,
    owner: Option<Ownership>,
    tree: &Path,
) -> ReconcileReport {
    let mut report = ReconcileReport { owner, ..ReconcileReport::default() };
    match owner {
        Some(owner) => {
            report.chown_failures = chown_tree(tree, owner);
            info!(
                %owner,
                tree = %tree.display(),
                failures = report.chown_failures,
                "ownership reconciled"
            );
        }
        None => warn!(tree = %tree.display(), "no UID/GID could be determined, skipping chown"),
    }

    report.removed_side_files = remove_side_files(context);
    report.mode_failures = normalize_modes(context);
    report
}

/// `PUID`/`PGID`, each falling back to 911 when unset or not numeric.
#[must_use]
pub fn community_owner(env: &BTreeMap<String, String>) -> Ownership {
    let id = |name: &str| match env.get(name).map(|value| value.trim().parse::<u32>()) {
        Some(Ok(value)) => value,
        Some(Err(_)) => {
            warn!(variable = name, "not a numeric id, using {COMMUNITY_DEFAULT_ID}");
            COMMUNITY_DEFAULT_ID
        }
        None => COMMUNITY_DEFAULT_ID,
    };
    Ownership { uid: id(COMMUNITY_UID_VAR), gid: id(COMMUNITY_GID_VAR) }
}

/// `PLEX_UID`/`PLEX_GID` when both parse, else the observed owner of the
/// config root.
#[must_use]
pub fn official_owner(
    env: &BTreeMap<String, String>,
    observed: Option<Ownership>,
) -> Option<Ownership> {
    let id = |name: &str| env.get(name).and_then(|value| value.trim().parse::<u32>().ok());
    match (id(OFFICIAL_UID_VAR), id(OFFICIAL_GID_VAR)) {
        (Some(uid), Some(gid)) => Some(Ownership { uid, gid }),
        _ => observed,
    }
}

/// Recursively chown `root` without following symlinks. Returns the number of
/// entries that could not be changed.
pub fn chown_tree(root: &Path, owner: Ownership) -> usize {
    let mut failures = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let result = entry
            .map_err(std::io::Error::from)
            .and_then(|entry| lchown(entry.path(), Some(owner.uid), Some(owner.gid)));
        if let Err(err) = result {
            if failures == 0 {
                warn!(root = %root.display(), %owner, error = %err, "chown failed");
            }
            failures += 1;
        }
    }
    failures
}

pub fn remove_side_files(context: &DeploymentContext) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for side in context.side_files() {
        if !side.exists() {
            continue;
        }
        match fs::remove_file(&side) {
            Ok(()) => removed.push(side),
            Err(err) => warn!(path = %side.display(), error = %err, "could not remove side file"),
        }
    }
    removed
}

/// Group-writable database directory and database-family files.
pub fn normalize_modes(context: &DeploymentContext) -> usize {
    let mut targets = vec![(context.database_dir().to_path_buf(), DATABASE_DIR_MODE)];
    targets.extend(
        context
            .family_files()
            .into_iter()
            .filter(|file| file.exists())
            .map(|file| (file, DATABASE_FILE_MODE)),
    );

    let mut failures = 0;
    for (path, mode) in targets {
        if let Err(err) = fs::set_permissions(&path, fs::Permissions::from_mode(mode)) {
            warn!(
                path = %path.display(),
                mode = %format!("{mode:o}"),
                error = %err,
                "chmod failed"
            );
            failures += 1;
        }
    }
    failures
}
