use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use crate::backup::{self, CaptureTimestamp};
use crate::permissions::{PermissionReconciler, ReconcileReport};
use crate::ports::{Accounts, ContainerRuntime, Operator, ServiceManager, SqlShell};
use crate::postcheck::{LogSurfacer, PostCheck};
use crate::repair::{IntegrityVerdict, RepairEngine, RepairOutcome};
use crate::resolver::Resolver;
use crate::service::ServiceController;
use crate::settings::Settings;

/// The external systems a run drives.
#[derive(Clone, Copy)]
pub struct Toolkit<'a> {
    pub services: &'a dyn ServiceManager,
    pub containers: &'a dyn ContainerRuntime,
    pub shell: &'a dyn SqlShell,
    pub accounts: &'a dyn Accounts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub profile: &'static str,
    pub database: PathBuf,
    pub snapshot_dir: PathBuf,
    pub verdict: IntegrityVerdict,
    pub outcome: RepairOutcome,
    pub permissions: ReconcileReport,
    pub post_check: Option<IntegrityVerdict>,
}

pub struct Session<'a> {
    toolkit: Toolkit<'a>,
    settings: &'a Settings,
}

impl<'a> Session<'a> {
    #[must_use]
    pub fn new(toolkit: Toolkit<'a>, settings: &'a Settings) -> Self {
        Self { toolkit, settings }
    }

    /// Resolve, stop, back up, diagnose and repair, reconcile, start, then the
    /// optional post-check and log surfacing. Stages never overlap.
    ///
    /// # Errors
    /// Returns the first fatal condition; the service is left as it was at
    /// that point and any backup already taken is kept.
    pub fn run(&self, operator: &mut dyn Operator) -> Result<RunReport> {
        let Toolkit { services, containers, shell, accounts } = self.toolkit;

        let context = Resolver::new(containers, self.settings).resolve(operator)?;
        let controller = ServiceController::new(services, containers);
        controller.stop(&context)?;

        let timestamp = CaptureTimestamp::now()?;
        let snapshot = backup::create_snapshot(&context, self.settings.backup_root(), &timestamp)?;
        info!(
            directory = %snapshot.directory.display(),
            files = snapshot.manifest.files.len(),
            "backup verified"
        );
        operator.show(&format!("Backup written to {}", snapshot.directory.display()))?;

        let engine = RepairEngine::new(shell);
        let (diagnosis, outcome) = engine.run(&context, operator, &timestamp)?;

        let reconciler = PermissionReconciler::new(services, containers, accounts);
        let permissions = reconciler.reconcile(&context);
        controller.start(&context)?;

        let post_check =
            PostCheck { controller: &controller, engine: &engine, reconciler: &reconciler }
                .offer(&context, operator)?;
        LogSurfacer::new(containers, self.settings).surface(&context, operator)?;

        Ok(RunReport {
            profile: context.profile().label(),
            database: context.database_file().to_path_buf(),
            snapshot_dir: snapshot.directory,
            verdict: diagnosis.verdict,
            outcome,
            permissions,
            post_check,
        })
    }
}
