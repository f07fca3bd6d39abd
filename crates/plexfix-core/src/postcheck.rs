use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::context::DeploymentContext;
use crate::permissions::PermissionReconciler;
use crate::ports::{ContainerRuntime, Operator};
use crate::profile::ServiceTarget;
use crate::repair::{IntegrityVerdict, RepairEngine};
use crate::service::ServiceController;
use crate::settings::{Settings, JOURNAL_HINT_LINES};

pub const BACKUP_NOTE: &str = "The post-check relies on the backup taken at the start of this \
run; no new backup is made and only ownership and modes are touched.";

/// Optional second offline integrity pass after the service is back up.
pub struct PostCheck<'a> {
    pub controller: &'a ServiceController<'a>,
    pub engine: &'a RepairEngine<'a>,
    pub reconciler: &'a PermissionReconciler<'a>,
}

impl PostCheck<'_> {
    /// Returns `None` when the operator declines.
    ///
    /// # Errors
    /// Returns a fatal error when the service cannot be stopped or restarted,
    /// or when the repair binary cannot be executed.
    pub fn offer(
        &self,
        context: &DeploymentContext,
        operator: &mut dyn Operator,
    ) -> Result<Option<IntegrityVerdict>> {
        if !operator.confirm("Run an offline post-check (stops Plex again)?")? {
            info!("post-check skipped by operator");
            return Ok(None);
        }
        operator.show(BACKUP_NOTE)?;

        self.controller.stop(context)?;
        let output = self.engine.integrity_check(context)?;
        operator.show(&format!("post-check integrity_check:\n{}", output.combined()))?;
        let verdict = IntegrityVerdict::from_command(&output);
        info!(verdict = verdict.as_str(), "post-check verdict");

        self.reconciler.reconcile(context);
        self.controller.start(context)?;
        Ok(Some(verdict))
    }
}

pub struct LogSurfacer<'a> {
    containers: &'a dyn ContainerRuntime,
    settings: &'a Settings,
}

impl<'a> LogSurfacer<'a> {
    #[must_use]
    pub fn new(containers: &'a dyn ContainerRuntime, settings: &'a Settings) -> Self {
        Self { containers, settings }
    }

    /// Recent runtime logs (or a journal hint) and the tail of the app log.
    ///
    /// # Errors
    /// Returns an error only when output cannot be shown.
    pub fn surface(&self, context: &DeploymentContext, operator: &mut dyn Operator) -> Result<()> {
        match context.profile().service_target() {
            ServiceTarget::Container(container) => {
                let since = &self.settings.container_log_since;
                let tail = self.settings.container_log_tail;
                match self.containers.logs(container, since, tail) {
                    Ok(logs) => operator.show(&format!(
                        "Container logs for {container} (last {since}, up to {tail} lines):\n{}",
                        logs.trim_end()
                    ))?,
                    Err(err) => {
                        warn!(
                            %container,
                            error = %format!("{err:#}"),
                            "could not read container logs"
                        );
                    }
                }
            }
            ServiceTarget::Unit(unit) => {
                operator.show(&format!(
                    "Service logs: journalctl -u {unit} -n {JOURNAL_HINT_LINES}"
                ))?;
            }
        }

        let app_log = context.app_log();
        if !app_log.is_file() {
            info!(path = %app_log.display(), "application log not present");
            return Ok(());
        }
        match tail_lines(&app_log, self.settings.app_log_tail) {
            Ok(lines) => operator.show(&format!(
                "Last {} lines of {}:\n{}",
                self.settings.app_log_tail,
                app_log.display(),
                lines.trim_end()
            ))?,
            Err(err) => warn!(error = %format!("{err:#}"), "could not read application log"),
        }
        Ok(())
    }
}

/// Last `count` lines of `path`, decoded lossily.
///
/// # Errors
/// Returns an error when the file cannot be read.
pub fn tail_lines(path: &Path, count: usize) -> Result<String> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut window: VecDeque<Vec<u8>> = VecDeque::with_capacity(count + 1);
    loop {
        let mut line = Vec::new();
        let read = reader
            .read_until(b'\n', &mut line)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        window.push_back(line);
        if window.len() > count {
            window.pop_front();
        }
    }
    Ok(window.iter().map(|line| String::from_utf8_lossy(line)).collect())
}
