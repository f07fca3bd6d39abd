use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};

use crate::backup::CaptureTimestamp;
use crate::context::{side_files_of, with_suffix, DeploymentContext, SIDE_FILE_SUFFIXES};
use crate::ports::{CommandOutput, Operator, SqlShell};
use crate::FatalError;

pub const INTEGRITY_OK: &str = "ok";
pub const INTEGRITY_CHECK: &str = "PRAGMA integrity_check;";
pub const QUICK_CHECK: &str = "PRAGMA quick_check;";
pub const REINDEX: &str = "REINDEX;";
pub const VACUUM: &str = "VACUUM;";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityVerdict {
    Ok,
    NotOk,
}

impl IntegrityVerdict {
    /// OK only when the output is exactly the `ok` token. Trailing line
    /// terminators are ignored; any other text, including extra lines or a
    /// different spelling, is NOT OK.
    #[must_use]
    pub fn from_output(output: &str) -> Self {
        if output.trim_end_matches(['\r', '\n']) == INTEGRITY_OK {
            Self::Ok
        } else {
            Self::NotOk
        }
    }

    #[must_use]
    pub fn from_command(output: &CommandOutput) -> Self {
        if output.success {
            Self::from_output(&output.stdout)
        } else {
            Self::NotOk
        }
    }

    #[must_use]
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NotOk => "NOT OK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    pub integrity: CommandOutput,
    pub quick: CommandOutput,
    pub verdict: IntegrityVerdict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    Healthy { maintained: bool },
    Rebuilt { broken_file: PathBuf, post_verdict: IntegrityVerdict },
    CorruptKept,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rebuild {
    pub broken_file: PathBuf,
    pub post_check: CommandOutput,
    pub post_verdict: IntegrityVerdict,
}

pub struct RepairEngine<'a> {
    shell: &'a dyn SqlShell,
}

impl<'a> RepairEngine<'a> {
    #[must_use]
    pub fn new(shell: &'a dyn SqlShell) -> Self {
        Self { shell }
    }

    /// Full `integrity_check` against the live database file.
    ///
    /// # Errors
    /// Returns an error when the repair binary cannot be executed.
    pub fn integrity_check(&self, context: &DeploymentContext) -> Result<CommandOutput> {
        self.statement(context, context.database_file(), INTEGRITY_CHECK)
    }

    /// Run both checks and show their output verbatim.
    ///
    /// # Errors
    /// Returns an error when the repair binary cannot be executed or output
    /// cannot be shown.
    pub fn diagnose(
        &self,
        context: &DeploymentContext,
        operator: &mut dyn Operator,
    ) -> Result<Diagnosis> {
        let integrity = self.integrity_check(context)?;
        operator.show(&format!("integrity_check:\n{}", integrity.combined()))?;
        let quick = self.statement(context, context.database_file(), QUICK_CHECK)?;
        operator.show(&format!("quick_check:\n{}", quick.combined()))?;

        let verdict = IntegrityVerdict::from_command(&integrity);
        info!(verdict = verdict.as_str(), "integrity verdict");
        Ok(Diagnosis { integrity, quick, verdict })
    }

    /// Diagnose, then offer the branch the verdict calls for.
    ///
    /// # Errors
    /// Returns an error when diagnosis fails or an accepted rebuild fails.
    pub fn run(
        &self,
        context: &DeploymentContext,
        operator: &mut dyn Operator,
        timestamp: &CaptureTimestamp,
    ) -> Result<(Diagnosis, RepairOutcome)> {
        let diagnosis = self.diagnose(context, operator)?;

        let outcome = if diagnosis.verdict.is_ok() {
            if operator.confirm("Database is healthy. Run REINDEX and VACUUM now?")? {
                let maintained = self.light_maintenance(context);
                RepairOutcome::Healthy { maintained }
            } else {
                info!("light maintenance skipped by operator");
                RepairOutcome::Healthy { maintained: false }
            }
        } else if operator.confirm("Integrity check failed. Dump and rebuild the database?")? {
            let rebuild = self.rebuild(context, timestamp)?;
            operator.show(&format!(
                "integrity_check after rebuild:\n{}",
                rebuild.post_check.combined()
            ))?;
            operator.show(&format!("Corrupt original kept at {}", rebuild.broken_file.display()))?;
            RepairOutcome::Rebuilt {
                broken_file: rebuild.broken_file,
                post_verdict: rebuild.post_verdict,
            }
        } else {
            warn!("rebuild declined; continuing with the corrupt database untouched");
            RepairOutcome::CorruptKept
        };

        Ok((diagnosis, outcome))
    }

    /// `REINDEX` then `VACUUM`. Failures are logged and reported as `false`.
    pub fn light_maintenance(&self, context: &DeploymentContext) -> bool {
        let mut all_ok = true;
        for statement in [REINDEX, VACUUM] {
            match self.statement(context, context.database_file(), statement) {
                Ok(output) if output.success => info!(statement, "maintenance step completed"),
                Ok(output) => {
                    all_ok = false;
                    warn!(statement, output = %output.combined(), "maintenance step failed");
                }
                Err(err) => {
                    all_ok = false;
                    warn!(statement, error = %format!("{err:#}"), "maintenance step failed");
                }
            }
        }
        all_ok
    }

    /// Set the database aside, dump it to SQL, and replay the dump into a
    /// fresh file at the original path.
    ///
    /// # Errors
    /// Returns [`FatalError::Rebuild`] when the database cannot be set aside or
    /// replay fails, and [`FatalError::Dump`] when the dump fails.
    pub fn rebuild(
        &self,
        context: &DeploymentContext,
        timestamp: &CaptureTimestamp,
    ) -> Result<Rebuild> {
        let database = context.database_file();
        let broken = context.sibling("broken", timestamp.as_str(), "db");
        set_aside(database, &broken)?;
        info!(broken = %broken.display(), "corrupt database set aside");

        let dump = context.sibling("dump", timestamp.as_str(), "sql");
        let dumped = self
            .shell
            .run(
                context.repair_binary(),
                &broken,
                &[format!(".output {}", dot_command_arg(&dump)), ".dump".to_string()],
            )
            .map_err(|err| dump_failure(&format!("{err:#}"), &dump, &broken))?;
        if !dumped.success {
            let detail = dumped.combined();
            let cause = if detail.is_empty() {
                dumped.status()
            } else {
                format!("{}: {detail}", dumped.status())
            };
            return Err(dump_failure(&cause, &dump, &broken).into());
        }
        let dump_size = fs::metadata(&dump).map(|metadata| metadata.len()).unwrap_or(0);
        if dump_size == 0 {
            return Err(dump_failure("no SQL was written", &dump, &broken).into());
        }
        info!(dump = %dump.display(), bytes = dump_size, "database dumped");

        let replayed = self
            .shell
            .run(
                context.repair_binary(),
                database,
                &[format!(".read {}", dot_command_arg(&dump))],
            )
            .map_err(|err| FatalError::Rebuild(format!("{err:#}")))?;
        if !replayed.success {
            return Err(FatalError::Rebuild(replayed.combined()).into());
        }
        info!(database = %database.display(), "database rebuilt from dump");

        remove_if_exists(&dump);
        for side in side_files_of(database) {
            remove_if_exists(&side);
        }

        let post_check = self.integrity_check(context)?;
        let post_verdict = IntegrityVerdict::from_command(&post_check);
        info!(verdict = post_verdict.as_str(), "integrity verdict after rebuild");
        Ok(Rebuild { broken_file: broken, post_check, post_verdict })
    }

    fn statement(
        &self,
        context: &DeploymentContext,
        database: &Path,
        statement: &str,
    ) -> Result<CommandOutput> {
        self.shell.run(context.repair_binary(), database, &[statement.to_string()])
    }
}

/// Names what the operator has left to salvage by hand: any partial dump and
/// the set-aside original.
fn dump_failure(cause: &str, dump: &Path, broken: &Path) -> FatalError {
    let partial = match fs::metadata(dump) {
        Ok(metadata) if metadata.len() > 0 => {
            format!("partial dump left at {} ({} bytes)", dump.display(), metadata.len())
        }
        _ => format!("no dump at {}", dump.display()),
    };
    FatalError::Dump(format!(
        "{cause}; {partial}; corrupt database kept at {}",
        broken.display()
    ))
}

/// Rename the database and whichever side files exist to the `broken` name.
fn set_aside(database: &Path, broken: &Path) -> Result<(), FatalError> {
    fs::rename(database, broken).map_err(|err| {
        FatalError::Rebuild(format!(
            "failed to rename {} to {}: {err}",
            database.display(),
            broken.display()
        ))
    })?;
    for suffix in SIDE_FILE_SUFFIXES {
        let side = with_suffix(database, suffix);
        if side.exists() {
            let target = with_suffix(broken, suffix);
            fs::rename(&side, &target).map_err(|err| {
                FatalError::Rebuild(format!("failed to move {}: {err}", side.display()))
            })?;
        }
    }
    Ok(())
}

fn remove_if_exists(path: &Path) {
    if path.exists() {
        if let Err(err) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %err, "failed to remove file");
        }
    }
}

/// Quote a path for a sqlite3 dot-command argument.
#[must_use]
pub fn dot_command_arg(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{raw}\"")
}
