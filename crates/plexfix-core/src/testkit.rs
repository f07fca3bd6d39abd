//! Scripted stand-ins for the external systems, shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::context::{database_dir_for, database_file_name, with_suffix, APP_LOG_SUBPATH};
use crate::ports::{
    Accounts, CommandOutput, ContainerRuntime, MountInfo, Operator, Ownership, ServiceManager,
    SqlShell,
};
use crate::profile::ContainerId;
use crate::repair::{INTEGRITY_CHECK, QUICK_CHECK, REINDEX, VACUUM};
use crate::FatalError;

pub(crate) const FIXTURE_DATABASE: &[u8] = b"SQLite format 3\0fixture-main";
pub(crate) const FIXTURE_WAL: &[u8] = b"fixture-wal";
pub(crate) const FIXTURE_SHM: &[u8] = b"fixture-shm";
pub(crate) const FIXTURE_DUMP: &str = "CREATE TABLE t(x);\nINSERT INTO t VALUES(1);\n";

pub(crate) struct Layout {
    pub config_root: PathBuf,
    pub database_dir: PathBuf,
    pub database_file: PathBuf,
}

/// Lay out a config root with a database, both side files and an app log.
pub(crate) fn plex_layout(root: &Path) -> Result<Layout> {
    let config_root = root.join("config");
    let database_dir = database_dir_for(&config_root);
    fs::create_dir_all(&database_dir)?;
    let database_file = database_dir.join(database_file_name());
    fs::write(&database_file, FIXTURE_DATABASE)?;
    fs::write(with_suffix(&database_file, "-wal"), FIXTURE_WAL)?;
    fs::write(with_suffix(&database_file, "-shm"), FIXTURE_SHM)?;

    let app_log = config_root.join(APP_LOG_SUBPATH);
    if let Some(parent) = app_log.parent() {
        fs::create_dir_all(parent)?;
    }
    let lines = (1..=60).map(|n| format!("log line {n}\n")).collect::<String>();
    fs::write(app_log, lines)?;

    Ok(Layout { config_root, database_dir, database_file })
}

pub(crate) fn executable(path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, b"#!/bin/sh\nexit 0\n")?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(path.to_path_buf())
}

pub(crate) fn owner_of(path: &Path) -> Result<Ownership> {
    let metadata = fs::metadata(path)?;
    Ok(Ownership { uid: metadata.uid(), gid: metadata.gid() })
}

pub(crate) fn mode_of(path: &Path) -> Result<u32> {
    Ok(fs::metadata(path)?.permissions().mode() & 0o7777)
}

fn unquote(raw: &str) -> String {
    let inner = raw.trim().trim_start_matches('"').trim_end_matches('"');
    inner.replace("\\\"", "\"").replace("\\\\", "\\")
}

#[derive(Default)]
pub(crate) struct FakeServices {
    pub calls: RefCell<Vec<String>>,
    pub run_as: Option<String>,
    pub process_owner: Option<String>,
    pub fail_stop: bool,
    pub fail_start: bool,
}

impl ServiceManager for FakeServices {
    fn stop(&self, unit: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("stop {unit}"));
        if self.fail_stop {
            return Err(anyhow!("Unit {unit}.service not loaded"));
        }
        Ok(())
    }

    fn start(&self, unit: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("start {unit}"));
        if self.fail_start {
            return Err(anyhow!("Job for {unit}.service failed"));
        }
        Ok(())
    }

    fn run_as_user(&self, unit: &str) -> Result<Option<String>> {
        self.calls.borrow_mut().push(format!("show-user {unit}"));
        Ok(self.run_as.clone())
    }

    fn process_owner(&self, process_name: &str) -> Result<Option<String>> {
        self.calls.borrow_mut().push(format!("process-owner {process_name}"));
        Ok(self.process_owner.clone())
    }
}

#[derive(Default)]
pub(crate) struct FakeContainers {
    pub calls: RefCell<Vec<String>>,
    pub running: Cell<bool>,
    pub detected: Option<ContainerId>,
    pub mounts: Vec<MountInfo>,
    pub env: BTreeMap<String, String>,
    pub binaries: Vec<String>,
    pub logs: String,
    pub fail_stop: bool,
}

impl FakeContainers {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl ContainerRuntime for FakeContainers {
    fn find_by_image(&self, images: &[&str]) -> Result<Option<ContainerId>> {
        self.calls.borrow_mut().push(format!("find-by-image {}", images.join(",")));
        Ok(self.detected.clone())
    }

    fn is_running(&self, container: &ContainerId) -> Result<bool> {
        self.calls.borrow_mut().push(format!("is-running {container}"));
        Ok(self.running.get())
    }

    fn start(&self, container: &ContainerId) -> Result<()> {
        self.calls.borrow_mut().push(format!("start {container}"));
        self.running.set(true);
        Ok(())
    }

    fn stop(&self, container: &ContainerId) -> Result<()> {
        self.calls.borrow_mut().push(format!("stop {container}"));
        if self.fail_stop {
            return Err(anyhow!("Error response from daemon: cannot stop {container}"));
        }
        self.running.set(false);
        Ok(())
    }

    fn mounts(&self, container: &ContainerId) -> Result<Vec<MountInfo>> {
        self.calls.borrow_mut().push(format!("mounts {container}"));
        Ok(self.mounts.clone())
    }

    fn env(&self, container: &ContainerId) -> Result<BTreeMap<String, String>> {
        self.calls.borrow_mut().push(format!("env {container}"));
        Ok(self.env.clone())
    }

    fn find_files(&self, container: &ContainerId, root: &str, name: &str) -> Result<Vec<String>> {
        self.calls.borrow_mut().push(format!("find {container} {root} {name}"));
        if !self.running.get() {
            return Err(anyhow!("container {container} is not running"));
        }
        Ok(self.binaries.clone())
    }

    fn copy_out(&self, container: &ContainerId, source: &str, destination: &Path) -> Result<()> {
        self.calls.borrow_mut().push(format!("copy-out {container}:{source}"));
        fs::write(destination, b"#!/bin/sh\nexit 0\n")?;
        fs::set_permissions(destination, fs::Permissions::from_mode(0o644))?;
        Ok(())
    }

    fn logs(&self, container: &ContainerId, since: &str, tail: usize) -> Result<String> {
        self.calls.borrow_mut().push(format!("logs {container} {since} {tail}"));
        Ok(self.logs.clone())
    }
}

/// Answers sqlite statements the way the real binary would, without a database.
pub(crate) struct FakeShell {
    pub calls: RefCell<Vec<(PathBuf, Vec<String>)>>,
    pub integrity: RefCell<VecDeque<CommandOutput>>,
    pub quick: CommandOutput,
    pub maintenance_ok: bool,
    pub dump_ok: bool,
    pub replay_ok: bool,
}

impl Default for FakeShell {
    fn default() -> Self {
        Self {
            calls: RefCell::default(),
            integrity: RefCell::default(),
            quick: CommandOutput::ok("ok\n"),
            maintenance_ok: true,
            dump_ok: true,
            replay_ok: true,
        }
    }
}

impl FakeShell {
    pub(crate) fn with_integrity(outputs: impl IntoIterator<Item = CommandOutput>) -> Self {
        Self { integrity: RefCell::new(outputs.into_iter().collect()), ..Self::default() }
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.calls.borrow().iter().flat_map(|(_, statements)| statements.clone()).collect()
    }
}

impl SqlShell for FakeShell {
    fn run(&self, _binary: &Path, database: &Path, statements: &[String]) -> Result<CommandOutput> {
        self.calls.borrow_mut().push((database.to_path_buf(), statements.to_vec()));
        let first = statements.first().map(String::as_str).unwrap_or_default();

        if first == INTEGRITY_CHECK {
            let next = self.integrity.borrow_mut().pop_front();
            return Ok(next.unwrap_or_else(|| CommandOutput::ok("ok\n")));
        }
        if first == QUICK_CHECK {
            return Ok(self.quick.clone());
        }
        if first == REINDEX || first == VACUUM {
            return Ok(if self.maintenance_ok {
                CommandOutput::ok("")
            } else {
                CommandOutput::failed("Error: database is locked")
            });
        }
        if let Some(target) = first.strip_prefix(".output ") {
            if !self.dump_ok {
                return Ok(CommandOutput::failed("Error: database disk image is malformed"));
            }
            fs::write(unquote(target), FIXTURE_DUMP)?;
            return Ok(CommandOutput::ok(""));
        }
        if let Some(source) = first.strip_prefix(".read ") {
            if !self.replay_ok {
                return Ok(CommandOutput::failed("Parse error near line 2"));
            }
            let dump = fs::read(unquote(source))?;
            fs::write(database, dump)?;
            return Ok(CommandOutput::ok(""));
        }

        Ok(CommandOutput::failed(format!("unexpected statement: {first}")))
    }
}

#[derive(Default)]
pub(crate) struct FakeAccounts {
    pub users: BTreeMap<String, Ownership>,
}

impl FakeAccounts {
    pub(crate) fn with(name: &str, ownership: Ownership) -> Self {
        Self { users: BTreeMap::from([(name.to_string(), ownership)]) }
    }
}

impl Accounts for FakeAccounts {
    fn lookup_user(&self, name: &str) -> Result<Option<Ownership>> {
        Ok(self.users.get(name).copied())
    }
}

/// Replays canned answers in order; records everything shown.
#[derive(Default)]
pub(crate) struct ScriptedOperator {
    answers: VecDeque<String>,
    pub shown: Vec<String>,
    pub questions: Vec<String>,
}

impl ScriptedOperator {
    pub(crate) fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { answers: answers.into_iter().map(Into::into).collect(), ..Self::default() }
    }

    pub(crate) fn transcript(&self) -> String {
        self.shown.join("\n")
    }

    fn next(&mut self, question: &str) -> Result<String> {
        self.questions.push(question.to_string());
        self.answers.pop_front().ok_or_else(|| FatalError::InputClosed.into())
    }
}

impl Operator for ScriptedOperator {
    fn select(&mut self, title: &str, options: &[&str]) -> Result<usize> {
        let answer = self.next(title)?;
        let picked: usize = answer.trim().parse()?;
        if picked == 0 || picked > options.len() {
            return Err(anyhow!("scripted selection {picked} out of range"));
        }
        Ok(picked - 1)
    }

    fn ask(&mut self, question: &str, default: &str) -> Result<String> {
        let answer = self.next(question)?;
        Ok(if answer.trim().is_empty() { default.to_string() } else { answer })
    }

    fn confirm(&mut self, question: &str) -> Result<bool> {
        let answer = self.next(question)?;
        Ok(answer.trim().eq_ignore_ascii_case("y"))
    }

    fn show(&mut self, text: &str) -> Result<()> {
        self.shown.push(text.to_string());
        Ok(())
    }
}
