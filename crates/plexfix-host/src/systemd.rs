use std::cell::OnceCell;
use std::process::Command;

use anyhow::Result;
use plexfix_core::ServiceManager;
use tracing::info;

use crate::command::{capture, check};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitSystem {
    Systemd,
    SysV,
}

/// `systemctl` when it answers, otherwise the legacy `service` wrapper.
#[derive(Debug, Default)]
pub struct HostServiceManager {
    init: OnceCell<InitSystem>,
}

impl HostServiceManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_init(init: InitSystem) -> Self {
        Self { init: OnceCell::from(init) }
    }

    pub fn init_system(&self) -> InitSystem {
        *self.init.get_or_init(|| {
            let systemd = capture(Command::new("systemctl").arg("--version"))
                .map(|output| output.success)
                .unwrap_or(false);
            let init = if systemd { InitSystem::Systemd } else { InitSystem::SysV };
            info!(?init, "detected init system");
            init
        })
    }

    fn control(&self, unit: &str, verb: &str) -> Result<()> {
        match self.init_system() {
            InitSystem::Systemd => check(Command::new("systemctl").args([verb, unit]))?,
            InitSystem::SysV => check(Command::new("service").args([unit, verb]))?,
        };
        Ok(())
    }
}

impl ServiceManager for HostServiceManager {
    fn stop(&self, unit: &str) -> Result<()> {
        self.control(unit, "stop")
    }

    fn start(&self, unit: &str) -> Result<()> {
        self.control(unit, "start")
    }

    fn run_as_user(&self, unit: &str) -> Result<Option<String>> {
        if self.init_system() == InitSystem::SysV {
            return Ok(None);
        }
        let output =
            check(Command::new("systemctl").args(["show", "-p", "User", "--value", unit]))?;
        let user = output.stdout.trim();
        Ok((!user.is_empty()).then(|| user.to_string()))
    }

    fn process_owner(&self, process_name: &str) -> Result<Option<String>> {
        let output = check(Command::new("ps").args(["-eo", "user=,args="]))?;
        Ok(owner_from_ps(&output.stdout, process_name))
    }
}

/// First user in `ps -eo user=,args=` output whose command line mentions
/// `process_name`.
#[must_use]
pub fn owner_from_ps(listing: &str, process_name: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let (user, args) = line.trim_start().split_once(char::is_whitespace)?;
        args.contains(process_name).then(|| user.to_string())
    })
}
