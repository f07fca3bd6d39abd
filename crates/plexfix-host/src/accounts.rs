use anyhow::{Context, Result};
use nix::unistd::User;
use plexfix_core::{Accounts, Ownership};

/// The system user database (`/etc/passwd`, NSS).
#[derive(Debug, Default, Clone, Copy)]
pub struct HostAccounts;

impl Accounts for HostAccounts {
    fn lookup_user(&self, name: &str) -> Result<Option<Ownership>> {
        let user = User::from_name(name).with_context(|| format!("failed to look up user {name}"))?;
        Ok(user.map(|user| Ownership { uid: user.uid.as_raw(), gid: user.gid.as_raw() }))
    }
}
