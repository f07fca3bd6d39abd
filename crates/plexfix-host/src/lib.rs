//! Host implementations of the `plexfix-core` ports.
//!
//! Each adapter shells out to the tool an administrator would use by hand:
//! `systemctl`/`service`, a docker-compatible CLI, and the sqlite3-compatible
//! repair binary. Account lookups go through the system user database.

mod accounts;
mod command;
mod docker;
mod sqlite_cli;
mod systemd;

pub use accounts::HostAccounts;
pub use docker::{parse_env, parse_mounts, ContainerCli, DEFAULT_CONTAINER_CLI};
pub use sqlite_cli::SqliteCli;
pub use systemd::{owner_from_ps, HostServiceManager, InitSystem};
