use std::path::PathBuf;

use anyhow::{anyhow, Result};
use plexfix_core::settings::DEFAULT_BACKUP_DIR_NAME;
use plexfix_core::Settings;

/// Run settings from the parsed flags; the backup root defaults to
/// `~/plex-db-backups`.
pub fn settings(backup_root: Option<PathBuf>) -> Result<Settings> {
    let backup_root = match backup_root {
        Some(root) => root,
        None => default_backup_root()?,
    };
    Ok(Settings::new(backup_root))
}

fn default_backup_root() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_BACKUP_DIR_NAME))
        .ok_or_else(|| anyhow!("could not determine the home directory; pass --backup-root"))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use anyhow::Result;

    use super::*;

    #[test]
    fn explicit_backup_root_wins() -> Result<()> {
        let settings = settings(Some(PathBuf::from("/srv/backups/plex")))?;
        assert_eq!(settings.backup_root(), Path::new("/srv/backups/plex"));
        assert_eq!(settings.host_plugin_root, Path::new("/usr/lib"));
        Ok(())
    }

    #[test]
    fn default_backup_root_lives_in_home() -> Result<()> {
        let Some(home) = dirs::home_dir() else {
            return Ok(());
        };
        assert_eq!(settings(None)?.backup_root(), home.join("plex-db-backups"));
        Ok(())
    }
}
