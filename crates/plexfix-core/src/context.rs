use std::ffi::OsString;
use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::profile::Profile;
use crate::FatalError;

pub const DATABASE_SUBPATH: &str =
    "Library/Application Support/Plex Media Server/Plug-in Support/Databases";
pub const LIBRARY_DIR: &str = "Library";
pub const APP_LOG_SUBPATH: &str =
    "Library/Application Support/Plex Media Server/Logs/Plex Media Server.log";
pub const DATABASE_BASENAME: &str = "com.plexapp.plugins.library";
pub const DATABASE_EXTENSION: &str = "db";
pub const SIDE_FILE_SUFFIXES: [&str; 2] = ["-wal", "-shm"];
pub const CONTAINER_CONFIG_MOUNT: &str = "/config";
pub const REPAIR_BINARY_NAME: &str = "Plex SQLite";
pub const PLUGIN_DIR_PREFIX: &str = "plexmediaserver";

/// Everything later stages need to know about the install, resolved once.
///
/// Only [`DeploymentContext::verified`] constructs one, so holding a context
/// means the database and repair binary were present when it was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentContext {
    profile: Profile,
    config_root: PathBuf,
    database_dir: PathBuf,
    database_file: PathBuf,
    repair_binary: PathBuf,
}

impl DeploymentContext {
    /// Derive database paths from `config_root` and check the invariants.
    ///
    /// # Errors
    /// Returns a [`FatalError`] when the database directory or file is missing,
    /// the database cannot be opened for reading, or the repair binary is
    /// missing or not executable.
    pub fn verified(
        profile: Profile,
        config_root: PathBuf,
        repair_binary: PathBuf,
    ) -> Result<Self, FatalError> {
        let database_dir = database_dir_for(&config_root);
        require_dir("database directory", &database_dir)?;

        let database_file = database_dir.join(database_file_name());
        if !database_file.is_file() {
            return Err(FatalError::MissingPath { what: "database file", path: database_file });
        }
        File::open(&database_file)
            .map_err(|source| FatalError::Unreadable { path: database_file.clone(), source })?;

        if !repair_binary.is_file() {
            return Err(FatalError::MissingPath { what: "repair binary", path: repair_binary });
        }
        if !is_executable(&repair_binary) {
            return Err(FatalError::NotExecutable(repair_binary));
        }

        Ok(Self { profile, config_root, database_dir, database_file, repair_binary })
    }

    #[must_use]
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    #[must_use]
    pub fn config_root(&self) -> &Path {
        &self.config_root
    }

    #[must_use]
    pub fn database_dir(&self) -> &Path {
        &self.database_dir
    }

    #[must_use]
    pub fn database_file(&self) -> &Path {
        &self.database_file
    }

    #[must_use]
    pub fn repair_binary(&self) -> &Path {
        &self.repair_binary
    }

    #[must_use]
    pub fn library_dir(&self) -> PathBuf {
        self.config_root.join(LIBRARY_DIR)
    }

    #[must_use]
    pub fn app_log(&self) -> PathBuf {
        self.config_root.join(APP_LOG_SUBPATH)
    }

    /// The database file followed by its side files, whether or not they exist.
    #[must_use]
    pub fn family_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.database_file.clone()];
        files.extend(self.side_files());
        files
    }

    #[must_use]
    pub fn side_files(&self) -> Vec<PathBuf> {
        side_files_of(&self.database_file)
    }

    /// `<dbname>.<marker>.<stamp>.<ext>` beside the live database.
    #[must_use]
    pub fn sibling(&self, marker: &str, stamp: &str, extension: &str) -> PathBuf {
        self.database_dir.join(format!("{DATABASE_BASENAME}.{marker}.{stamp}.{extension}"))
    }
}

#[must_use]
pub fn database_dir_for(config_root: &Path) -> PathBuf {
    config_root.join(DATABASE_SUBPATH)
}

#[must_use]
pub fn database_file_name() -> String {
    format!("{DATABASE_BASENAME}.{DATABASE_EXTENSION}")
}

/// Append `suffix` to the full file name (`x.db` + `-wal` = `x.db-wal`).
#[must_use]
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = OsString::from(path.as_os_str());
    raw.push(suffix);
    PathBuf::from(raw)
}

#[must_use]
pub fn side_files_of(database: &Path) -> Vec<PathBuf> {
    SIDE_FILE_SUFFIXES.iter().map(|suffix| with_suffix(database, suffix)).collect()
}

#[must_use]
pub fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// # Errors
/// Returns [`FatalError::MissingPath`] when `path` is not an existing directory.
pub fn require_dir(what: &'static str, path: &Path) -> Result<(), FatalError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(FatalError::MissingPath { what, path: path.to_path_buf() })
    }
}
