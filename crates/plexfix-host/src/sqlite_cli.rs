use std::path::Path;
use std::process::Command;

use anyhow::Result;
use plexfix_core::{CommandOutput, SqlShell};

use crate::command::capture;

/// Invokes a sqlite3-compatible binary as `<binary> <database> <stmt>...`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteCli;

impl SqlShell for SqliteCli {
    fn run(&self, binary: &Path, database: &Path, statements: &[String]) -> Result<CommandOutput> {
        capture(Command::new(binary).arg(database).args(statements))
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs::{self, OpenOptions};
    use std::io::{Seek, SeekFrom, Write};
    use std::path::PathBuf;

    use anyhow::Result;
    use plexfix_core::context::{database_dir_for, database_file_name, side_files_of};
    use plexfix_core::repair::{IntegrityVerdict, RepairEngine, INTEGRITY_CHECK};
    use plexfix_core::{CaptureTimestamp, DeploymentContext, FatalError, Profile};
    use rusqlite::Connection;
    use time::macros::datetime;

    use super::*;

    fn sqlite3() -> Option<PathBuf> {
        let paths = env::var_os("PATH")?;
        env::split_paths(&paths).map(|dir| dir.join("sqlite3")).find(|path| path.is_file())
    }

    fn seeded_context(root: &Path, binary: PathBuf) -> Result<DeploymentContext> {
        let config_root = root.join("config");
        let database_dir = database_dir_for(&config_root);
        fs::create_dir_all(&database_dir)?;

        let connection = Connection::open(database_dir.join(database_file_name()))?;
        connection.execute_batch(
            "CREATE TABLE metadata_items (id INTEGER PRIMARY KEY, title TEXT NOT NULL, guid TEXT);
             CREATE INDEX index_metadata_items_on_guid ON metadata_items (guid);
             INSERT INTO metadata_items (title, guid) VALUES
                 ('Alien', 'plex://movie/1'),
                 ('Heat', 'plex://movie/2'),
                 ('It''s a \"quoted\" title', 'plex://movie/3');",
        )?;
        drop(connection);

        Ok(DeploymentContext::verified(
            Profile::BareMetal { unit: "plexmediaserver".to_string() },
            config_root,
            binary,
        )?)
    }

    fn titles(database: &Path) -> Result<Vec<String>> {
        let connection = Connection::open(database)?;
        let mut statement = connection.prepare("SELECT title FROM metadata_items ORDER BY id")?;
        let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[test]
    fn integrity_check_of_a_clean_database_is_ok() -> Result<()> {
        let Some(binary) = sqlite3() else {
            eprintln!("sqlite3 not installed; skipping");
            return Ok(());
        };
        let scratch = tempfile::tempdir()?;
        let context = seeded_context(scratch.path(), binary)?;

        let output = SqliteCli.run(
            context.repair_binary(),
            context.database_file(),
            &[INTEGRITY_CHECK.to_string()],
        )?;
        assert_eq!(IntegrityVerdict::from_command(&output), IntegrityVerdict::Ok);
        Ok(())
    }

    #[test]
    fn rebuild_twice_keeps_data_and_stays_ok() -> Result<()> {
        let Some(binary) = sqlite3() else {
            eprintln!("sqlite3 not installed; skipping");
            return Ok(());
        };
        let scratch = tempfile::tempdir()?;
        let context = seeded_context(scratch.path(), binary)?;
        let before = titles(context.database_file())?;
        let engine = RepairEngine::new(&SqliteCli);

        let stamps = [
            CaptureTimestamp::from_datetime(datetime!(2024-06-01 10:00:00 UTC))?,
            CaptureTimestamp::from_datetime(datetime!(2024-06-01 10:00:01 UTC))?,
        ];
        for stamp in &stamps {
            let rebuild = engine.rebuild(&context, stamp)?;
            assert_eq!(
                rebuild.post_verdict,
                IntegrityVerdict::Ok,
                "{}",
                rebuild.post_check.combined()
            );
            assert!(rebuild.broken_file.is_file());
            assert_eq!(titles(context.database_file())?, before);
            for side in side_files_of(context.database_file()) {
                assert!(!side.exists(), "{} left behind", side.display());
            }
            assert!(!context.sibling("dump", stamp.as_str(), "sql").exists());
        }
        Ok(())
    }

    /// Overwrite one page in the middle of the file with 0xff.
    fn corrupt_middle_page(database: &Path) -> Result<()> {
        let length = fs::metadata(database)?.len();
        let mut file = OpenOptions::new().write(true).open(database)?;
        file.seek(SeekFrom::Start((length / 2) & !4095))?;
        file.write_all(&[0xff; 4096])?;
        Ok(file.sync_all()?)
    }

    #[test]
    fn failed_dump_names_partial_dump_and_broken_file() -> Result<()> {
        let Some(binary) = sqlite3() else {
            eprintln!("sqlite3 not installed; skipping");
            return Ok(());
        };
        let scratch = tempfile::tempdir()?;
        let context = seeded_context(scratch.path(), binary)?;
        let connection = Connection::open(context.database_file())?;
        connection.execute_batch(
            "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 6000)
             INSERT INTO metadata_items (title, guid)
             SELECT printf('Episode %05d of a long running series', i),
                    printf('plex://episode/%d', i)
             FROM n;",
        )?;
        drop(connection);
        corrupt_middle_page(context.database_file())?;

        let stamp = CaptureTimestamp::from_datetime(datetime!(2024-06-01 10:00:00 UTC))?;
        let Err(err) = RepairEngine::new(&SqliteCli).rebuild(&context, &stamp) else {
            eprintln!("this sqlite3 salvaged the corrupt page; nothing to report");
            return Ok(());
        };

        assert!(matches!(err.downcast_ref::<FatalError>(), Some(FatalError::Dump(_))), "{err:#}");
        let message = err.to_string();
        let broken = context.sibling("broken", stamp.as_str(), "db");
        assert!(broken.is_file());
        assert!(message.contains(&format!("corrupt database kept at {}", broken.display())));

        let dump = context.sibling("dump", stamp.as_str(), "sql");
        let dump_size = fs::metadata(&dump).map(|metadata| metadata.len()).unwrap_or(0);
        if dump_size > 0 {
            let partial = format!("partial dump left at {} ({dump_size} bytes)", dump.display());
            assert!(message.contains(&partial), "{message}");
        } else {
            assert!(message.contains(&format!("no dump at {}", dump.display())), "{message}");
        }
        Ok(())
    }

    #[test]
    fn unrunnable_binary_is_an_error() {
        let result = SqliteCli.run(
            Path::new("/nonexistent/Plex SQLite"),
            Path::new("/tmp/x.db"),
            &[INTEGRITY_CHECK.to_string()],
        );
        assert!(result.is_err());
    }
}
