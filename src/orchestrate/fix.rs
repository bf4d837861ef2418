//! The `fix` orchestrator: recover a database left `Interrupted` by a crash or a killed process.
//!
//! Interactive confirmation belongs to the CLI layer (`inquire::Confirm`); this module only ever
//! takes an explicit `dry_run` flag and never prompts.

use std::path::{Path, PathBuf};

use crate::database::{Database, State};
use crate::error::{Error, Result};

pub struct FixConfig {
    pub db_path: PathBuf,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct FixReport {
    pub previous_state: State,
    pub recommended_state: State,
    pub bak_path: PathBuf,
    /// `true` if the header on disk was actually rewritten (always `false` for a dry run).
    pub applied: bool,
}

fn backup_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(".header.bak");
    PathBuf::from(name)
}

/// Inspect and, unless `dry_run`, repair the database at `cfg.db_path`. Backs up the current
/// header to `<db_path>.header.bak` before making any change.
///
/// Repair re-derives the entry and hash sub-header lengths by tolerant parsing
/// (`Database::open_for_fix`) rather than trusting whatever `count`/`byte_len` a crash left on
/// disk, so a database crashed mid-`finish_entries`, or carrying a hash table whose `count`
/// disagrees with the entry table, is recovered rather than rejected outright.
pub fn fix(cfg: &FixConfig) -> Result<FixReport> {
    let mut db = Database::open_for_fix(&cfg.db_path)?;
    let previous_state = db.state();
    let recommended_state = db.recommended_state();
    let bak_path = backup_path(&cfg.db_path);
    db.backup_header(&bak_path)?;

    if cfg.dry_run {
        db.abandon();
        return Ok(FixReport {
            previous_state,
            recommended_state,
            bak_path,
            applied: false,
        });
    }

    db.rewrite_tables_for_fix()?;
    db.force_state(recommended_state)?;

    Ok(FixReport {
        previous_state,
        recommended_state,
        bak_path,
        applied: true,
    })
}

/// Replace the header region of `path` with the bytes backed up at `bak_path`, trusting the
/// caller that `bak_path` holds a header previously taken from the same database.
pub fn restore_database_header(path: &Path, bak_path: &Path) -> Result<()> {
    use std::io::{Read, Seek, SeekFrom, Write};

    let backup = std::fs::read(bak_path).map_err(|e| Error::io("reading header backup", e))?;
    if backup.len() != crate::database::header::HEADER_LEN as usize {
        return Err(Error::corrupted("header backup is not exactly HEADER_LEN bytes"));
    }

    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| Error::io("opening database for header restore", e))?;
    crate::database::header::Header::decode(&backup)?;

    file.seek(SeekFrom::Start(0))
        .map_err(|e| Error::io("seeking to header", e))?;
    file.write_all(&backup)
        .map_err(|e| Error::io("writing restored header", e))?;
    file.sync_data().map_err(|e| Error::io("fsync after header restore", e))?;

    let mut verify = vec![0u8; backup.len()];
    file.seek(SeekFrom::Start(0))
        .map_err(|e| Error::io("seeking to verify restored header", e))?;
    file.read_exact(&mut verify)
        .map_err(|e| Error::io("reading back restored header", e))?;
    debug_assert_eq!(verify, backup);
    Ok(())
}
