//! The `update` orchestrator: refresh a database against the current filesystem while carrying
//! forward hashes for entries whose id is unchanged.

use std::path::{Path, PathBuf};

use crate::database::Database;
use crate::error::{Error, Result};
use crate::hasher::HashOutcome;
use crate::orchestrate::resume;
use crate::orchestrate::scan::{scan, ScanConfig};

pub struct UpdateConfig {
    pub db_path: PathBuf,
    pub exclude: Vec<String>,
}

fn backup_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

/// Run an incremental update per §4.5. On any error while the backup is still the only valid
/// copy (steps 2-4), the backup is restored to `db_path`. An error while hashing new entries
/// (step 5) leaves both the new database and the backup in place for manual recovery.
pub fn update(cfg: &UpdateConfig, err_out: &mut dyn std::io::Write) -> Result<HashOutcome> {
    let bak_path = backup_path(&cfg.db_path);
    std::fs::rename(&cfg.db_path, &bak_path).map_err(|e| Error::io("renaming database to backup", e))?;

    let rollback = |err: Error| -> Error {
        let _ = std::fs::remove_file(&cfg.db_path);
        let _ = std::fs::rename(&bak_path, &cfg.db_path);
        err
    };

    let old_db = match Database::open(&bak_path) {
        Ok(db) => db,
        Err(e) => return Err(rollback(e)),
    };

    let root = PathBuf::from(old_db.root_path());
    let hash_algo = old_db.hash_table_algo();

    let mut scan_cfg = ScanConfig {
        db_path: cfg.db_path.clone(),
        root,
        hash_algo,
        init_only: true,
        exclude: cfg.exclude.clone(),
        ..Default::default()
    };
    if let Err(e) = scan(&mut scan_cfg, err_out) {
        return Err(rollback(e));
    }

    if hash_algo.is_some() {
        if let Err(e) = carry_forward_hashes(&cfg.db_path, &old_db) {
            return Err(rollback(e));
        }
    }
    drop(old_db);

    // Step 5: any failure here leaves both the new database and the backup in place.
    let hash_outcome = resume::resume(&cfg.db_path, err_out)?;

    // Step 6: non-fatal cleanup.
    if let Err(e) = std::fs::remove_file(&bak_path) {
        let _ = writeln!(
            err_out,
            "update: failed to remove backup {}: {e}",
            bak_path.display()
        );
    }

    Ok(hash_outcome)
}

/// Carry forward every digest from `old_db` into the freshly-scanned database at `new_path`,
/// matching entries by id and kind. Entries absent from the new database are silently dropped.
fn carry_forward_hashes(new_path: &Path, old_db: &Database) -> Result<()> {
    let mut new_db = Database::resume(new_path)?;
    let result: Result<()> = (|| {
        old_db.read_all_entries_with_hashes(|old_entry, digest| {
            if let Ok((new_index, _offset)) = new_db.find_entry_index_and_offset(old_entry.id) {
                let kind_matches = new_db
                    .entry_at(new_index)
                    .map(|e| e.kind == old_entry.kind)
                    .unwrap_or(false);
                if kind_matches {
                    new_db.write_hash_entry(new_index, digest)?;
                }
            }
            Ok(())
        })
    })();

    match result {
        Ok(()) => new_db.close(),
        Err(e) => {
            let _ = new_db.interrupted();
            Err(e)
        }
    }
}
