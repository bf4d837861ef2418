//! The `resume` orchestrator: finish hashing a database left in `EntriesComplete` or
//! `HashTableOpen`.

use std::path::{Path, PathBuf};

use crate::database::Database;
use crate::error::Result;
use crate::hasher::{HashOutcome, Hasher};
use crate::progress::HashProgressFn;

/// Resume hashing the database at `db_path`. A no-op (zero entries hashed) if the database
/// carries no hash table, or if every slot is already filled.
pub fn resume(db_path: &Path, err_out: &mut dyn std::io::Write) -> Result<HashOutcome> {
    resume_with_progress(db_path, err_out, None)
}

/// As [`resume`], but with an optional hook called once per entry the hasher processes. Lets a
/// CLI drive a progress bar.
pub fn resume_with_progress(
    db_path: &Path,
    err_out: &mut dyn std::io::Write,
    hash_progress: Option<Box<HashProgressFn>>,
) -> Result<HashOutcome> {
    let mut db = Database::resume(db_path)?;
    let root = PathBuf::from(db.root_path());

    let result = (|| -> Result<HashOutcome> {
        match db.hash_table_algo() {
            Some(algo) => {
                let mut hasher = Hasher::new(algo);
                if let Some(cb) = hash_progress {
                    hasher = hasher.with_progress(move |path| cb(path));
                }
                hasher.run(&root, &mut db, err_out)
            }
            None => Ok(HashOutcome::default()),
        }
    })();

    match result {
        Ok(outcome) => {
            db.close()?;
            Ok(outcome)
        }
        Err(e) => {
            let _ = db.interrupted();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{HashAlgo, State};
    use crate::orchestrate::scan::{scan, ScanConfig};

    #[test]
    fn resume_on_complete_database_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        let db_path = dir.path().join("db.ajfs");
        let mut cfg = ScanConfig {
            db_path: db_path.clone(),
            root: dir.path().to_path_buf(),
            hash_algo: Some(HashAlgo::Sha256),
            ..Default::default()
        };
        let mut err_out = Vec::new();
        scan(&mut cfg, &mut err_out).unwrap();

        let before = std::fs::read(&db_path).unwrap();
        let outcome = resume(&db_path, &mut err_out).unwrap();
        assert_eq!(outcome.hashed, 0);
        let after = std::fs::read(&db_path).unwrap();
        assert_eq!(before, after);

        let db = Database::open(&db_path).unwrap();
        assert_eq!(db.state(), State::Complete);
    }

    #[test]
    fn resume_without_hash_table_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("db.ajfs");
        let mut cfg = ScanConfig {
            db_path: db_path.clone(),
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let mut err_out = Vec::new();
        scan(&mut cfg, &mut err_out).unwrap();
        let outcome = resume(&db_path, &mut err_out).unwrap();
        assert_eq!(outcome.hashed, 0);
    }
}
