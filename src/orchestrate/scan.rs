//! The `scan` orchestrator: create a fresh database and record an initial snapshot.

use std::path::PathBuf;

use crate::database::{feature, Database, HashAlgo};
use crate::error::{Error, Result};
use crate::hasher::{HashOutcome, Hasher};
use crate::progress::{HashProgressFn, ScanProgressFn};
use crate::scanner::{ScanOutcome, Scanner};

/// Configuration for an initial scan.
#[derive(Default)]
pub struct ScanConfig {
    pub db_path: PathBuf,
    pub root: PathBuf,
    /// `None` disables the hash table feature entirely.
    pub hash_algo: Option<HashAlgo>,
    /// Remove an existing file at `db_path` before creating the new database.
    pub force: bool,
    /// Record entries only; leave hashing for a later `resume`.
    pub init_only: bool,
    pub exclude: Vec<String>,
    /// Called once per entry appended by the scanner. Lets a CLI drive a progress bar.
    pub scan_progress: Option<Box<ScanProgressFn>>,
    /// Called once per entry processed by the hasher.
    pub hash_progress: Option<Box<HashProgressFn>>,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub scan: ScanOutcome,
    pub hash: Option<HashOutcome>,
}

/// Run an initial scan per §4.5:
/// 1. Fail with `AlreadyExists` unless `force` (which removes the existing file first).
/// 2. `Create` with the requested features.
/// 3. Run the scanner; any fatal error marks the database `Interrupted` and aborts.
/// 4. `FinishEntries`.
/// 5. If hashing is enabled and not `init_only`, run the hasher.
/// 6. `Close`.
pub fn scan(cfg: &mut ScanConfig, err_out: &mut dyn std::io::Write) -> Result<ScanReport> {
    if cfg.db_path.exists() {
        if cfg.force {
            std::fs::remove_file(&cfg.db_path)
                .map_err(|e| Error::io("removing existing database for --force", e))?;
        } else {
            return Err(Error::AlreadyExists {
                path: cfg.db_path.clone(),
            });
        }
    }

    let features = if cfg.hash_algo.is_some() { feature::HASH_TABLE } else { 0 };
    let mut db = Database::create(&cfg.db_path, &cfg.root, features, cfg.hash_algo)?;

    let mut scanner = Scanner::new().with_exclude(&cfg.exclude)?;
    if let Some(cb) = cfg.scan_progress.take() {
        scanner = scanner.with_progress(move |path| cb(path));
    }
    let outcome: Result<(ScanOutcome, Option<HashOutcome>)> = (|| {
        let scan_outcome = scanner.scan(&cfg.root, &mut db, err_out)?;
        db.finish_entries()?;
        let hash_outcome = if cfg.hash_algo.is_some() && !cfg.init_only {
            let mut hasher = Hasher::new(cfg.hash_algo.unwrap());
            if let Some(cb) = cfg.hash_progress.take() {
                hasher = hasher.with_progress(move |path| cb(path));
            }
            Some(hasher.run(&cfg.root, &mut db, err_out)?)
        } else {
            None
        };
        Ok((scan_outcome, hash_outcome))
    })();

    match outcome {
        Ok((scan_outcome, hash_outcome)) => {
            db.close()?;
            Ok(ScanReport {
                scan: scan_outcome,
                hash: hash_outcome,
            })
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

    #[test]
    fn empty_dir_has_only_root_entry() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("db.ajfs");
        let mut cfg = ScanConfig {
            db_path: db_path.clone(),
            root: dir.path().to_path_buf(),
            hash_algo: Some(HashAlgo::Sha256),
            ..Default::default()
        };
        let mut err_out = Vec::new();
        let report = scan(&mut cfg, &mut err_out).unwrap();
        assert_eq!(report.scan.entries_appended, 0);

        let db = Database::open(&db_path).unwrap();
        assert_eq!(db.entry_count(), 1);
        assert_eq!(db.entry_at(0).unwrap().path, ".");
    }

    #[test]
    fn existing_file_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("db.ajfs");
        std::fs::write(&db_path, b"not a database").unwrap();

        let mut cfg = ScanConfig {
            db_path: db_path.clone(),
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let mut err_out = Vec::new();
        assert!(matches!(scan(&mut cfg, &mut err_out), Err(Error::AlreadyExists { .. })));

        let mut forced = ScanConfig { force: true, ..cfg };
        assert!(scan(&mut forced, &mut err_out).is_ok());
    }
}
