//! Streams a directory tree into a [`Database`]'s entry table.
//!
//! The heavy lifting (directory recursion, `.gitignore`-style filtering, not following symlinks)
//! is delegated to `ignore::WalkBuilder`, configured to walk single-threaded and sorted so sibling
//! order is deterministic (lexicographic by file name, required by invariant I3).

use std::io::Write as _;
use std::path::Path;

use regex::RegexSet;

use crate::database::Database;
use crate::error::{Error, Result};
use crate::pathinfo::{Kind, Mtime, PathInfo};
use crate::progress::ScanProgressFn;

/// File names excluded from every scan regardless of user filters.
const DEFAULT_EXCLUDED_NAMES: &[&str] = &[".DS_Store", "Thumbs.db"];

/// Outcome of a single scan: how many entries were appended and how many per-file errors were
/// reported (and skipped).
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanOutcome {
    pub entries_appended: usize,
    pub errors_reported: usize,
}

/// Streams a walk of a directory tree into a database's entry table.
#[derive(Default)]
pub struct Scanner {
    exclude: Option<RegexSet>,
    /// Test-only hook: a relative path which, when encountered, is reported as a scan error and
    /// skipped rather than appended.
    fault_path: Option<String>,
    progress: Option<Box<ScanProgressFn>>,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude any relative path matching one of `patterns` (regular expressions).
    pub fn with_exclude(mut self, patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            self.exclude = None;
        } else {
            let set = RegexSet::new(patterns)
                .map_err(|e| Error::corrupted(format!("invalid exclude pattern: {e}")))?;
            self.exclude = Some(set);
        }
        Ok(self)
    }

    /// Test-only: simulate an I/O failure at `relative_path` (reported and skipped, scan
    /// continues). This is a capability of the scanner, not the database.
    pub fn with_fault(mut self, relative_path: impl Into<String>) -> Self {
        self.fault_path = Some(relative_path.into());
        self
    }

    /// Report progress: called once per entry successfully appended, with its relative path.
    pub fn with_progress(mut self, cb: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(cb));
        self
    }

    fn is_default_excluded(name: &str) -> bool {
        DEFAULT_EXCLUDED_NAMES.contains(&name)
    }

    fn is_user_excluded(&self, relative_path: &str) -> bool {
        self.exclude
            .as_ref()
            .map(|set| set.is_match(relative_path))
            .unwrap_or(false)
    }

    /// Walk `root` and append every surviving entry (except the root itself, already staged by
    /// `Database::create`) into `db`. Per-file errors are reported on `err_out` and skipped; a
    /// fatal error (root unreadable, or a duplicate id from `AppendEntry`) aborts the scan.
    pub fn scan(&self, root: &Path, db: &mut Database, err_out: &mut dyn std::io::Write) -> Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();

        let walker = ignore::WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        for result in walker {
            match result {
                Ok(entry) => {
                    if entry.depth() == 0 {
                        // The root was already staged as entry 0 by `Database::create`.
                        continue;
                    }
                    self.handle_entry(root, entry, db, err_out, &mut outcome)?;
                }
                Err(err) => {
                    // The walker cannot tell us whether this came from the root; treat any
                    // pre-entry error as non-fatal and report it, matching the "I/O error on a
                    // specific path" policy.
                    let _ = writeln!(err_out, "scan error: {err}");
                    outcome.errors_reported += 1;
                }
            }
        }

        Ok(outcome)
    }

    fn handle_entry(
        &self,
        root: &Path,
        entry: ignore::DirEntry,
        db: &mut Database,
        err_out: &mut dyn std::io::Write,
        outcome: &mut ScanOutcome,
    ) -> Result<()> {
        let path = entry.path();
        let relative = match path.strip_prefix(root) {
            Ok(rel) => crate::id::normalize_path(&rel.to_string_lossy()),
            Err(_) => {
                let _ = writeln!(err_out, "scan error: {} is not under root", path.display());
                outcome.errors_reported += 1;
                return Ok(());
            }
        };

        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if Self::is_default_excluded(name) {
                return Ok(());
            }
        }
        if self.is_user_excluded(&relative) {
            return Ok(());
        }

        if self.fault_path.as_deref() == Some(relative.as_str()) {
            let _ = writeln!(err_out, "scan error: injected fault at {relative}");
            outcome.errors_reported += 1;
            return Ok(());
        }

        let file_type = match entry.file_type() {
            Some(ft) => ft,
            None => {
                let _ = writeln!(err_out, "scan error: {relative}: no file type (stdin?)");
                outcome.errors_reported += 1;
                return Ok(());
            }
        };

        let kind = if file_type.is_symlink() {
            Kind::Symlink
        } else if file_type.is_dir() {
            Kind::Dir
        } else {
            Kind::File
        };

        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                let _ = writeln!(err_out, "scan error: {relative}: {err}");
                outcome.errors_reported += 1;
                return Ok(());
            }
        };

        let size = if kind == Kind::File { meta.len() } else { 0 };
        let mtime = match meta.modified() {
            Ok(t) => match t.duration_since(std::time::UNIX_EPOCH) {
                Ok(d) => Mtime {
                    secs: d.as_secs() as i64,
                    nsecs: d.subsec_nanos() as i32,
                },
                Err(_) => Mtime { secs: 0, nsecs: 0 },
            },
            Err(_) => Mtime { secs: 0, nsecs: 0 },
        };
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode()
        };
        #[cfg(not(unix))]
        let mode = if meta.permissions().readonly() { 0o444 } else { 0o644 };

        let info = PathInfo::new(kind, size, mtime, mode, relative);
        if let Some(cb) = &self.progress {
            cb(&info.path);
        }
        db.append_entry(info)?;
        outcome.entries_appended += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{feature, Database};

    #[test]
    fn scans_in_deterministic_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"1").unwrap();
        std::fs::write(dir.path().join("b/z.txt"), b"2").unwrap();
        std::fs::write(dir.path().join("b/a.txt"), b"3").unwrap();

        let db_path = dir.path().join("db.ajfs");
        let mut db = Database::create(&db_path, dir.path(), feature::HASH_TABLE, None).unwrap();
        let mut err_out = Vec::new();
        let scanner = Scanner::new();
        let outcome = scanner.scan(dir.path(), &mut db, &mut err_out).unwrap();
        assert_eq!(outcome.entries_appended, 4); // a.txt, b, b/a.txt, b/z.txt

        let mut paths = Vec::new();
        db.read_all_entries(|_, pi| {
            paths.push(pi.path.clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(paths, vec![".", "a.txt", "b", "b/a.txt", "b/z.txt"]);
    }

    #[test]
    fn fault_is_reported_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"1").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"2").unwrap();

        let db_path = dir.path().join("db.ajfs");
        let mut db = Database::create(&db_path, dir.path(), 0, None).unwrap();
        let mut err_out = Vec::new();
        let scanner = Scanner::new().with_fault("b.txt");
        let outcome = scanner.scan(dir.path(), &mut db, &mut err_out).unwrap();
        assert_eq!(outcome.entries_appended, 1);
        assert_eq!(outcome.errors_reported, 1);
        assert!(String::from_utf8(err_out).unwrap().contains("b.txt"));
    }

    #[test]
    fn exclude_filter_skips_matching_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"1").unwrap();
        std::fs::write(dir.path().join("skip.log"), b"2").unwrap();

        let db_path = dir.path().join("db.ajfs");
        let mut db = Database::create(&db_path, dir.path(), 0, None).unwrap();
        let mut err_out = Vec::new();
        let scanner = Scanner::new().with_exclude(&[r"\.log$".to_string()]).unwrap();
        let outcome = scanner.scan(dir.path(), &mut db, &mut err_out).unwrap();
        assert_eq!(outcome.entries_appended, 1);
    }
}
