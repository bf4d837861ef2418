//! Integration tests for the concrete scenarios named in the design notes: empty directory, force
//! override, resume after an injected hash failure, update with no filesystem changes, update
//! after a filter removes an entry, and a fix/restore round trip.

use std::io::Cursor;

use ajfs::database::{Database, HashAlgo, State};
use ajfs::export::hashdeep;
use ajfs::orchestrate::fix::{fix, restore_database_header, FixConfig};
use ajfs::orchestrate::resume::resume;
use ajfs::orchestrate::scan::{scan, ScanConfig};
use ajfs::orchestrate::update::{update, UpdateConfig};

fn scan_cfg(db_path: std::path::PathBuf, root: std::path::PathBuf, hash_algo: Option<HashAlgo>) -> ScanConfig {
    ScanConfig {
        db_path,
        root,
        hash_algo,
        ..Default::default()
    }
}

#[test]
fn empty_directory_scans_to_root_only() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("db.ajfs");
    let mut err_out = Vec::new();
    let mut cfg = scan_cfg(db_path.clone(), dir.path().to_path_buf(), Some(HashAlgo::Sha256));
    let report = scan(&mut cfg, &mut err_out).unwrap();

    assert_eq!(report.scan.entries_appended, 0);
    let db = Database::open(&db_path).unwrap();
    assert_eq!(db.entry_count(), 1);
    assert_eq!(db.state(), State::Complete);
}

#[test]
fn force_overrides_an_existing_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("db.ajfs");
    std::fs::write(&db_path, b"stale data, not a real database").unwrap();

    let mut err_out = Vec::new();
    let mut cfg = scan_cfg(db_path.clone(), dir.path().to_path_buf(), None);
    assert!(scan(&mut cfg, &mut err_out).is_err());

    let mut forced = ScanConfig { force: true, ..cfg };
    let report = scan(&mut forced, &mut err_out).unwrap();
    assert_eq!(report.scan.entries_appended, 0);
}

#[test]
fn resume_fills_slot_left_zero_by_an_injected_failure() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("good.txt"), b"fine").unwrap();
    std::fs::write(dir.path().join("bad.txt"), b"will fail once").unwrap();
    let db_path = dir.path().join("db.ajfs");

    // Scan with init-only, then hash manually with one path excluded via the scanner's fault hook
    // is awkward from the orchestrator surface (it owns the Hasher internally), so this exercises
    // the same property through Scanner+Hasher directly, then Resume via the orchestrator.
    let mut db = Database::create(&db_path, dir.path(), ajfs::database::feature::HASH_TABLE, Some(HashAlgo::Sha1)).unwrap();
    let mut err_out = Vec::new();
    ajfs::scanner::Scanner::new().scan(dir.path(), &mut db, &mut err_out).unwrap();
    db.finish_entries().unwrap();
    let hasher = ajfs::hasher::Hasher::new(HashAlgo::Sha1).with_hash_fn(|path, reader| {
        if path.ends_with("bad.txt") {
            Err(ajfs::error::Error::corrupted("injected sha1 failure"))
        } else {
            let mut buf = Vec::new();
            std::io::Read::read_to_end(reader, &mut buf).unwrap();
            use sha1::Digest;
            let digest = sha1::Sha1::digest(&buf);
            Ok((digest.to_vec(), buf.len() as u64))
        }
    });
    let outcome = hasher.run(dir.path(), &mut db, &mut err_out).unwrap();
    assert_eq!(outcome.hashed, 1);
    assert_eq!(outcome.failed, 1);
    db.close().unwrap();

    {
        let db = Database::open(&db_path).unwrap();
        assert_eq!(db.state(), State::HashTableOpen);
    }

    let outcome = resume(&db_path, &mut err_out).unwrap();
    assert_eq!(outcome.hashed, 1);
    assert_eq!(outcome.failed, 0);

    let db = Database::open(&db_path).unwrap();
    assert_eq!(db.state(), State::Complete);
}

#[test]
fn update_without_filesystem_changes_keeps_the_same_digests() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("one.txt"), b"alpha").unwrap();
    std::fs::write(dir.path().join("two.txt"), b"beta").unwrap();
    let db_path = dir.path().join("db.ajfs");
    let mut err_out = Vec::new();
    let mut cfg = scan_cfg(db_path.clone(), dir.path().to_path_buf(), Some(HashAlgo::Sha256));
    scan(&mut cfg, &mut err_out).unwrap();

    let before_db = Database::open(&db_path).unwrap();
    let mut before = Vec::new();
    before_db
        .read_all_entries_with_hashes(|pi, digest| {
            before.push((pi.path.clone(), digest.to_vec()));
            Ok(())
        })
        .unwrap();
    drop(before_db);

    update(&UpdateConfig { db_path: db_path.clone(), exclude: Vec::new() }, &mut err_out).unwrap();

    let after_db = Database::open(&db_path).unwrap();
    let mut after = Vec::new();
    after_db
        .read_all_entries_with_hashes(|pi, digest| {
            after.push((pi.path.clone(), digest.to_vec()));
            Ok(())
        })
        .unwrap();

    before.sort();
    after.sort();
    assert_eq!(before, after);
}

#[test]
fn update_after_filter_removal_hashes_the_newly_included_entry() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("visible.txt"), b"x").unwrap();
    std::fs::write(dir.path().join("hidden.secret"), b"y").unwrap();
    let db_path = dir.path().join("db.ajfs");
    let mut err_out = Vec::new();
    let mut initial_cfg = ScanConfig {
        db_path: db_path.clone(),
        root: dir.path().to_path_buf(),
        hash_algo: Some(HashAlgo::Sha256),
        exclude: vec![r"\.secret$".to_string()],
        ..Default::default()
    };
    scan(&mut initial_cfg, &mut err_out).unwrap();
    assert_eq!(Database::open(&db_path).unwrap().entry_count(), 2); // root + visible.txt

    // Drop the exclude filter on update: the previously-hidden file is now scanned and hashed.
    update(&UpdateConfig { db_path: db_path.clone(), exclude: Vec::new() }, &mut err_out).unwrap();
    let db = Database::open(&db_path).unwrap();
    assert_eq!(db.entry_count(), 3);
    assert_eq!(db.state(), State::Complete);
}

#[test]
fn fix_round_trip_recovers_header_and_export_matches_reference() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("only.txt"), b"payload").unwrap();
    let db_path = dir.path().join("db.ajfs");
    let mut err_out = Vec::new();
    let mut cfg = scan_cfg(db_path.clone(), dir.path().to_path_buf(), Some(HashAlgo::Sha1));
    scan(&mut cfg, &mut err_out).unwrap();

    let header_bak = dir.path().join("header_before_crash.bak");
    {
        let db = Database::open(&db_path).unwrap();
        db.backup_header(&header_bak).unwrap();
        db.interrupted().unwrap();
    }
    assert!(Database::open(&db_path).is_err());

    let report = fix(&FixConfig { db_path: db_path.clone(), dry_run: false }).unwrap();
    assert!(report.applied);
    assert_eq!(report.recommended_state, State::Complete);

    let db = Database::open(&db_path).unwrap();
    let mut exported = Vec::new();
    hashdeep::write(&db, "sha1", &mut exported).unwrap();
    let records = hashdeep::read(&mut Cursor::new(exported)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, "only.txt");
    assert_eq!(records[0].hex_digest.len(), 40);

    // RestoreDatabaseHeader can also recover the same file from the pre-crash header backup.
    {
        let db = Database::open(&db_path).unwrap();
        db.interrupted().unwrap();
    }
    restore_database_header(&db_path, &header_bak).unwrap();
    let restored = Database::open(&db_path).unwrap();
    assert_eq!(restored.state(), State::Complete);
}
