//! `clap`-driven command-line front end. This module only parses arguments, builds an
//! orchestrator config, drives optional progress output, and maps `Error::kind()` to a process
//! exit code; the library itself never calls `std::process::exit` or reads `std::env`.

use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Command};
use indicatif::{ProgressBar, ProgressStyle};

use ajfs::database::HashAlgo;
use ajfs::error::{Error, Kind};
use ajfs::export::hashdeep;
use ajfs::hasher::Hasher;
use ajfs::orchestrate::fix::{fix, restore_database_header, FixConfig};
use ajfs::orchestrate::resume::resume_with_progress;
use ajfs::orchestrate::scan::{scan, ScanConfig};
use ajfs::orchestrate::update::{update, UpdateConfig};
use ajfs::Database;

/// A spinner-style bar for the scan phase: the entry count isn't known ahead of the walk.
fn scan_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {pos} entries {msg}")
            .unwrap(),
    );
    pb
}

/// A bounded bar for the hash phase: `total` entries are already known to need hashing.
fn hash_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );
    pb
}

/// A progress hook for a freshly-opened database, suitable for `resume`: the hash phase bar is
/// sized from `Hasher::pending_count` up front, since unlike a bare scan the entries are already
/// on disk.
fn sized_hash_progress(db_path: &std::path::Path) -> Option<Box<ajfs::progress::HashProgressFn>> {
    let db = Database::open(db_path).ok()?;
    let total = Hasher::pending_count(&db).ok()? as u64;
    let pb = hash_progress_bar(total);
    Some(Box::new(move |path: &std::path::Path| {
        pb.set_message(path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default());
        pb.inc(1);
        if pb.position() >= pb.length().unwrap_or(0) {
            pb.finish_with_message("Done!");
        }
    }))
}

fn exclude_arg() -> Arg {
    Arg::new("exclude")
        .long("exclude")
        .help("Exclude paths matching this regex; may be repeated")
        .action(ArgAction::Append)
}

pub fn cli() -> ArgMatches {
    Command::new("ajfs")
        .about("Filesystem fingerprinting and change-detection tool")
        .version("0.1.0")
        .subcommand(
            Command::new("scan")
                .about("Record an initial snapshot of a directory tree")
                .arg(Arg::new("db").long("db").required(true).value_parser(clap::value_parser!(PathBuf)))
                .arg(Arg::new("root").long("root").required(true).value_parser(clap::value_parser!(PathBuf)))
                .arg(Arg::new("hash").long("hash").help("sha1 | sha256 | sha512"))
                .arg(Arg::new("force").long("force").action(ArgAction::SetTrue))
                .arg(Arg::new("init-only").long("init-only").action(ArgAction::SetTrue))
                .arg(exclude_arg()),
        )
        .subcommand(
            Command::new("resume")
                .about("Finish hashing a previously scanned database")
                .arg(Arg::new("db").long("db").required(true).value_parser(clap::value_parser!(PathBuf))),
        )
        .subcommand(
            Command::new("update")
                .about("Incrementally re-scan, preserving hashes for unchanged entries")
                .arg(Arg::new("db").long("db").required(true).value_parser(clap::value_parser!(PathBuf)))
                .arg(exclude_arg()),
        )
        .subcommand(
            Command::new("fix")
                .about("Recover a database left Interrupted by a crash")
                .arg(Arg::new("db").long("db").required(true).value_parser(clap::value_parser!(PathBuf)))
                .arg(Arg::new("dry-run").long("dry-run").action(ArgAction::SetTrue))
                .arg(Arg::new("yes").long("yes").action(ArgAction::SetTrue))
                .arg(Arg::new("restore").long("restore").value_parser(clap::value_parser!(PathBuf))),
        )
        .subcommand(
            Command::new("export")
                .about("Export hashes in the hashdeep interchange format")
                .arg(Arg::new("db").long("db").required(true).value_parser(clap::value_parser!(PathBuf)))
                .arg(Arg::new("format").long("format").default_value("hashdeep"))
                .arg(Arg::new("out").long("out").required(true).value_parser(clap::value_parser!(PathBuf))),
        )
        .get_matches()
}

fn exit_code(err: &Error) -> i32 {
    match err.kind() {
        Kind::Operational => 1,
        Kind::Corruption => 2,
    }
}

fn collect_exclude(matches: &ArgMatches) -> Vec<String> {
    matches
        .get_many::<String>("exclude")
        .map(|vals| vals.cloned().collect())
        .unwrap_or_default()
}

fn run_scan(matches: &ArgMatches) -> Result<(), Error> {
    let hash_algo = matches
        .get_one::<String>("hash")
        .map(|s| HashAlgo::parse(s))
        .transpose()?;

    let scan_pb = scan_progress_bar();
    let hash_pb = scan_progress_bar();
    let scan_pb_handle = scan_pb.clone();
    let hash_pb_handle = hash_pb.clone();

    let mut cfg = ScanConfig {
        db_path: matches.get_one::<PathBuf>("db").unwrap().clone(),
        root: matches.get_one::<PathBuf>("root").unwrap().clone(),
        hash_algo,
        force: matches.get_flag("force"),
        init_only: matches.get_flag("init-only"),
        exclude: collect_exclude(matches),
        scan_progress: Some(Box::new(move |path: &str| {
            scan_pb.set_message(path.to_string());
            scan_pb.inc(1);
        })),
        hash_progress: Some(Box::new(move |path: &std::path::Path| {
            hash_pb.set_message(path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default());
            hash_pb.inc(1);
        })),
    };
    let mut stderr = std::io::stderr();
    let report = scan(&mut cfg, &mut stderr)?;
    scan_pb_handle.finish_with_message("Done!");
    hash_pb_handle.finish_with_message("Done!");
    println!(
        "scanned {} entries ({} errors); hashed {}",
        report.scan.entries_appended,
        report.scan.errors_reported,
        report.hash.map(|h| h.hashed).unwrap_or(0)
    );
    Ok(())
}

fn run_resume(matches: &ArgMatches) -> Result<(), Error> {
    let db_path = matches.get_one::<PathBuf>("db").unwrap();
    let hash_progress = sized_hash_progress(db_path);
    let mut stderr = std::io::stderr();
    let outcome = resume_with_progress(db_path, &mut stderr, hash_progress)?;
    println!("hashed {} entries ({} failed)", outcome.hashed, outcome.failed);
    Ok(())
}

fn run_update(matches: &ArgMatches) -> Result<(), Error> {
    let cfg = UpdateConfig {
        db_path: matches.get_one::<PathBuf>("db").unwrap().clone(),
        exclude: collect_exclude(matches),
    };
    let mut stderr = std::io::stderr();
    let outcome = update(&cfg, &mut stderr)?;
    println!("hashed {} new entries ({} failed)", outcome.hashed, outcome.failed);
    Ok(())
}

fn run_fix(matches: &ArgMatches) -> Result<(), Error> {
    let db_path = matches.get_one::<PathBuf>("db").unwrap().clone();

    if let Some(bak_path) = matches.get_one::<PathBuf>("restore") {
        restore_database_header(&db_path, bak_path)?;
        println!("restored header of {} from {}", db_path.display(), bak_path.display());
        return Ok(());
    }

    let dry_run = matches.get_flag("dry-run");
    if !dry_run && !matches.get_flag("yes") {
        let confirmed = inquire::Confirm::new(&format!("Rewrite the header of {}?", db_path.display()))
            .with_default(false)
            .prompt()
            .map_err(|_| Error::UserAbort)?;
        if !confirmed {
            return Err(Error::UserAbort);
        }
    }

    let report = fix(&FixConfig { db_path, dry_run })?;
    println!(
        "state {} -> {} (backup at {}){}",
        report.previous_state.as_str(),
        report.recommended_state.as_str(),
        report.bak_path.display(),
        if report.applied { "" } else { " [dry run]" }
    );
    Ok(())
}

fn run_export(matches: &ArgMatches) -> Result<(), Error> {
    let db_path = matches.get_one::<PathBuf>("db").unwrap();
    let out_path = matches.get_one::<PathBuf>("out").unwrap();
    let db = Database::open(db_path)?;
    let algo_name = db.hash_table_algo().map(|a| a.name()).unwrap_or("none");
    let mut out = std::fs::File::create(out_path).map_err(|e| Error::io("creating export file", e))?;
    hashdeep::write(&db, algo_name, &mut out)?;
    println!("exported to {}", out_path.display());
    Ok(())
}

/// Dispatch a parsed subcommand. Returns the process exit code.
pub fn dispatch(matches: &ArgMatches) -> i32 {
    let result = match matches.subcommand() {
        Some(("scan", m)) => run_scan(m),
        Some(("resume", m)) => run_resume(m),
        Some(("update", m)) => run_update(m),
        Some(("fix", m)) => run_fix(m),
        Some(("export", m)) => run_export(m),
        _ => {
            eprintln!("no subcommand given; try --help");
            return 1;
        }
    };

    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("ajfs: {err}");
            exit_code(&err)
        }
    }
}
