//! The `hashdeep` interchange format: one line per file, `<size>,<hex_digest>,./<relative_path>`.
//!
//! Writer and reader share this module since the reader exists only to let tests compare a
//! database's export against a reference hashdeep file.

use std::io::{BufRead, Write};

use crate::database::Database;
use crate::error::{Error, Result};
use crate::pathinfo::Kind;

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// One parsed, non-comment line of a hashdeep file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub size: u64,
    pub hex_digest: String,
    pub path: String,
}

/// Write every file-kind entry with a computed digest, in entry order, as hashdeep lines.
/// Non-file entries and entries whose hash slot is still unset are omitted.
pub fn write(db: &Database, algo_name: &str, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "%%%% HASHDEEP-1.0").map_err(|e| Error::io("writing hashdeep header", e))?;
    writeln!(out, "## algorithm: {algo_name}").map_err(|e| Error::io("writing hashdeep header", e))?;

    let mut err: Option<Error> = None;
    db.read_all_entries_with_hashes(|entry, digest| {
        if entry.kind != Kind::File {
            return Ok(());
        }
        let line = format!("{},{},./{}", entry.size, hex_encode(digest), entry.path);
        if let Err(e) = writeln!(out, "{line}") {
            err = Some(Error::io("writing hashdeep line", e));
        }
        Ok(())
    })?;
    if let Some(e) = err {
        return Err(e);
    }
    Ok(())
}

/// Parse a hashdeep file, skipping `%%`/`##` comment lines. Returns records in file order.
pub fn read(input: &mut dyn BufRead) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for line in input.lines() {
        let line = line.map_err(|e| Error::io("reading hashdeep line", e))?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() || trimmed.starts_with("%%") || trimmed.starts_with("##") {
            continue;
        }
        let mut parts = trimmed.splitn(3, ',');
        let size = parts
            .next()
            .ok_or_else(|| Error::corrupted("hashdeep line missing size field"))?
            .parse::<u64>()
            .map_err(|_| Error::corrupted("hashdeep line has non-numeric size field"))?;
        let hex_digest = parts
            .next()
            .ok_or_else(|| Error::corrupted("hashdeep line missing digest field"))?
            .to_string();
        let path = parts
            .next()
            .ok_or_else(|| Error::corrupted("hashdeep line missing path field"))?
            .trim_start_matches("./")
            .to_string();
        records.push(Record { size, hex_digest, path });
    }
    Ok(records)
}
