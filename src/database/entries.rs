//! The entry table: the always-present, append-only-during-scan table of [`PathInfo`] records.
//!
//! During `Init` the table is accumulated purely in memory (`AppendEntry`); `FinishEntries` is the
//! one point where it is serialized to disk as a single block, following its own sub-header. Once
//! written it is never mutated again, so the whole table (plus an `Id → index` lookup) is simply
//! kept resident for the lifetime of the handle.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::database::header::HEADER_LEN;
use crate::error::{Error, Result};
use crate::pathinfo::PathInfo;

/// `count:u64` + `byte_len:u64`.
pub const SUBHEADER_LEN: u64 = 16;

/// An in-memory, fully-loaded view of the on-disk entry table.
#[derive(Debug, Default)]
pub struct EntryTable {
    records: Vec<PathInfo>,
    /// Byte offset of each record's first byte, measured from the start of the file.
    offsets: Vec<u64>,
    by_id: HashMap<u64, usize>,
    byte_len: u64,
}

impl EntryTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }

    pub fn get(&self, index: usize) -> Option<&PathInfo> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &PathInfo)> {
        self.records.iter().enumerate()
    }

    pub fn find(&self, id: u64) -> Option<(usize, u64)> {
        self.by_id.get(&id).map(|&idx| (idx, self.offsets[idx]))
    }

    pub fn contains_id(&self, id: u64) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Append a record to the in-memory staging area used while the database is still `Init`.
    ///
    /// Returns the slot index it will occupy once flushed.
    pub fn stage(&mut self, entry: PathInfo) -> Result<usize> {
        if self.by_id.contains_key(&entry.id) {
            return Err(Error::duplicate_id(entry.id));
        }
        let index = self.records.len();
        self.by_id.insert(entry.id, index);
        self.records.push(entry);
        Ok(index)
    }

    /// Serialize the staged (or previously loaded) records to `file` starting at `HEADER_LEN`,
    /// computing each record's absolute file offset.
    pub fn flush(&mut self, file: &mut std::fs::File) -> Result<()> {
        let mut body = Vec::new();
        let mut offsets = Vec::with_capacity(self.records.len());
        let mut off = HEADER_LEN + SUBHEADER_LEN;
        for record in &self.records {
            offsets.push(off);
            let before = body.len();
            record.encode(&mut body);
            off += (body.len() - before) as u64;
        }
        self.byte_len = body.len() as u64;
        self.offsets = offsets;

        file.seek(SeekFrom::Start(HEADER_LEN))
            .map_err(|e| Error::io("seeking to entry table", e))?;
        let mut sub_header = Vec::with_capacity(SUBHEADER_LEN as usize);
        sub_header.extend_from_slice(&(self.records.len() as u64).to_le_bytes());
        sub_header.extend_from_slice(&self.byte_len.to_le_bytes());
        file.write_all(&sub_header)
            .map_err(|e| Error::io("writing entry table sub-header", e))?;
        file.write_all(&body)
            .map_err(|e| Error::io("writing entry table body", e))?;
        Ok(())
    }

    /// Load a previously flushed entry table from `file`, whose cursor is expected to start at
    /// `HEADER_LEN`. Leaves the cursor positioned just after the table on return.
    pub fn read(file: &mut std::fs::File) -> Result<Self> {
        file.seek(SeekFrom::Start(HEADER_LEN))
            .map_err(|e| Error::io("seeking to entry table", e))?;
        let mut sub_header = [0u8; SUBHEADER_LEN as usize];
        file.read_exact(&mut sub_header)
            .map_err(|e| Error::io("reading entry table sub-header", e))?;
        let count = u64::from_le_bytes(sub_header[0..8].try_into().unwrap()) as usize;
        let byte_len = u64::from_le_bytes(sub_header[8..16].try_into().unwrap());

        let mut body = vec![0u8; byte_len as usize];
        file.read_exact(&mut body)
            .map_err(|e| Error::io("reading entry table body", e))?;

        let mut records = Vec::with_capacity(count);
        let mut offsets = Vec::with_capacity(count);
        let mut by_id = HashMap::with_capacity(count);
        let mut pos = 0usize;
        let mut off = HEADER_LEN + SUBHEADER_LEN;
        for i in 0..count {
            let (record, consumed) = PathInfo::decode(&body[pos..])?;
            if by_id.insert(record.id, i).is_some() {
                return Err(Error::duplicate_id(record.id));
            }
            offsets.push(off);
            off += consumed as u64;
            pos += consumed;
            records.push(record);
        }
        if pos != body.len() {
            return Err(Error::corrupted(
                "entry table byte_len does not match sum of record lengths",
            ));
        }

        Ok(EntryTable {
            records,
            offsets,
            by_id,
            byte_len,
        })
    }

    /// Tolerant load for repair: never fails on a truncated or length-mismatched table. Scans
    /// records from the body until one fails to decode, its id collides with an earlier record, or
    /// the bytes run out, then reports the sub-header lengths the recovered records actually
    /// support rather than trusting `count`/`byte_len` as declared on disk.
    pub fn read_tolerant(file: &mut std::fs::File) -> Result<Self> {
        file.seek(SeekFrom::Start(HEADER_LEN))
            .map_err(|e| Error::io("seeking to entry table", e))?;
        let mut sub_header = [0u8; SUBHEADER_LEN as usize];
        if file.read_exact(&mut sub_header).is_err() {
            // The crash happened before `finish_entries` ever flushed the table.
            return Ok(EntryTable::default());
        }
        let declared_byte_len = u64::from_le_bytes(sub_header[8..16].try_into().unwrap());

        let mut present = Vec::new();
        file.read_to_end(&mut present)
            .map_err(|e| Error::io("reading entry table body", e))?;
        let cap = declared_byte_len.min(present.len() as u64) as usize;
        let body = &present[..cap];

        let mut records = Vec::new();
        let mut offsets = Vec::new();
        let mut by_id = HashMap::new();
        let mut pos = 0usize;
        let mut off = HEADER_LEN + SUBHEADER_LEN;
        while pos < body.len() {
            match PathInfo::decode(&body[pos..]) {
                Ok((record, consumed)) if !by_id.contains_key(&record.id) => {
                    by_id.insert(record.id, records.len());
                    offsets.push(off);
                    off += consumed as u64;
                    pos += consumed;
                    records.push(record);
                }
                _ => break,
            }
        }

        Ok(EntryTable {
            byte_len: pos as u64,
            records,
            offsets,
            by_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathinfo::{Kind, Mtime};
    use std::fs::OpenOptions;

    fn pi(path: &str) -> PathInfo {
        PathInfo::new(Kind::File, 1, Mtime { secs: 0, nsecs: 0 }, 0o644, path.into())
    }

    #[test]
    fn flush_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.set_len(HEADER_LEN).unwrap();

        let mut table = EntryTable::default();
        table.stage(PathInfo::root(0o755, Mtime { secs: 0, nsecs: 0 })).unwrap();
        table.stage(pi("a.txt")).unwrap();
        table.stage(pi("dir/b.txt")).unwrap();
        table.flush(&mut file).unwrap();

        let reloaded = EntryTable::read(&mut file).unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(reloaded.get(0).unwrap().path, ".");
        assert_eq!(reloaded.get(1).unwrap().path, "a.txt");
        assert!(reloaded.find(reloaded.get(2).unwrap().id).is_some());
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut table = EntryTable::default();
        table.stage(pi("same")).unwrap();
        assert!(table.stage(pi("same")).is_err());
    }

    #[test]
    fn tolerant_read_recovers_truncated_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.set_len(HEADER_LEN).unwrap();

        let mut table = EntryTable::default();
        table.stage(PathInfo::root(0o755, Mtime { secs: 0, nsecs: 0 })).unwrap();
        table.stage(pi("a.txt")).unwrap();
        table.stage(pi("dir/b.txt")).unwrap();
        table.flush(&mut file).unwrap();

        // Simulate a crash mid-write: chop off the last few bytes of the last record.
        let full_len = file.metadata().unwrap().len();
        file.set_len(full_len - 3).unwrap();

        assert!(EntryTable::read(&mut file).is_err());
        let recovered = EntryTable::read_tolerant(&mut file).unwrap();
        assert_eq!(recovered.len(), 2);
        assert_eq!(recovered.get(0).unwrap().path, ".");
        assert_eq!(recovered.get(1).unwrap().path, "a.txt");
    }

    #[test]
    fn tolerant_read_of_never_flushed_table_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.set_len(HEADER_LEN).unwrap();

        let recovered = EntryTable::read_tolerant(&mut file).unwrap();
        assert!(recovered.is_empty());
    }
}
