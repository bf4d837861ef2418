//! The hash table: a fixed-stride array of digest slots, one per entry, written positionally.
//!
//! Slot `i` always corresponds to entry `i`; there is no per-slot key. An all-zero slot means "not
//! yet computed". Writes are positional and idempotent, so the table never needs read-modify-write
//! locking beyond the handle's own exclusivity.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{Error, Result};

/// `algo:u8` + `digest_len:u8` + `count:u64`.
pub const SUBHEADER_LEN: u64 = 10;

/// The hash algorithm recorded in a database's `HashTable` sub-header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgo {
    pub fn tag(self) -> u8 {
        match self {
            HashAlgo::Sha1 => 1,
            HashAlgo::Sha256 => 2,
            HashAlgo::Sha512 => 3,
        }
    }

    pub fn digest_len(self) -> usize {
        match self {
            HashAlgo::Sha1 => 20,
            HashAlgo::Sha256 => 32,
            HashAlgo::Sha512 => 64,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(HashAlgo::Sha1),
            2 => Ok(HashAlgo::Sha256),
            3 => Ok(HashAlgo::Sha512),
            other => Err(Error::corrupted(format!("unknown hash algo tag {other}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HashAlgo::Sha1 => "sha1",
            HashAlgo::Sha256 => "sha256",
            HashAlgo::Sha512 => "sha512",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha1" => Ok(HashAlgo::Sha1),
            "sha256" => Ok(HashAlgo::Sha256),
            "sha512" => Ok(HashAlgo::Sha512),
            other => Err(Error::corrupted(format!("unsupported hash algorithm '{other}'"))),
        }
    }
}

/// An in-memory, fully-loaded view of the on-disk hash table.
#[derive(Debug)]
pub struct HashTable {
    algo: HashAlgo,
    digest_len: usize,
    count: usize,
    slots: Vec<u8>,
    /// Absolute file offset of the first slot byte (i.e. just past the sub-header).
    body_offset: u64,
}

impl HashTable {
    pub fn algo(&self) -> HashAlgo {
        self.algo
    }

    pub fn digest_len(&self) -> usize {
        self.digest_len
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Allocate a zero-filled table for `count` entries and write it to `file` at `offset`.
    pub fn allocate(file: &mut std::fs::File, offset: u64, algo: HashAlgo, count: usize) -> Result<Self> {
        let digest_len = algo.digest_len();
        let slots = vec![0u8; count * digest_len];

        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io("seeking to hash table", e))?;
        let mut sub_header = Vec::with_capacity(SUBHEADER_LEN as usize);
        sub_header.push(algo.tag());
        sub_header.push(digest_len as u8);
        sub_header.extend_from_slice(&(count as u64).to_le_bytes());
        file.write_all(&sub_header)
            .map_err(|e| Error::io("writing hash table sub-header", e))?;
        file.write_all(&slots)
            .map_err(|e| Error::io("writing hash table body", e))?;

        Ok(HashTable {
            algo,
            digest_len,
            count,
            slots,
            body_offset: offset + SUBHEADER_LEN,
        })
    }

    /// Load a previously-allocated table from `file` at `offset`.
    pub fn read(file: &mut std::fs::File, offset: u64) -> Result<Self> {
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io("seeking to hash table", e))?;
        let mut sub_header = [0u8; SUBHEADER_LEN as usize];
        file.read_exact(&mut sub_header)
            .map_err(|e| Error::io("reading hash table sub-header", e))?;
        let algo = HashAlgo::from_tag(sub_header[0])?;
        let digest_len = sub_header[1] as usize;
        if digest_len != algo.digest_len() {
            return Err(Error::corrupted("hash table digest_len does not match algo"));
        }
        let count = u64::from_le_bytes(sub_header[2..10].try_into().unwrap()) as usize;

        let mut slots = vec![0u8; count * digest_len];
        file.read_exact(&mut slots)
            .map_err(|e| Error::io("reading hash table body", e))?;

        Ok(HashTable {
            algo,
            digest_len,
            count,
            slots,
            body_offset: offset + SUBHEADER_LEN,
        })
    }

    /// Tolerant load for repair: recomputes `count` from `expected_count` (the entry table's
    /// recovered length, per invariant I4/I5) and the bytes actually present, rather than trusting
    /// the stored sub-header. Returns `None` if no table can be read at all (sub-header missing or
    /// its algorithm tag unrecognized), leaving the caller to treat hashing as entirely pending.
    pub fn read_tolerant(file: &mut std::fs::File, offset: u64, expected_count: usize) -> Result<Option<Self>> {
        if file.seek(SeekFrom::Start(offset)).is_err() {
            return Ok(None);
        }
        let mut sub_header = [0u8; SUBHEADER_LEN as usize];
        if file.read_exact(&mut sub_header).is_err() {
            return Ok(None);
        }
        let Ok(algo) = HashAlgo::from_tag(sub_header[0]) else {
            return Ok(None);
        };
        let digest_len = sub_header[1] as usize;
        if digest_len != algo.digest_len() {
            return Ok(None);
        }

        let mut present = Vec::new();
        file.read_to_end(&mut present)
            .map_err(|e| Error::io("reading hash table body", e))?;
        let available = present.len() / digest_len;
        let copy_len = expected_count.min(available) * digest_len;

        let mut slots = vec![0u8; expected_count * digest_len];
        slots[..copy_len].copy_from_slice(&present[..copy_len]);

        Ok(Some(HashTable {
            algo,
            digest_len,
            count: expected_count,
            slots,
            body_offset: offset + SUBHEADER_LEN,
        }))
    }

    fn slot_range(&self, index: usize) -> std::ops::Range<usize> {
        let start = index * self.digest_len;
        start..start + self.digest_len
    }

    pub fn slot(&self, index: usize) -> &[u8] {
        &self.slots[self.slot_range(index)]
    }

    pub fn is_unset(&self, index: usize) -> bool {
        self.slot(index).iter().all(|&b| b == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[u8])> {
        (0..self.count).map(move |i| (i, self.slot(i)))
    }

    /// Write `digest` into slot `index`, both in memory and positionally on disk. Does not fsync;
    /// callers batch writes and fsync once (see [`super::Database::close`]).
    pub fn write_slot(&mut self, file: &mut std::fs::File, index: usize, digest: &[u8]) -> Result<()> {
        if digest.len() != self.digest_len {
            return Err(Error::corrupted(format!(
                "digest length {} does not match algorithm's {}",
                digest.len(),
                self.digest_len
            )));
        }
        if index >= self.count {
            return Err(Error::corrupted("hash slot index out of range"));
        }
        let range = self.slot_range(index);
        self.slots[range].copy_from_slice(digest);

        let pos = self.body_offset + (index * self.digest_len) as u64;
        file.seek(SeekFrom::Start(pos))
            .map_err(|e| Error::io("seeking to hash slot", e))?;
        file.write_all(digest)
            .map_err(|e| Error::io("writing hash slot", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    #[test]
    fn allocate_write_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ht");
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();

        let mut table = HashTable::allocate(&mut file, 0, HashAlgo::Sha256, 3).unwrap();
        assert!(table.is_unset(0));
        let digest = vec![7u8; 32];
        table.write_slot(&mut file, 1, &digest).unwrap();
        assert!(!table.is_unset(1));
        assert_eq!(table.slot(1), digest.as_slice());

        let reloaded = HashTable::read(&mut file, 0).unwrap();
        assert_eq!(reloaded.count(), 3);
        assert_eq!(reloaded.slot(1), digest.as_slice());
        assert!(reloaded.is_unset(0));
        assert!(reloaded.is_unset(2));
    }

    #[test]
    fn tolerant_read_pads_a_short_table_to_expected_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ht");
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();

        let mut table = HashTable::allocate(&mut file, 0, HashAlgo::Sha256, 3).unwrap();
        table.write_slot(&mut file, 0, &[9u8; 32]).unwrap();
        // Simulate the entry table having grown to 5 entries (e.g. after tolerant entry recovery
        // contradicted the stale hash table allocation).
        let recovered = HashTable::read_tolerant(&mut file, 0, 5).unwrap().unwrap();
        assert_eq!(recovered.count(), 5);
        assert_eq!(recovered.slot(0), [9u8; 32].as_slice());
        assert!(recovered.is_unset(3));
        assert!(recovered.is_unset(4));
    }

    #[test]
    fn tolerant_read_of_missing_table_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ht");
        let file_res = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path);
        let mut file = file_res.unwrap();
        assert!(HashTable::read_tolerant(&mut file, 0, 3).unwrap().is_none());
    }

    #[test]
    fn wrong_digest_length_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ht");
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        let mut table = HashTable::allocate(&mut file, 0, HashAlgo::Sha1, 1).unwrap();
        assert!(table.write_slot(&mut file, 0, &[0u8; 32]).is_err());
    }
}
