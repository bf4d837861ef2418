//! The database file: header, entry table, hash table and tree table, and the handle that owns
//! them.
//!
//! A [`Database`] is the only thing in this crate that touches the file format directly. Every
//! other component (scanner, hasher, orchestrators) goes through its public operations, which
//! enforce the state machine described in the module-level design notes.

pub mod entries;
pub mod header;
pub mod hashtable;
mod lock;
pub mod tree;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::pathinfo::{Kind, Mtime, PathInfo};

pub use entries::EntryTable;
pub use hashtable::{HashAlgo, HashTable};
pub use header::{feature, Header, State};
pub use tree::Tree;

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn metadata_to_mtime(meta: &std::fs::Metadata) -> Mtime {
    match meta.modified() {
        Ok(t) => match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Mtime {
                secs: d.as_secs() as i64,
                nsecs: d.subsec_nanos() as i32,
            },
            Err(_) => Mtime { secs: 0, nsecs: 0 },
        },
        Err(_) => Mtime { secs: 0, nsecs: 0 },
    }
}

#[cfg(unix)]
fn metadata_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn metadata_mode(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// A live handle on a database file. Exactly one of these may exist for a given path at a time
/// (enforced by an advisory exclusive lock on the underlying file descriptor).
pub struct Database {
    file: std::fs::File,
    path: PathBuf,
    header: Header,
    entries: EntryTable,
    hash_table: Option<HashTable>,
    tree: Option<Tree>,
    pending_hash_algo: Option<HashAlgo>,
}

impl Database {
    /// Create a fresh database at `path`. Fails with [`Error::AlreadyExists`] if the file already
    /// exists; callers that want to overwrite must remove it first (the force flag is an
    /// orchestrator-level concern, see `orchestrate::scan`).
    pub fn create(path: &Path, root: &Path, features: u16, hash_algo: Option<HashAlgo>) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    Error::AlreadyExists {
                        path: path.to_path_buf(),
                    }
                } else {
                    Error::io("creating database file", e)
                }
            })?;

        lock::try_lock_exclusive(&file, path)?;
        file.set_len(header::HEADER_LEN)
            .map_err(|e| Error::io("reserving header region", e))?;

        let root_meta = std::fs::metadata(root).map_err(|e| Error::io("statting scan root", e))?;
        let root_entry = PathInfo::new(
            Kind::Dir,
            0,
            metadata_to_mtime(&root_meta),
            metadata_mode(&root_meta),
            ".".to_string(),
        );

        let header = Header::new(features, root.display().to_string(), now_unix());
        header.write_to(&mut file)?;

        let mut entries = EntryTable::default();
        entries.stage(root_entry)?;

        Ok(Database {
            file,
            path: path.to_path_buf(),
            header,
            entries,
            hash_table: None,
            tree: None,
            pending_hash_algo: hash_algo,
        })
    }

    fn open_for(path: &Path, allowed: &[State]) -> Result<(std::fs::File, Header)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::io("opening database file", e))?;
        lock::try_lock_exclusive(&file, path)?;
        let header = Header::read_from(&mut file)?;
        if !allowed.iter().any(|s| *s == header.state) {
            return Err(Error::bad_state("open", header.state.as_str()));
        }
        Ok((file, header))
    }

    fn load_tables(mut file: std::fs::File, header: Header) -> Result<Self> {
        let entries = EntryTable::read(&mut file)?;
        let mut offset = header::HEADER_LEN + entries::SUBHEADER_LEN + entries.byte_len();

        let hash_table = if header.has_feature(feature::HASH_TABLE) {
            let table = HashTable::read(&mut file, offset)?;
            if table.count() != entries.len() {
                return Err(Error::corrupted(
                    "hash table count does not match entry table length",
                ));
            }
            offset += hashtable::SUBHEADER_LEN + (table.count() * table.digest_len()) as u64;
            Some(table)
        } else {
            None
        };

        let tree = if header.has_feature(feature::TREE) {
            Some(Tree::read(&mut file, offset)?)
        } else {
            None
        };

        Ok(Database {
            path: PathBuf::new(),
            file,
            header,
            entries,
            hash_table,
            tree,
            pending_hash_algo: None,
        })
    }

    /// Tolerant counterpart of `load_tables`, used only by `open_for_fix`: never fails on a
    /// truncated entry table or a hash table whose `count` disagrees with it. Sub-header lengths
    /// are re-derived from the bytes actually present rather than trusted as stored; the repaired
    /// lengths are only written back to disk if the caller goes on to call
    /// `rewrite_tables_for_fix`.
    fn load_tables_tolerant(mut file: std::fs::File, header: Header) -> Result<Self> {
        let entries = EntryTable::read_tolerant(&mut file)?;
        let mut offset = header::HEADER_LEN + entries::SUBHEADER_LEN + entries.byte_len();

        let hash_table = if header.has_feature(feature::HASH_TABLE) {
            HashTable::read_tolerant(&mut file, offset, entries.len())?
        } else {
            None
        };
        if let Some(table) = &hash_table {
            offset += hashtable::SUBHEADER_LEN + (table.count() * table.digest_len()) as u64;
        }

        let tree = if header.has_feature(feature::TREE) {
            Tree::read(&mut file, offset).ok()
        } else {
            None
        };

        Ok(Database {
            path: PathBuf::new(),
            file,
            header,
            entries,
            hash_table,
            tree,
            pending_hash_algo: None,
        })
    }

    /// Open an existing database whose state is `EntriesComplete`, `Complete` or `HashTableOpen`.
    pub fn open(path: &Path) -> Result<Self> {
        let (file, header) = Self::open_for(
            path,
            &[State::EntriesComplete, State::Complete, State::HashTableOpen],
        )?;
        let mut db = Self::load_tables(file, header)?;
        db.path = path.to_path_buf();
        Ok(db)
    }

    /// Open a database for hash writes; valid on `EntriesComplete`, `HashTableOpen`, or
    /// `Complete` (resuming a complete database is a no-op: no entry will need hashing, and
    /// [`Database::close`] restores the `Complete` state, so the file ends up byte-identical).
    /// Sets the state to `HashTableOpen` immediately (a commit point, written and `fsync`'d
    /// before returning).
    pub fn resume(path: &Path) -> Result<Self> {
        let (file, header) = Self::open_for(
            path,
            &[State::EntriesComplete, State::HashTableOpen, State::Complete],
        )?;
        let mut db = Self::load_tables(file, header)?;
        db.path = path.to_path_buf();
        db.header.state = State::HashTableOpen;
        db.header.write_to(&mut db.file)?;
        db.file.sync_data().map_err(|e| Error::io("fsync after resume", e))?;
        Ok(db)
    }

    pub fn state(&self) -> State {
        self.header.state
    }

    pub fn root_path(&self) -> &str {
        &self.header.root_path
    }

    pub fn hash_table_algo(&self) -> Option<HashAlgo> {
        self.hash_table.as_ref().map(|t| t.algo())
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Append a record to the entry table. Only valid while `Init`.
    pub fn append_entry(&mut self, entry: PathInfo) -> Result<usize> {
        if self.header.state != State::Init {
            return Err(Error::bad_state("append_entry", self.header.state.as_str()));
        }
        self.entries.stage(entry)
    }

    /// Flush the entry table (and allocate the hash/tree tables, if declared) and transition to
    /// `EntriesComplete`.
    pub fn finish_entries(&mut self) -> Result<()> {
        if self.header.state != State::Init {
            return Err(Error::bad_state("finish_entries", self.header.state.as_str()));
        }
        self.entries.flush(&mut self.file)?;
        let mut offset = header::HEADER_LEN + entries::SUBHEADER_LEN + self.entries.byte_len();

        if self.header.has_feature(feature::HASH_TABLE) {
            let algo = self.pending_hash_algo.unwrap_or(HashAlgo::Sha256);
            let table = HashTable::allocate(&mut self.file, offset, algo, self.entries.len())?;
            offset += hashtable::SUBHEADER_LEN + (table.count() * table.digest_len()) as u64;
            self.hash_table = Some(table);
        }
        if self.header.has_feature(feature::TREE) {
            self.tree = Some(Tree::write_new(&mut self.file, offset)?);
        }

        self.header.state = State::EntriesComplete;
        self.header.write_to(&mut self.file)?;
        self.file
            .sync_data()
            .map_err(|e| Error::io("fsync after finish_entries", e))?;
        Ok(())
    }

    /// Iterate all entries in storage (= scan) order.
    pub fn read_all_entries(&self, mut cb: impl FnMut(usize, &PathInfo) -> Result<()>) -> Result<()> {
        for (index, entry) in self.entries.iter() {
            cb(index, entry)?;
        }
        Ok(())
    }

    /// Iterate all entries together with their digest, for databases carrying a hash table.
    /// Entries whose slot is unset are skipped.
    pub fn read_all_entries_with_hashes(
        &self,
        mut cb: impl FnMut(&PathInfo, &[u8]) -> Result<()>,
    ) -> Result<()> {
        let Some(table) = &self.hash_table else {
            return Ok(());
        };
        for (index, entry) in self.entries.iter() {
            if !table.is_unset(index) {
                cb(entry, table.slot(index))?;
            }
        }
        Ok(())
    }

    pub fn find_entry_index_and_offset(&self, id: u64) -> Result<(usize, u64)> {
        self.entries.find(id).ok_or(Error::NotFound { id })
    }

    pub fn entry_at(&self, index: usize) -> Option<&PathInfo> {
        self.entries.get(index)
    }

    /// Write a digest into hash slot `index`. A no-op if the database is not currently accepting
    /// hash writes (not `HashTableOpen`/`EntriesComplete`).
    pub fn write_hash_entry(&mut self, index: usize, digest: &[u8]) -> Result<()> {
        if !matches!(self.header.state, State::HashTableOpen | State::EntriesComplete) {
            return Ok(());
        }
        let Some(table) = self.hash_table.as_mut() else {
            return Err(Error::bad_state("write_hash_entry", self.header.state.as_str()));
        };
        table.write_slot(&mut self.file, index, digest)
    }

    pub fn read_hash_table_entries(&self, mut cb: impl FnMut(usize, &[u8]) -> Result<()>) -> Result<()> {
        let Some(table) = &self.hash_table else {
            return Ok(());
        };
        for (index, digest) in table.iter() {
            cb(index, digest)?;
        }
        Ok(())
    }

    /// Iterate every file-kind entry whose hash slot is still unset.
    pub fn entries_need_hashing(&self, mut cb: impl FnMut(usize, &PathInfo) -> Result<()>) -> Result<()> {
        let Some(table) = &self.hash_table else {
            return Ok(());
        };
        for (index, entry) in self.entries.iter() {
            if entry.kind == Kind::File && table.is_unset(index) {
                cb(index, entry)?;
            }
        }
        Ok(())
    }

    fn hashing_incomplete(&self) -> bool {
        if !self.header.has_feature(feature::HASH_TABLE) {
            return false;
        }
        match &self.hash_table {
            // The feature is declared but no table could be recovered: nothing has been hashed.
            None => true,
            Some(table) => self
                .entries
                .iter()
                .any(|(i, e)| e.kind == Kind::File && table.is_unset(i)),
        }
    }

    /// Close the handle: transition to `Complete` if every file has a digest (or hashing is
    /// disabled), otherwise to `HashTableOpen`. Rewrites and `fsync`s the header.
    pub fn close(mut self) -> Result<()> {
        self.header.state = if self.hashing_incomplete() {
            State::HashTableOpen
        } else {
            State::Complete
        };
        self.header.write_to(&mut self.file)?;
        self.file.sync_data().map_err(|e| Error::io("fsync on close", e))?;
        Ok(())
    }

    /// Mark the database `Interrupted` after an unexpected error. Consumes `self` because the
    /// handle should not be used afterwards.
    pub fn interrupted(mut self) -> Result<()> {
        self.header.state = State::Interrupted;
        self.header.write_to(&mut self.file)?;
        self.file
            .sync_data()
            .map_err(|e| Error::io("fsync on interrupted", e))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the header and every table's sub-header to `bak_path`, for `FixDatabase`.
    pub fn backup_header(&self, bak_path: &Path) -> Result<()> {
        let buf = self.header.encode()?;
        std::fs::write(bak_path, buf).map_err(|e| Error::io("writing header backup", e))
    }

    /// Open a database for repair: accepts any recorded state, including `Interrupted`, and loads
    /// its tables tolerantly (see `load_tables_tolerant`) so a database crashed mid-`finish_entries`
    /// or carrying a hash table whose `count` disagrees with the entry table can still be recovered.
    /// Used only by `orchestrate::fix`, which is responsible for writing the repaired lengths back
    /// (`rewrite_tables_for_fix`) and re-deriving a consistent state afterwards.
    pub fn open_for_fix(path: &Path) -> Result<Self> {
        let (file, header) = Self::open_for(
            path,
            &[
                State::Init,
                State::EntriesComplete,
                State::HashTableOpen,
                State::Complete,
                State::Interrupted,
            ],
        )?;
        let mut db = Self::load_tables_tolerant(file, header)?;
        db.path = path.to_path_buf();
        Ok(db)
    }

    /// Rewrite the on-disk entry/hash sub-headers to match the tolerantly-recovered in-memory
    /// tables, truncating away any trailing garbage left by a mid-write crash. Only `fix` calls
    /// this, after `open_for_fix`. Leaves a tree table's region untouched (not tolerantly parsed),
    /// skipping truncation entirely when the feature is present.
    pub fn rewrite_tables_for_fix(&mut self) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};

        self.file
            .seek(SeekFrom::Start(header::HEADER_LEN))
            .map_err(|e| Error::io("seeking to entry table for repair", e))?;
        let mut entry_sub_header = Vec::with_capacity(entries::SUBHEADER_LEN as usize);
        entry_sub_header.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
        entry_sub_header.extend_from_slice(&self.entries.byte_len().to_le_bytes());
        self.file
            .write_all(&entry_sub_header)
            .map_err(|e| Error::io("rewriting entry table sub-header", e))?;

        let mut offset = header::HEADER_LEN + entries::SUBHEADER_LEN + self.entries.byte_len();

        // A hash table feature declared but not recovered means `finish_entries` crashed before
        // ever allocating it; complete that step now instead of leaving a dangling feature flag.
        if self.header.has_feature(feature::HASH_TABLE) && self.hash_table.is_none() {
            let algo = self.pending_hash_algo.unwrap_or(HashAlgo::Sha256);
            let table = HashTable::allocate(&mut self.file, offset, algo, self.entries.len())?;
            self.hash_table = Some(table);
        }

        if let Some(table) = &self.hash_table {
            self.file
                .seek(SeekFrom::Start(offset))
                .map_err(|e| Error::io("seeking to hash table for repair", e))?;
            let mut hash_sub_header = Vec::with_capacity(hashtable::SUBHEADER_LEN as usize);
            hash_sub_header.push(table.algo().tag());
            hash_sub_header.push(table.digest_len() as u8);
            hash_sub_header.extend_from_slice(&(table.count() as u64).to_le_bytes());
            self.file
                .write_all(&hash_sub_header)
                .map_err(|e| Error::io("rewriting hash table sub-header", e))?;
            offset += hashtable::SUBHEADER_LEN + (table.count() * table.digest_len()) as u64;
        }

        if !self.header.has_feature(feature::TREE) {
            self.file
                .set_len(offset)
                .map_err(|e| Error::io("truncating database to repaired length", e))?;
        }
        self.file
            .sync_data()
            .map_err(|e| Error::io("fsync after repairing tables", e))?;
        Ok(())
    }

    /// Recompute the state this database should carry given its current table contents, without
    /// requiring a state transition (used by `fix`, which rewrites the header directly).
    pub fn recommended_state(&self) -> State {
        if self.hashing_incomplete() {
            State::HashTableOpen
        } else {
            State::Complete
        }
    }

    /// Overwrite the header's state byte in place and `fsync`. Bypasses the normal lifecycle
    /// transitions; only `fix` should call this.
    pub fn force_state(&mut self, state: State) -> Result<()> {
        self.header.state = state;
        self.header.write_to(&mut self.file)?;
        self.file.sync_data().map_err(|e| Error::io("fsync after force_state", e))
    }

    /// Release the lock and drop the handle without rewriting anything.
    pub fn abandon(self) {}
}
