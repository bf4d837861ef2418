//! Computes digests for entries whose hash slot is still empty.
//!
//! The per-file hashing step is a polymorphic capability (`(path, &mut dyn Read) -> Result<(Vec<u8>,
//! u64)>`), not a hardcoded call into `sha1`/`sha2`; tests substitute a faulty stand-in via
//! [`Hasher::with_hash_fn`] to exercise the failure-tolerance contract without touching real files.

use std::fs::File;
use std::io::{Read, Write as _};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::database::{Database, HashAlgo};
use crate::error::{Error, Result};
use crate::progress::HashProgressFn;

/// `(path, reader) -> (digest, bytes_read)`.
pub type HashFn = dyn Fn(&Path, &mut dyn Read) -> Result<(Vec<u8>, u64)> + Send + Sync;

#[derive(Debug, Default, Clone, Copy)]
pub struct HashOutcome {
    pub hashed: usize,
    pub failed: usize,
}

fn digest_with<D: digest::Digest>(reader: &mut dyn Read) -> Result<(Vec<u8>, u64)> {
    let mut hasher = D::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| Error::io("reading file to hash", e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hasher.finalize().to_vec(), total))
}

fn default_hash_fn(algo: HashAlgo) -> Box<HashFn> {
    Box::new(move |_path, reader| match algo {
        HashAlgo::Sha1 => digest_with::<sha1::Sha1>(reader),
        HashAlgo::Sha256 => digest_with::<sha2::Sha256>(reader),
        HashAlgo::Sha512 => digest_with::<sha2::Sha512>(reader),
    })
}

/// Hashes every file entry in a database whose hash slot is unset.
pub struct Hasher {
    hash_fn: Box<HashFn>,
    cancel: Option<Arc<AtomicBool>>,
    progress: Option<Box<HashProgressFn>>,
}

impl Hasher {
    pub fn new(algo: HashAlgo) -> Self {
        Self {
            hash_fn: default_hash_fn(algo),
            cancel: None,
            progress: None,
        }
    }

    /// Test hook: replace the per-file hashing step, e.g. to inject failures for specific paths.
    pub fn with_hash_fn(
        mut self,
        f: impl Fn(&Path, &mut dyn Read) -> Result<(Vec<u8>, u64)> + Send + Sync + 'static,
    ) -> Self {
        self.hash_fn = Box::new(f);
        self
    }

    /// Cooperative cancellation, observed between files (not mid-file).
    pub fn with_cancellation(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Report progress: called once per entry after it has been hashed (or failed), with its
    /// full path.
    pub fn with_progress(mut self, cb: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(cb));
        self
    }

    /// The number of entries a call to [`Hasher::run`] would currently process. Lets a caller size
    /// a progress bar before starting.
    pub fn pending_count(db: &Database) -> Result<usize> {
        let mut count = 0;
        db.entries_need_hashing(|_, _| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    /// Hash every entry `db.entries_need_hashing` yields, writing digests in place. Per-file
    /// failures are reported on `err_out` and leave the slot zero; the overall run still succeeds
    /// unless cancelled.
    pub fn run(&self, root: &Path, db: &mut Database, err_out: &mut dyn Write) -> Result<HashOutcome> {
        let mut pending = Vec::new();
        db.entries_need_hashing(|index, entry| {
            pending.push((index, entry.clone()));
            Ok(())
        })?;

        let mut outcome = HashOutcome::default();
        for (index, entry) in pending {
            if let Some(token) = &self.cancel {
                if token.load(Ordering::SeqCst) {
                    return Err(Error::Cancelled);
                }
            }

            let full_path = root.join(&entry.path);
            let result = File::open(&full_path)
                .map_err(|e| Error::io(format!("opening {}", entry.path), e))
                .and_then(|mut f| (self.hash_fn)(&full_path, &mut f));

            match result {
                Ok((digest, _bytes_hashed)) => {
                    db.write_hash_entry(index, &digest)?;
                    outcome.hashed += 1;
                }
                Err(err) => {
                    let _ = writeln!(err_out, "hash error: {}: {err}", entry.path);
                    outcome.failed += 1;
                }
            }

            if let Some(cb) = &self.progress {
                cb(&full_path);
            }
        }

        Ok(outcome)
    }
}
