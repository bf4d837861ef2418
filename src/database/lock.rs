//! Advisory, process-exclusive locking for a database file.
//!
//! Exactly one live [`super::Database`] handle may hold a given file at a time. The lock is taken
//! immediately after opening the file descriptor and released implicitly when the `File` is
//! dropped, so it never outlives the handle, including on panic.

use std::path::Path;

use fs2::FileExt;

use crate::error::{Error, Result};

/// Attempt to take an exclusive advisory lock on `file`, returning [`Error::Locked`] if another
/// handle already holds it.
pub fn try_lock_exclusive(file: &std::fs::File, path: &Path) -> Result<()> {
    file.try_lock_exclusive().map_err(|_| Error::Locked {
        path: path.to_path_buf(),
    })
}
