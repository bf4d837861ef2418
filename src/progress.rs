//! Progress callback types shared by the scanner and hasher.
//!
//! Neither component depends on a rendering crate; a caller (the CLI) supplies a closure and
//! drives whatever display it likes (an `indicatif::ProgressBar`, a log line, nothing at all).

use std::path::Path;

/// Called once per entry the scanner appends, with its relative path.
pub type ScanProgressFn = dyn Fn(&str) + Send + Sync;

/// Called once per file entry the hasher finishes processing (success or failure), with its
/// relative path.
pub type HashProgressFn = dyn Fn(&Path) + Send + Sync;
