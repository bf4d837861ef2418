//! Stable 64-bit entry identifiers.
//!
//! An [`Id`] is derived deterministically from an entry's kind and its relative path so that two
//! scans of the same tree (even on different host platforms) assign the same id to the same path.

use std::hash::Hasher as _;
use twox_hash::XxHash64;

use crate::pathinfo::Kind;

/// Fixed seed so ids are reproducible across processes and platforms.
const SEED: u64 = 0xA15F_5FA5_AB10_ACED;

/// Normalize a relative path to use forward slashes, independent of host OS.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Derive the stable [`Id`] for an entry of the given `kind` at `relative_path`.
///
/// `relative_path` must already be relative to the scan root; the root entry's path is `.`.
pub fn compute_id(kind: Kind, relative_path: &str) -> u64 {
    let normalized = normalize_path(relative_path);
    let mut hasher = XxHash64::with_seed(SEED);
    hasher.write_u8(kind.tag());
    hasher.write(normalized.as_bytes());
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let a = compute_id(Kind::File, "a/b/c.txt");
        let b = compute_id(Kind::File, "a/b/c.txt");
        assert_eq!(a, b);
    }

    #[test]
    fn backslash_and_forward_slash_collide() {
        let a = compute_id(Kind::File, "a/b/c.txt");
        let b = compute_id(Kind::File, "a\\b\\c.txt");
        assert_eq!(a, b);
    }

    #[test]
    fn kind_changes_id() {
        let file = compute_id(Kind::File, "a");
        let dir = compute_id(Kind::Dir, "a");
        assert_ne!(file, dir);
    }

    #[test]
    fn path_changes_id() {
        let a = compute_id(Kind::File, "a");
        let b = compute_id(Kind::File, "b");
        assert_ne!(a, b);
    }
}
