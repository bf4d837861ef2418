//! `PathInfo`: the durable record of one filesystem path, and its binary codec.
//!
//! Encoding (little-endian, no padding):
//! ```text
//! u8  kind
//! u64 size
//! i64 mtime_secs
//! i32 mtime_nsecs
//! u32 mode
//! u16 path_len
//! [u8; path_len] relative path (UTF-8, no trailing NUL)
//! ```

use crate::error::{Error, Result};
use crate::id::compute_id;

/// The three kinds of filesystem entry the database can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    File,
    Dir,
    Symlink,
}

impl Kind {
    pub fn tag(self) -> u8 {
        match self {
            Kind::File => 0,
            Kind::Dir => 1,
            Kind::Symlink => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Kind::File),
            1 => Ok(Kind::Dir),
            2 => Ok(Kind::Symlink),
            other => Err(Error::corrupted(format!("unknown path kind tag {other}"))),
        }
    }
}

/// A timestamp split into seconds and nanoseconds, matching `PathInfo`'s on-disk layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mtime {
    pub secs: i64,
    pub nsecs: i32,
}

/// One recorded filesystem path: its stable [`Id`](crate::id), kind, size, mtime, mode and
/// relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub id: u64,
    pub kind: Kind,
    pub size: u64,
    pub mtime: Mtime,
    pub mode: u32,
    pub path: String,
}

impl PathInfo {
    /// Build a `PathInfo`, deriving its id from `kind` and `path`.
    pub fn new(kind: Kind, size: u64, mtime: Mtime, mode: u32, path: String) -> Self {
        let id = compute_id(kind, &path);
        Self {
            id,
            kind,
            size,
            mtime,
            mode,
            path,
        }
    }

    /// The root entry, always stored first with path `.`.
    pub fn root(mode: u32, mtime: Mtime) -> Self {
        Self::new(Kind::Dir, 0, mtime, mode, ".".to_string())
    }

    /// Append this record's bytes to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let path_bytes = self.path.as_bytes();
        buf.push(self.kind.tag());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.extend_from_slice(&self.mtime.secs.to_le_bytes());
        buf.extend_from_slice(&self.mtime.nsecs.to_le_bytes());
        buf.extend_from_slice(&self.mode.to_le_bytes());
        buf.extend_from_slice(&(path_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(path_bytes);
    }

    /// The number of bytes `encode` would write.
    pub fn encoded_len(&self) -> usize {
        1 + 8 + 8 + 4 + 4 + 2 + self.path.len()
    }

    /// Decode one record from the front of `buf`, returning it and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        const FIXED_LEN: usize = 1 + 8 + 8 + 4 + 4 + 2;
        if buf.len() < FIXED_LEN {
            return Err(Error::corrupted("truncated path record header"));
        }
        let mut p = 0usize;
        let kind = Kind::from_tag(buf[p])?;
        p += 1;
        let size = u64::from_le_bytes(buf[p..p + 8].try_into().unwrap());
        p += 8;
        let mtime_secs = i64::from_le_bytes(buf[p..p + 8].try_into().unwrap());
        p += 8;
        let mtime_nsecs = i32::from_le_bytes(buf[p..p + 4].try_into().unwrap());
        p += 4;
        let mode = u32::from_le_bytes(buf[p..p + 4].try_into().unwrap());
        p += 4;
        let path_len = u16::from_le_bytes(buf[p..p + 2].try_into().unwrap()) as usize;
        p += 2;

        if buf.len() < p + path_len {
            return Err(Error::corrupted("truncated path record body"));
        }
        let path = std::str::from_utf8(&buf[p..p + path_len])
            .map_err(|_| Error::corrupted("path record is not valid UTF-8"))?
            .to_string();
        p += path_len;

        let mtime = Mtime {
            secs: mtime_secs,
            nsecs: mtime_nsecs,
        };
        let id = compute_id(kind, &path);
        Ok((
            PathInfo {
                id,
                kind,
                size,
                mtime,
                mode,
                path,
            },
            p,
        ))
    }
}
