//! The database header: magic, version, feature flags, state, root path and creation time.
//!
//! The header occupies a fixed 512-byte region at the start of the file so it can be rewritten in
//! place (to flip the state byte, for instance) without ever shifting the tables that follow it.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{Error, Result};

/// ASCII "AJFS" followed by four zero bytes.
pub const MAGIC: [u8; 8] = *b"AJFS\0\0\0\0";
/// Current on-disk format version.
pub const VERSION: u16 = 1;
/// Fixed size of the header region; tables begin at this offset.
pub const HEADER_LEN: u64 = 512;

/// Bit flags recorded in the header identifying which optional feature tables follow the entry
/// table.
pub mod feature {
    pub const HASH_TABLE: u16 = 0b01;
    pub const TREE: u16 = 0b10;
}

/// Lifecycle state of a database file, persisted as the header's `state` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init = 0,
    EntriesComplete = 1,
    HashTableOpen = 2,
    Complete = 3,
    Interrupted = 4,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            State::Init => "Init",
            State::EntriesComplete => "EntriesComplete",
            State::HashTableOpen => "HashTableOpen",
            State::Complete => "Complete",
            State::Interrupted => "Interrupted",
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(State::Init),
            1 => Ok(State::EntriesComplete),
            2 => Ok(State::HashTableOpen),
            3 => Ok(State::Complete),
            4 => Ok(State::Interrupted),
            other => Err(Error::corrupted(format!("unknown database state byte {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Header {
    pub version: u16,
    pub features: u16,
    pub state: State,
    pub created_at: i64,
    pub root_path: String,
}

impl Header {
    pub fn new(features: u16, root_path: String, created_at: i64) -> Self {
        Self {
            version: VERSION,
            features,
            state: State::Init,
            created_at,
            root_path,
        }
    }

    pub fn has_feature(&self, flag: u16) -> bool {
        self.features & flag != 0
    }

    /// Serialize the header into a fixed `HEADER_LEN`-byte buffer, zero-padded.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_LEN as usize);
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.features.to_le_bytes());
        buf.push(self.state as u8);
        buf.extend_from_slice(&[0u8; 7]); // reserved
        buf.extend_from_slice(&self.created_at.to_le_bytes());
        let root_bytes = self.root_path.as_bytes();
        if root_bytes.len() > u16::MAX as usize {
            return Err(Error::corrupted("root path too long to encode"));
        }
        buf.extend_from_slice(&(root_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(root_bytes);
        if buf.len() as u64 > HEADER_LEN {
            return Err(Error::corrupted("header overflows reserved 512 bytes"));
        }
        buf.resize(HEADER_LEN as usize, 0);
        Ok(buf)
    }

    /// Parse a header from exactly `HEADER_LEN` bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN as usize {
            return Err(Error::corrupted("header shorter than 512 bytes"));
        }
        if buf[0..8] != MAGIC {
            return Err(Error::corrupted("bad magic"));
        }
        let version = u16::from_le_bytes(buf[8..10].try_into().unwrap());
        if version != VERSION {
            return Err(Error::corrupted(format!(
                "unsupported version {version}, expected {VERSION}"
            )));
        }
        let features = u16::from_le_bytes(buf[10..12].try_into().unwrap());
        let state = State::from_byte(buf[12])?;
        // buf[13..20] reserved
        let created_at = i64::from_le_bytes(buf[20..28].try_into().unwrap());
        let root_len = u16::from_le_bytes(buf[28..30].try_into().unwrap()) as usize;
        let root_end = 30 + root_len;
        if root_end > buf.len() {
            return Err(Error::corrupted("root path overruns header"));
        }
        let root_path = std::str::from_utf8(&buf[30..root_end])
            .map_err(|_| Error::corrupted("root path is not valid UTF-8"))?
            .to_string();
        Ok(Header {
            version,
            features,
            state,
            created_at,
            root_path,
        })
    }

    /// Read the header from the start of `file`, leaving the cursor at `HEADER_LEN`.
    pub fn read_from(file: &mut std::fs::File) -> Result<Self> {
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::io("seeking to header", e))?;
        let mut buf = vec![0u8; HEADER_LEN as usize];
        file.read_exact(&mut buf)
            .map_err(|e| Error::io("reading header", e))?;
        Self::decode(&buf)
    }

    /// Rewrite the header in place at the start of `file`, preserving the cursor position.
    pub fn write_to(&self, file: &mut std::fs::File) -> Result<()> {
        let cur = file
            .stream_position()
            .map_err(|e| Error::io("saving cursor before header write", e))?;
        let buf = self.encode()?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::io("seeking to header", e))?;
        file.write_all(&buf)
            .map_err(|e| Error::io("writing header", e))?;
        file.seek(SeekFrom::Start(cur))
            .map_err(|e| Error::io("restoring cursor after header write", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let h = Header::new(feature::HASH_TABLE, "/tmp/scan-root".to_string(), 1_700_000_000);
        let buf = h.encode().unwrap();
        assert_eq!(buf.len(), HEADER_LEN as usize);
        let decoded = Header::decode(&buf).unwrap();
        assert_eq!(decoded.version, VERSION);
        assert_eq!(decoded.features, feature::HASH_TABLE);
        assert_eq!(decoded.state, State::Init);
        assert_eq!(decoded.root_path, "/tmp/scan-root");
        assert_eq!(decoded.created_at, 1_700_000_000);
    }

    #[test]
    fn bad_magic_is_corrupted() {
        let mut buf = vec![0u8; HEADER_LEN as usize];
        buf[0] = b'X';
        assert!(Header::decode(&buf).is_err());
    }
}
