//! The `Tree` table: a reserved, opaque section for a future feature.
//!
//! Only its sub-header shape is specified (`byte_len:u64` followed by that many opaque bytes);
//! nothing currently interprets the body. Databases created without the `Tree` feature never write
//! this section at all.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::Error;
use crate::error::Result;

/// `byte_len:u64`.
pub const SUBHEADER_LEN: u64 = 8;

#[derive(Debug, Default, Clone)]
pub struct Tree {
    body: Vec<u8>,
}

impl Tree {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn byte_len(&self) -> u64 {
        self.body.len() as u64
    }

    pub fn write_new(file: &mut std::fs::File, offset: u64) -> Result<Self> {
        let tree = Tree::empty();
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io("seeking to tree table", e))?;
        file.write_all(&tree.byte_len().to_le_bytes())
            .map_err(|e| Error::io("writing tree sub-header", e))?;
        Ok(tree)
    }

    pub fn read(file: &mut std::fs::File, offset: u64) -> Result<Self> {
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io("seeking to tree table", e))?;
        let mut sub_header = [0u8; SUBHEADER_LEN as usize];
        file.read_exact(&mut sub_header)
            .map_err(|e| Error::io("reading tree sub-header", e))?;
        let byte_len = u64::from_le_bytes(sub_header) as usize;
        let mut body = vec![0u8; byte_len];
        file.read_exact(&mut body)
            .map_err(|e| Error::io("reading tree body", e))?;
        Ok(Tree { body })
    }
}
