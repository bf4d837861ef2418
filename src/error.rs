//! Error type for the database, scanner, hasher and orchestrators.
//!
//! Every fallible library operation returns `Result<T, Error>`. The CLI maps `Error::kind()` to a
//! process exit code (0/1/2) instead of downcasting or matching on the variant directly.

use std::path::PathBuf;

/// Coarse classification used by the CLI to pick an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Exit 1: the requested operation cannot be carried out given the current state.
    Operational,
    /// Exit 2: the on-disk database is structurally invalid.
    Corruption,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database already exists at {path}")]
    AlreadyExists { path: PathBuf },

    #[error("id {id:#x} not found")]
    NotFound { id: u64 },

    #[error("database corrupted: {reason}")]
    Corrupted { reason: String },

    #[error("operation {op} is not valid in state {state}")]
    BadState { op: &'static str, state: &'static str },

    #[error("database {path} is locked by another process")]
    Locked { path: PathBuf },

    #[error("i/o error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("user declined to continue")]
    UserAbort,
}

impl Error {
    pub fn kind(&self) -> Kind {
        match self {
            Error::Corrupted { .. } => Kind::Corruption,
            _ => Kind::Operational,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub fn corrupted(reason: impl Into<String>) -> Self {
        Error::Corrupted {
            reason: reason.into(),
        }
    }

    pub fn bad_state(op: &'static str, state: &'static str) -> Self {
        Error::BadState { op, state }
    }

    pub fn duplicate_id(id: u64) -> Self {
        Error::Corrupted {
            reason: format!("duplicate id {id:#x} in entry table"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
