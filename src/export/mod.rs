//! Interchange formats for a database's hashed entries.

pub mod hashdeep;
