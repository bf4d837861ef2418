//! Top-level workflows (`scan`, `resume`, `update`, `fix`) that combine the scanner, hasher and
//! database to realize the user-visible commands. These are the only place compensating actions
//! (marking a database `Interrupted`, rolling back an `update`) happen.

pub mod fix;
pub mod resume;
pub mod scan;
pub mod update;
