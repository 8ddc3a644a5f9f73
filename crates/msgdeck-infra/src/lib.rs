//! Infrastructure layer for msgdeck.
//!
//! Contains implementations of the ports defined in `msgdeck-core`: the
//! SQLite account directory, the on-disk credential store, and the
//! subprocess transport bridge. Also owns config loading and data
//! directory layout.

pub mod config;
pub mod credentials;
pub mod filesystem;
pub mod sqlite;
pub mod transport;
