//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (msgdeck-infra) implements. The core crate never depends on any specific
//! storage technology.

pub mod account;
pub mod credential;

/// Sort order for list queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Desc
    }
}
