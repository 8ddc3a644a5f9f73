//! Session lifecycle and repository/transport trait definitions for msgdeck.
//!
//! This crate defines the "ports" (repository, credential, and transport
//! traits) that the infrastructure layer implements, plus the session
//! controller that reconciles transport events into account state. It
//! depends only on `msgdeck-types`, never on `msgdeck-infra` or any
//! database/IO crate.

pub mod event;
pub mod repository;
pub mod service;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
