//! Shared domain types for msgdeck.
//!
//! This crate contains the domain types used across the platform: accounts,
//! session phases, lifecycle events, inbound/outbound messages, configuration,
//! and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod account;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod session;
