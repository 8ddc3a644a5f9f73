//! Request extractors shared by the handlers.

pub mod auth;
pub mod path;
pub mod query;
