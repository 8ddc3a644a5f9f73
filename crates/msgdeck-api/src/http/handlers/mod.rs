//! HTTP request handlers for the REST API.

pub mod account;
pub mod auth;
pub mod health;
pub mod message;
pub mod session;
pub mod ws;
