//! HTTP/REST API layer for msgdeck.
//!
//! Axum-based REST API at `/api/v1/` with API key authentication,
//! envelope response format, a lifecycle event WebSocket, and CORS support.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
