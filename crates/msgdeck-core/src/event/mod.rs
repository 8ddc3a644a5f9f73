//! Event broadcaster for session lifecycle changes.
//!
//! Provides an `EventBus` that relays `LifecycleEvent` messages to every
//! subscriber via a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EventBus;
