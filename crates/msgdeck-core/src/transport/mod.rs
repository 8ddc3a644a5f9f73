//! Transport provider abstraction.
//!
//! Each messaging platform is reached through a `TransportProvider` that
//! opens one connection per account and reports what happens on it as a
//! stream of `TransportEvent`s. The session controller is the only consumer.

pub mod box_transport;
pub mod provider;
pub mod registry;

pub use box_transport::{BoxTransportProvider, BoxTransportSession};
pub use provider::{SignInOutcome, TransportConnection, TransportEvent, TransportProvider, TransportSession};
pub use registry::ProviderRegistry;
