//! Transport providers backed by external bridge processes.

pub mod protocol;
pub mod subprocess;

pub use subprocess::SubprocessTransportProvider;
