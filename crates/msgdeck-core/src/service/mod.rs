//! Business logic services (use cases).
//!
//! Services orchestrate repository calls and session operations. They depend
//! on traits (ports), never on concrete infrastructure implementations.

pub mod account;
