//! Stratum Testing Framework
//!
//! Provides an in-memory mock backend for exercising the validator,
//! graph builder and plan runner end to end without spawning real
//! backend subprocesses.

pub mod backend;

pub use backend::{MockBackend, MockSession};
