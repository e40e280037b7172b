//! wavpull daemon library
//!
//! Exposes the daemon's modules for the binary and for integration tests.

pub mod args;
pub mod constants;
pub mod cycle;
pub mod logging;
pub mod pipeline;
pub mod scheduler;
pub mod session;
