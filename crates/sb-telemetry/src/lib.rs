//! Logging setup for processes embedding the sparc-board crates.
//!
//! The library crates only emit `tracing` events; installing a subscriber is
//! left to the binary, which calls one of the functions in [`logging`] once at
//! startup.

pub mod logging;
