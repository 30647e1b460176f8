//! Crash-safe task coordination over a shared remote list.
//!
//! This crate is intentionally transport-agnostic. The remote store (list
//! items with version tokens, versioned documents, binary content) lives
//! behind ports (traits) implemented in adapter crates; coordination
//! correctness reduces entirely to the store's conditional-write atomicity.

pub mod breaker;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod editor;
pub mod errors;
pub mod fetcher;
pub mod logging;
pub mod ports;
pub mod worker;

pub use errors::{Error, Result};
