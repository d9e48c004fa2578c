//! Common test utilities for the built-in components
//!
//! Provides an isolated instance with every collaborator a zone manager
//! needs, plus an in-memory zone store that can be told to fail.

#![allow(dead_code)]

mod memory_store;
mod test_hass;

pub use memory_store::*;
pub use test_hass::*;
