//! Common types and utilities shared by the container engine.
//!
//! This module provides the crate-wide error type and the little-endian
//! binary helpers used when decoding sector tables and directory records.

// Submodule declarations
pub mod binary;
pub mod error;

// Re-exports for convenience
pub use error::{Error, Result};
