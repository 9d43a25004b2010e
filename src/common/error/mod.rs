//! Unified error types for leofile.
//!
//! This module provides the crate-wide error type and the conversions from
//! the low-level binary helpers into it.

// Submodule declarations
pub mod conversions;
pub mod types;

// Re-exports
pub use types::{Error, Result};
