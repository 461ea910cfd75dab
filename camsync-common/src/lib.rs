//! # camsync Common Library
//!
//! Shared code for the camsync services including:
//! - Error types
//! - Bootstrap configuration loading and resolution
//! - Atomic (temp file + rename) persistence helpers
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod fs;
pub mod time;

pub use error::{Error, Result};
