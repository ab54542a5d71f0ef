//! Ozone Common - Shared types and utilities
//!
//! This crate provides common types, error definitions, configuration and
//! utilities used across all Ozone components.

pub mod checksum;
pub mod config;
pub mod error;
pub mod types;

pub use config::OzoneConfig;
pub use error::{Error, Result};
pub use types::*;
