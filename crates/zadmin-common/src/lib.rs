//! zadmin Common - Shared types and utilities
//!
//! This crate provides the name types, error definitions and configuration
//! file model used by every zadmin component.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
