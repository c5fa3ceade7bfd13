//! Spacedrop Common Library
//!
//! Shared error type and path helpers for the Spacedrop crates.

pub mod error;
pub mod paths;

// Re-export commonly used types
pub use error::{Error, Result};
pub use paths::{default_config_dir, default_config_path, expand_home};

/// Spacedrop version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
