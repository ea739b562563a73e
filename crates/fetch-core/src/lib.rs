//! fetch core - shared types, configuration, and errors
//!
//! This crate contains the foundational types used by the cache daemon.
//! It has no dependencies on the cache store, origins, or HTTP code.

pub mod config;
pub mod error;
pub mod name;
pub mod types;

pub use config::{CacheConfig, Config, ConfigError, OriginConfig, ServerConfig};
pub use error::*;
pub use name::validate_name;
pub use types::*;

/// Maximum cache key length in bytes
pub const MAX_NAME_LEN: usize = 255;

/// Default bounded request queue depth per store
pub const DEFAULT_QUEUE_DEPTH: usize = 64;
