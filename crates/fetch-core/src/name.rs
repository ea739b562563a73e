//! Cache key validation
//!
//! Cache keys map one-to-one onto file names in a flat cache directory, so a
//! key must be a single, harmless path component. Keys starting with `.` are
//! reserved for the store's own bookkeeping (the staging directory).

use crate::error::CacheError;
use crate::MAX_NAME_LEN;

/// Validate a cache key
pub fn validate_name(name: &str) -> Result<(), CacheError> {
    let reject = |reason| {
        Err(CacheError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return reject("empty name");
    }

    if name.len() > MAX_NAME_LEN {
        return reject("name too long");
    }

    if name.contains('\0') {
        return reject("name contains null byte");
    }

    if name.contains('/') || name.contains('\\') {
        return reject("name contains a path separator");
    }

    // Also covers "." and ".."
    if name.starts_with('.') {
        return reject("name starts with '.'");
    }

    Ok(())
}
