//! TOML state file loading and atomic saving.
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::error::StateError;
use crate::resources::helpers::fs::write_atomic;

/// Load a TOML file, returning `T::default()` when it does not exist.
///
/// # Errors
///
/// Returns [`StateError::Io`] if the file exists but cannot be read, or
/// [`StateError::Parse`] if it is not valid for `T`.
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StateError> {
    if !path.exists() {
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path).map_err(|source| StateError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&content).map_err(|source| StateError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize `value` as TOML and write it to `path` atomically.
///
/// # Errors
///
/// Returns [`StateError::Serialize`] if `value` cannot be represented as
/// TOML, or [`StateError::Io`] if the write fails.
pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    let content = toml::to_string_pretty(value).map_err(|source| StateError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, content.as_bytes()).map_err(|source| StateError::Io {
        path: path.to_path_buf(),
        source,
    })
}
