// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! Shared configuration-file loading.
//!
//! `pvrd` is a single daemon with a single config file, so this is a
//! trimmed version of the teacher's `ConfigFile` trait: it keeps the
//! search-path convention (current directory → XDG config dir →
//! `/etc`) but drops the combined-multi-binary-config-file support
//! the teacher needed for its family of related binaries.

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),
}

/// Trait for loading configuration files with default search paths.
pub trait ConfigFile: Sized + Default + DeserializeOwned {
    /// Config filename, e.g. `"pvrd.toml"`.
    fn config_filename() -> &'static str;

    /// Load config from a specific file path.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    /// Search default paths and load the first one found.
    ///
    /// Returns `(config, path_where_found)`, or `(Default::default(),
    /// None)` if nothing was found at any of the default paths.
    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in Self::default_search_paths() {
            if path.exists() {
                let cfg = Self::load_from_file(&path)?;
                return Ok((cfg, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    /// Default search paths, current directory first, then the XDG
    /// config directory, then `/etc/pvrd`.
    fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(Self::config_filename())];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("pvrd").join(Self::config_filename()));
        }
        paths.push(PathBuf::from("/etc/pvrd").join(Self::config_filename()));
        paths
    }
}
