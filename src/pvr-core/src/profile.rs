// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! Named transcoding profiles loaded from disk.
//!
//! Profiles are read-mostly: the capture worker and transcode workers
//! each borrow a profile for the duration of a single operation and
//! must tolerate the profile having been removed by a concurrent
//! [`ProfileRegistry::reload`] (falling back to the configured default).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Frame crop rectangle in pixels, applied before transcoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    #[serde(default)]
    pub top: u32,
    #[serde(default)]
    pub bottom: u32,
    #[serde(default)]
    pub left: u32,
    #[serde(default)]
    pub right: u32,
}

/// Encoder parameters applied to the hardware for the duration of a
/// capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderSettings {
    pub video_bitrate_avg_kbps: u32,
    pub video_bitrate_peak_kbps: u32,
    pub audio_sample_rate_hz: u32,
    pub audio_bitrate_kbps: u32,
    /// Encoder aspect ratio code: `"1x1"`, `"4x3"`, `"16x9"`, `"221x100"`.
    pub aspect: String,
    /// Named frame size understood by the device (e.g. `"full"`, `"half"`, `"cif"`).
    pub frame_size: String,
}

/// Post-capture transcode parameters for a single profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeSettings {
    pub use_transcoding: bool,
    pub video_codec: String,
    pub audio_codec: String,
    pub container_extension: String,
    pub bitrate_kbps: u32,
    pub passes: u8,
    #[serde(default)]
    pub crop: CropRect,
    #[serde(default)]
    pub extra_args: String,
    /// Keep the original captured file around after transcoding
    /// instead of deleting the working directory (§4.5 step 11).
    #[serde(default)]
    pub keep_source: bool,
}

/// A named set of encoder and transcode parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub name: String,
    pub encoder: EncoderSettings,
    pub transcode: TranscodeSettings,
}

/// Read-mostly map from profile name to [`ProfileRecord`].
///
/// Hot reload ([`ProfileRegistry::reload`]) replaces the in-memory map
/// atomically: readers holding an `Arc<ProfileRecord>` from before the
/// reload keep using the old record to completion, matching the
/// read-copy-update contract in the spec.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<String, Arc<ProfileRecord>>,
    default_name: Option<String>,
}

impl ProfileRegistry {
    pub fn new(default_name: Option<String>) -> Self {
        Self {
            profiles: HashMap::new(),
            default_name,
        }
    }

    /// Load every `*.toml` file in `dir`, one profile per file, using
    /// the file stem as the profile name unless the file sets its own
    /// `name` field.
    pub fn load_from_dir(dir: &Path, default_name: Option<String>) -> std::io::Result<Self> {
        let mut registry = Self::new(default_name);
        if !dir.is_dir() {
            warn!("Profile directory {:?} does not exist; starting empty", dir);
            return Ok(registry);
        }

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            match load_one(&path) {
                Ok(profile) => {
                    info!("Loaded transcoding profile '{}' from {:?}", profile.name, path);
                    registry.profiles.insert(profile.name.clone(), Arc::new(profile));
                }
                Err(e) => warn!("Skipping malformed profile {:?}: {}", path, e),
            }
        }
        Ok(registry)
    }

    /// Replace the in-memory map from a freshly loaded directory scan.
    pub fn reload(&mut self, dir: &Path) -> std::io::Result<()> {
        let fresh = Self::load_from_dir(dir, self.default_name.clone())?;
        self.profiles = fresh.profiles;
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// Exact lookup, no fallback.
    pub fn get(&self, name: &str) -> Option<Arc<ProfileRecord>> {
        self.profiles.get(name).cloned()
    }

    /// Lookup with the configured fallback chain: unknown name → the
    /// configured default → the first registered profile (by name,
    /// for determinism) → `None` if the registry is empty.
    pub fn resolve(&self, name: &str) -> Option<Arc<ProfileRecord>> {
        if let Some(p) = self.profiles.get(name) {
            return Some(p.clone());
        }
        if let Some(default_name) = &self.default_name {
            if let Some(p) = self.profiles.get(default_name) {
                return Some(p.clone());
            }
        }
        let mut names: Vec<&String> = self.profiles.keys().collect();
        names.sort();
        names.first().and_then(|n| self.profiles.get(*n)).cloned()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn load_one(path: &PathBuf) -> Result<ProfileRecord, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let mut profile: ProfileRecord = toml::from_str(&content).map_err(|e| e.to_string())?;
    if profile.name.is_empty() {
        profile.name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unnamed")
            .to_string();
    }
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> ProfileRecord {
        ProfileRecord {
            name: name.to_string(),
            encoder: EncoderSettings {
                video_bitrate_avg_kbps: 4000,
                video_bitrate_peak_kbps: 6000,
                audio_sample_rate_hz: 48_000,
                audio_bitrate_kbps: 192,
                aspect: "16x9".into(),
                frame_size: "full".into(),
            },
            transcode: TranscodeSettings {
                use_transcoding: true,
                video_codec: "h264".into(),
                audio_codec: "aac".into(),
                container_extension: "mp4".into(),
                bitrate_kbps: 2000,
                passes: 1,
                crop: CropRect::default(),
                extra_args: String::new(),
                keep_source: false,
            },
        }
    }

    #[test]
    fn resolve_falls_back_to_default_then_first() {
        let mut reg = ProfileRegistry::new(Some("default".into()));
        reg.profiles.insert("other".into(), Arc::new(sample("other")));
        assert_eq!(reg.resolve("missing").unwrap().name, "other");

        reg.profiles.insert("default".into(), Arc::new(sample("default")));
        assert_eq!(reg.resolve("missing").unwrap().name, "default");

        assert_eq!(reg.resolve("other").unwrap().name, "other");
    }

    #[test]
    fn resolve_on_empty_registry_is_none() {
        let reg = ProfileRegistry::new(None);
        assert!(reg.resolve("anything").is_none());
    }
}
