// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! `pvrd.toml` configuration.

use std::net::IpAddr;
use std::path::PathBuf;

use pvr_app::ConfigFile;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    /// Number of capture devices in the pool (device indices `0..num_devices`).
    pub num_devices: usize,
    pub data_dir: PathBuf,
    pub profile_dir: PathBuf,
    pub default_profile: Option<String>,
    /// Backend name to instantiate for every device (e.g. `"dummy"`).
    pub device_backend: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            num_devices: 1,
            data_dir: PathBuf::from("/var/lib/pvrd"),
            profile_dir: PathBuf::from("/etc/pvrd/profiles"),
            default_profile: Some("default".into()),
            device_backend: "dummy".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Dispatcher tick period in seconds (`T_tick`, 1..=10).
    pub tick_seconds: u64,
    /// How long past a missed start before the dispatcher drops the head job.
    pub missed_start_grace_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 3,
            missed_start_grace_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub max_threads: usize,
    pub max_load_for_transcoding: f64,
    pub backoff_initial_secs: u64,
    pub max_waiting_time_to_transcode_secs: u64,
    /// Wall-clock ceiling on a single transcode before its process
    /// group is killed.
    pub watchdog_hours: u64,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            max_threads: 10,
            max_load_for_transcoding: 2.0,
            backoff_initial_secs: 300,
            max_waiting_time_to_transcode_secs: 3600,
            watchdog_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub auto_shutdown: bool,
    pub require_no_user_logged_in: bool,
    pub shutdown_max_5load: f64,
    pub shutdown_min_time_minutes: i64,
    pub wakeup_margin_minutes: i64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            auto_shutdown: false,
            require_no_user_logged_in: false,
            shutdown_max_5load: 0.5,
            shutdown_min_time_minutes: 30,
            wakeup_margin_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    pub channel_switch: Option<PathBuf>,
    pub post_recording: Option<PathBuf>,
    pub shutdown: Option<PathBuf>,
    pub startup: Option<PathBuf>,
    /// If true, channel selection is done by invoking `channel_switch`
    /// rather than by calling the device control surface directly.
    pub external_channel_switch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub enabled: bool,
    pub address: IpAddr,
    pub port: u16,
    pub auth_tokens: Vec<String>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: IpAddr::from([127, 0, 0, 1]),
            port: 9301,
            auth_tokens: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PvrdConfig {
    pub general: GeneralConfig,
    pub scheduler: SchedulerConfig,
    pub transcode: TranscodeConfig,
    pub power: PowerConfig,
    pub scripts: ScriptsConfig,
    pub listen: ListenConfig,
}

impl ConfigFile for PvrdConfig {
    fn config_filename() -> &'static str {
        "pvrd.toml"
    }
}

impl PvrdConfig {
    /// Example configuration printed by `--print-config`, valid
    /// `pvrd.toml` on its own.
    pub fn example_toml() -> String {
        toml::to_string_pretty(&PvrdConfig::default())
            .unwrap_or_else(|_| "# failed to render example config".into())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.general.num_devices == 0 {
            return Err("general.num_devices must be at least 1".into());
        }
        if !(1..=10).contains(&self.scheduler.tick_seconds) {
            return Err("scheduler.tick_seconds must be between 1 and 10".into());
        }
        if self.transcode.max_threads == 0 {
            return Err("transcode.max_threads must be at least 1".into());
        }
        Ok(())
    }

    pub fn journal_path(&self) -> PathBuf {
        self.general.data_dir.join("pvrd.journal.xml")
    }

    pub fn history_path(&self) -> PathBuf {
        self.general.data_dir.join("pvrd.history.xml")
    }
}
