// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! The time-driven dispatcher (§4.4).
//!
//! Once every `tick_seconds`, scans each device's head job: drops it
//! if its start was missed by more than the configured grace period,
//! promotes it into capture once its start time has arrived and the
//! device is idle, or leaves it alone otherwise. The power controller
//! piggybacks on the same tick.

use std::sync::Arc;
use std::time::Duration;

use pvr_core::policy::{AdaptivePolling, PollingPolicy};
use pvr_core::scheduler::{DeleteScope, Scheduler};
use pvr_device::DeviceRegistry;
use tracing::{info, warn};

use crate::capture::run_capture;
use crate::config::PvrdConfig;
use crate::power::maybe_shutdown;
use crate::transcode::TranscodePool;

pub async fn run_dispatcher(
    scheduler: Scheduler,
    devices: Arc<DeviceRegistry>,
    config: Arc<PvrdConfig>,
    transcode_pool: TranscodePool,
) {
    let tick_seconds = config.scheduler.tick_seconds;
    let grace = chrono::Duration::minutes(config.scheduler.missed_start_grace_minutes);
    // §4.4: a job is due once `now - ts_start >= -(T_tick - 1)`, i.e.
    // up to `T_tick - 1` seconds before its nominal start, so a job
    // whose start lands between two ticks is still captured from its
    // actual start time rather than up to a full tick late. `T_tick`
    // is the polling policy's idle interval below, which bounds the
    // worst-case gap between scans.
    let early_start = chrono::Duration::seconds(tick_seconds as i64 - 1);

    // The scan interval tightens as the nearest pending job's start
    // approaches instead of polling at a fixed cadence the whole time,
    // but never exceeds `tick_seconds` so the promotion window above
    // stays valid.
    let idle_interval = Duration::from_secs(tick_seconds);
    let polling = AdaptivePolling {
        idle_interval,
        near_interval: Duration::from_secs(1).min(idle_interval),
        near_threshold: idle_interval,
    };
    let mut current_interval = polling.idle_interval;
    let mut sleep = Box::pin(tokio::time::sleep(current_interval));

    loop {
        (&mut sleep).await;
        let now = pvr_core::time::now();

        for device in 0..scheduler.num_devices() {
            let Some(job) = scheduler.head(device).await else {
                continue;
            };

            if now - job.ts_start > grace {
                warn!(
                    device,
                    seq = job.seq_nbr,
                    title = %job.title,
                    "Dropping job whose start time was missed past the grace window"
                );
                if let Err(e) = scheduler.delete(job.seq_nbr, DeleteScope::ThisOnly).await {
                    warn!(seq = job.seq_nbr, "Failed to drop missed job: {}", e);
                }
                continue;
            }

            if now < job.ts_start - early_start {
                continue;
            }

            // Due now (or within the early-start window). If the device is still busy with a previous
            // capture (its terminating read ran past its own nominal
            // end time), defer rather than drop — the next tick will
            // try again.
            if scheduler.in_flight(device).await.is_some() {
                warn!(
                    device,
                    seq = job.seq_nbr,
                    "Device still busy with a previous capture; deferring promotion"
                );
                continue;
            }

            let Some(job) = scheduler.begin_capture(device).await else {
                continue;
            };
            info!(device, seq = job.seq_nbr, title = %job.title, "Promoting job to capture");

            tokio::spawn(run_capture(
                scheduler.clone(),
                devices.clone(),
                config.clone(),
                transcode_pool.clone(),
                device,
                job,
            ));
        }

        maybe_shutdown(&scheduler, &transcode_pool, &config).await;

        let time_to_next = scheduler
            .next_scheduled()
            .await
            .and_then(|job| (job.ts_start - pvr_core::time::now()).to_std().ok());
        let next_interval = polling.next_interval(time_to_next);
        if next_interval != current_interval {
            current_interval = next_interval;
        }
        sleep = Box::pin(tokio::time::sleep(current_interval));
    }
}
