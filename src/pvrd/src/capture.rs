// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! The per-device capture worker (§4.5).
//!
//! Spawned detached by the dispatcher once a job's start time
//! arrives. Owns the `Job` moved out of the scheduler's in-flight
//! slot, the device index, and reads `scheduler.should_abort(device)`
//! once per chunk so the daemon's 15-second shutdown grace period is
//! always honoured.

use std::path::PathBuf;
use std::process::Command as StdCommand;
use std::sync::Arc;
use std::time::Duration;

use pvr_core::device::DeviceError;
use pvr_core::job::Job;
use pvr_core::policy::{ExponentialBackoff, RetryPolicy};
use pvr_core::scheduler::Scheduler;
use pvr_device::{DeviceAccess, DeviceRegistry};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::config::{PvrdConfig, ScriptsConfig};
use crate::transcode::TranscodePool;

const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry policy for device-busy responses on channel selection and
/// encoder-parameter application (§4.5 steps 3-4: "retry on Busy, up
/// to 3 attempts, short back-off").
const BUSY_RETRY: ExponentialBackoff = ExponentialBackoff {
    initial: Duration::from_millis(300),
    max: Duration::from_millis(300),
    max_attempts: 3,
};

pub async fn run_capture(
    scheduler: Scheduler,
    devices: Arc<DeviceRegistry>,
    config: Arc<PvrdConfig>,
    transcode_pool: TranscodePool,
    device: usize,
    job: Job,
) {
    info!(device, seq = job.seq_nbr, title = %job.title, "Starting capture");

    // Step 1: the primary profile for encoder parameters is the
    // highest-bitrate transcode target among the job's profiles, not
    // necessarily position zero — a single capture may feed several
    // downstream transcodes and must be captured at the quality the
    // most demanding one needs.
    let mut profiles = Vec::new();
    for name in &job.transcoding_profiles {
        if let Some(p) = scheduler.resolve_profile(name).await {
            profiles.push(p);
        }
    }
    let Some(primary) = profiles
        .iter()
        .max_by_key(|p| p.transcode.bitrate_kbps)
        .cloned()
    else {
        error!(seq = job.seq_nbr, "No resolvable profile for job, aborting capture");
        scheduler.clear_in_flight(device).await;
        return;
    };

    let mut handle = match devices.build(&config.general.device_backend, DeviceAccess::Path(format!("/dev/video{device}"))) {
        Ok(h) => h,
        Err(e) => {
            error!(device, "Failed to build device handle: {}", e);
            scheduler.clear_in_flight(device).await;
            return;
        }
    };

    if let Err(e) = handle.open().await {
        error!(device, "Failed to open device: {}", e);
        scheduler.clear_in_flight(device).await;
        return;
    }

    // Step 3: channel selection, either via the external script or
    // directly through the device control surface, retried on Busy.
    let channel_result = if config.scripts.external_channel_switch {
        run_channel_script(&config.scripts, &job.channel)
    } else {
        with_busy_retry(|| handle.set_channel(&job.channel)).await
    };
    if let Err(e) = channel_result {
        error!(device, channel = %job.channel, "Channel selection failed: {}", e);
        let _ = handle.close().await;
        scheduler.clear_in_flight(device).await;
        return;
    }

    if let Err(e) = with_busy_retry(|| handle.apply_encoder_settings(&primary.encoder)).await {
        error!(device, "Failed to apply encoder settings: {}", e);
        let _ = handle.close().await;
        scheduler.clear_in_flight(device).await;
        return;
    }

    let work_dir = match prepare_working_dir(&config.general.data_dir, device, &job.filename).await {
        Ok(dir) => dir,
        Err(e) => {
            error!(device, "Failed to create working directory: {}", e);
            let _ = handle.close().await;
            scheduler.clear_in_flight(device).await;
            return;
        }
    };
    let working_file = work_dir.join(format!("{}.ts", job.filename));

    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&working_file)
        .await
    {
        Ok(f) => f,
        Err(e) => {
            error!(device, ?working_file, "Failed to create working file: {}", e);
            let _ = handle.close().await;
            scheduler.clear_in_flight(device).await;
            return;
        }
    };

    let mut aborted = false;
    loop {
        if scheduler.should_abort(device) {
            warn!(device, "Abort flag observed, stopping capture");
            aborted = true;
            break;
        }
        if pvr_core::time::now() >= job.ts_end {
            break;
        }
        match handle.read_chunk(READ_TIMEOUT).await {
            Ok(Some(chunk)) => {
                if let Err(e) = file.write_all(&chunk.bytes).await {
                    error!(device, "Write error, aborting capture: {}", e);
                    aborted = true;
                    break;
                }
            }
            Ok(None) => {
                error!(device, "Device select() timed out; treating as a stall");
                aborted = true;
                break;
            }
            Err(DeviceError::Busy) | Err(DeviceError::Transient(_)) => {
                // A transient hiccup mid-capture is logged and retried
                // on the next loop iteration rather than aborting.
                warn!(device, "Transient read error, retrying");
            }
            Err(DeviceError::Permanent(msg)) => {
                error!(device, "Unrecoverable read error, aborting capture: {}", msg);
                aborted = true;
                break;
            }
        }
    }

    let _ = file.flush().await;
    drop(file);
    let _ = handle.close().await;
    scheduler.clear_in_flight(device).await;
    scheduler.clear_abort(device);

    if aborted {
        warn!(device, ?working_file, "Capture aborted; working file left in place for inspection");
        return;
    }

    info!(device, ?working_file, "Capture finished, running post-recording hook");
    if let Some(script) = &config.scripts.post_recording {
        let duration = (job.ts_end - job.ts_start).num_seconds().max(0);
        run_post_recording_script(script, &working_file, duration);
    }

    // Step 10: every listed profile transcodes concurrently; the
    // scheduler's history ledger gets one entry per profile once each
    // finishes (§4.6 step 7).
    let mp4_root = config.general.data_dir.join("mp4");
    let mut joins = Vec::new();
    let mut keep_source: Option<String> = None;
    for profile in &profiles {
        if profile.transcode.keep_source {
            keep_source = Some(profile.name.clone());
        }
        if !profile.transcode.use_transcoding {
            keep_source = Some(profile.name.clone());
            continue;
        }
        let pool = transcode_pool.clone();
        let sched = scheduler.clone();
        let job_clone = job.clone();
        let profile_clone = profile.clone();
        let source = working_file.clone();
        let mp4_root = mp4_root.clone();
        joins.push(tokio::spawn(async move {
            if let Err(e) = pool
                .spawn(&sched, &job_clone, profile_clone, source, &mp4_root, true)
                .await
            {
                warn!("Transcode failed: {}", e);
            }
        }));
    }
    for j in joins {
        let _ = j.await;
    }

    if let Some(profile_name) = keep_source {
        let keep_dir = config.general.data_dir.join("kept");
        if let Err(e) = tokio::fs::create_dir_all(&keep_dir).await {
            warn!("Failed to create keep-source directory: {}", e);
        } else {
            let dest = keep_dir.join(format!("{}.ts", job.filename));
            if let Err(e) = tokio::fs::rename(&working_file, &dest).await {
                warn!("Failed to move kept source file: {}", e);
            } else {
                scheduler
                    .record_history(pvr_core::history::HistoryRecord {
                        title: job.title.clone(),
                        channel: job.channel.clone(),
                        ts_start: job.ts_start,
                        ts_end: job.ts_end,
                        final_path: dest.display().to_string(),
                        profile: profile_name,
                        aborted: false,
                    })
                    .await;
            }
        }
    } else if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
        warn!(?work_dir, "Failed to remove working directory: {}", e);
    }

    info!(seq = job.seq_nbr, "Recording complete");
}

async fn with_busy_retry<F, Fut>(mut op: F) -> Result<(), DeviceError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), DeviceError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(DeviceError::Busy) if BUSY_RETRY.should_retry(attempt) => {
                let delay = BUSY_RETRY.delay(attempt);
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn run_channel_script(scripts: &ScriptsConfig, channel: &str) -> Result<(), DeviceError> {
    let Some(script) = &scripts.channel_switch else {
        return Err(DeviceError::Permanent("no channel_switch script configured".into()));
    };
    match StdCommand::new(script).arg(channel).status() {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(DeviceError::Permanent(format!(
            "channel_switch.sh exited with {status}"
        ))),
        Err(e) => Err(DeviceError::Permanent(e.to_string())),
    }
}

fn run_post_recording_script(script: &std::path::Path, file: &std::path::Path, duration_secs: i64) {
    match StdCommand::new(script)
        .arg("-f")
        .arg(file)
        .arg("-t")
        .arg(duration_secs.to_string())
        .status()
    {
        Ok(status) if !status.success() => {
            warn!(?script, %status, "Post-recording script exited non-zero")
        }
        Err(e) => warn!(?script, "Failed to run post-recording script: {}", e),
        _ => {}
    }
}

/// `<data>/vtmp/vid<d>/<basename>`, disambiguated with a `_NN` suffix
/// (01..99) on name collision.
async fn prepare_working_dir(
    data_dir: &std::path::Path,
    device: usize,
    basename: &str,
) -> std::io::Result<PathBuf> {
    let base = data_dir.join("vtmp").join(format!("vid{device}"));
    tokio::fs::create_dir_all(&base).await?;

    let plain = base.join(basename);
    if tokio::fs::create_dir(&plain).await.is_ok() {
        return Ok(plain);
    }
    for n in 1..=99u32 {
        let candidate = base.join(format!("{basename}_{n:02}"));
        if tokio::fs::create_dir(&candidate).await.is_ok() {
            return Ok(candidate);
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        "exhausted 99 collision suffixes for working directory",
    ))
}
