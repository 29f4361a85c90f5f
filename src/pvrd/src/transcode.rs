// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! The bounded transcode worker pool.
//!
//! Admission is a counted [`tokio::sync::Semaphore`]: a request that
//! finds the pool full returns [`TranscodeError::Busy`] immediately
//! rather than queueing, matching the teacher's preference for
//! backpressure signalled to the caller over an unbounded work queue
//! (see `WorkerPool` in the ferrex transcoding-worker reference this
//! is grounded on — DESIGN.md).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pvr_core::history::HistoryRecord;
use pvr_core::job::Job;
use pvr_core::profile::ProfileRecord;
use pvr_core::scheduler::Scheduler;
use sysinfo::System;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

use crate::config::TranscodeConfig;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("transcode pool is at capacity")]
    Busy,
    #[error("system load stayed above the admission threshold too long")]
    OverLoaded,
    #[error("transcoder exited with status {0}")]
    NonZeroExit(i32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A running transcoder process, tracked so [`TranscodePool::kill_all`]
/// can reach it by process group on shutdown.
struct ActiveTranscode {
    pgid: i32,
}

#[derive(Clone)]
pub struct TranscodePool {
    semaphore: Arc<Semaphore>,
    active: Arc<Mutex<Vec<ActiveTranscode>>>,
    active_count: Arc<AtomicU32>,
    config: TranscodeConfig,
}

impl TranscodePool {
    pub fn new(config: TranscodeConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_threads)),
            active: Arc::new(Mutex::new(Vec::new())),
            active_count: Arc::new(AtomicU32::new(0)),
            config,
        }
    }

    pub fn active_count(&self) -> u32 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Run one (source file, profile) transcode. Returns immediately
    /// with [`TranscodeError::Busy`] if the pool is already at
    /// capacity; never queues (§4.6).
    pub async fn spawn(
        &self,
        scheduler: &Scheduler,
        job: &Job,
        profile: Arc<ProfileRecord>,
        source_file: PathBuf,
        mp4_root: &Path,
        profile_subdirs: bool,
    ) -> Result<(), TranscodeError> {
        let permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| TranscodeError::Busy)?;

        self.await_load_admission().await?;

        self.active_count.fetch_add(1, Ordering::SeqCst);
        let result = self
            .run_one(scheduler, job, &profile, &source_file, mp4_root, profile_subdirs)
            .await;
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        drop(permit);
        result
    }

    /// Block (without holding any pool slot beyond this call) while
    /// the 5-minute load average exceeds the configured ceiling,
    /// backing off with doubling delays up to 1800s, and give up with
    /// [`TranscodeError::OverLoaded`] once the cumulative wait exceeds
    /// `max_waiting_time_to_transcode_secs`.
    async fn await_load_admission(&self) -> Result<(), TranscodeError> {
        let mut waited = Duration::ZERO;
        let mut backoff = Duration::from_secs(self.config.backoff_initial_secs);
        let cap = Duration::from_secs(1800);
        let budget = Duration::from_secs(self.config.max_waiting_time_to_transcode_secs);

        loop {
            let load5 = System::load_average().five;
            if load5 <= self.config.max_load_for_transcoding {
                return Ok(());
            }
            if waited >= budget {
                return Err(TranscodeError::OverLoaded);
            }
            warn!(load5, "System load above transcoding admission threshold, backing off");
            tokio::time::sleep(backoff).await;
            waited += backoff;
            backoff = (backoff * 2).min(cap);
        }
    }

    async fn run_one(
        &self,
        scheduler: &Scheduler,
        job: &Job,
        profile: &ProfileRecord,
        source_file: &Path,
        mp4_root: &Path,
        profile_subdirs: bool,
    ) -> Result<(), TranscodeError> {
        if !profile.transcode.use_transcoding {
            return Ok(());
        }

        let work_dir = source_file
            .parent()
            .unwrap_or(Path::new("."))
            .join(format!("xc-{}", profile.name));
        tokio::fs::create_dir_all(&work_dir).await?;

        let symlink_src = work_dir.join(
            source_file
                .file_name()
                .unwrap_or(std::ffi::OsStr::new("source.ts")),
        );
        #[cfg(unix)]
        {
            let _ = tokio::fs::remove_file(&symlink_src).await;
            tokio::fs::symlink(source_file, &symlink_src).await.ok();
        }

        let args = build_transcoder_args(profile, &symlink_src, &work_dir);
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(args.join(" "));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let pgid = child.id().map(|p| p as i32).unwrap_or(-1);
        self.active.lock().await.push(ActiveTranscode { pgid });

        let watchdog = Duration::from_secs(self.config.watchdog_hours * 3600);
        let outcome = tokio::time::timeout(watchdog, async {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                if let Some(status) = child.try_wait()? {
                    return Ok::<_, std::io::Error>(status);
                }
            }
        })
        .await;

        self.active.lock().await.retain(|a| a.pgid != pgid);

        let status = match outcome {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(TranscodeError::Io(e)),
            Err(_elapsed) => {
                error!(pgid, "Transcode watchdog expired, killing process group");
                kill_pgid(pgid, Signal::Kill);
                return Err(TranscodeError::NonZeroExit(-1));
            }
        };

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            warn!(code, "Transcoder exited non-zero; leaving working directory in place");
            return Err(TranscodeError::NonZeroExit(code));
        }

        let dest_dir = if profile_subdirs {
            mp4_root.join(&profile.name)
        } else {
            mp4_root.to_path_buf()
        };
        tokio::fs::create_dir_all(&dest_dir).await?;
        let final_path = move_output(&work_dir, &dest_dir, &profile.transcode.container_extension).await?;

        scheduler
            .record_history(HistoryRecord {
                title: job.title.clone(),
                channel: job.channel.clone(),
                ts_start: job.ts_start,
                ts_end: job.ts_end,
                final_path: final_path.display().to_string(),
                profile: profile.name.clone(),
                aborted: false,
            })
            .await;

        info!(path = %final_path.display(), profile = %profile.name, "Transcode complete");
        Ok(())
    }

    /// Tear down every active transcode's process group. When
    /// `stop_then_kill` is set (the shutdown path), each group gets a
    /// SIGSTOP first, a 600ms grace period, then SIGKILL — this stops
    /// the transcoder from forking further children in the gap before
    /// the kill lands.
    pub async fn kill_all(&self, stop_then_kill: bool) {
        let groups: Vec<i32> = self.active.lock().await.iter().map(|a| a.pgid).collect();
        for pgid in groups {
            if stop_then_kill {
                kill_pgid(pgid, Signal::Stop);
                tokio::time::sleep(Duration::from_millis(600)).await;
            }
            kill_pgid(pgid, Signal::Kill);
        }
    }
}

enum Signal {
    Stop,
    Kill,
}

#[cfg(unix)]
fn kill_pgid(pgid: i32, signal: Signal) {
    if pgid > 0 {
        let raw = match signal {
            Signal::Stop => libc::SIGSTOP,
            Signal::Kill => libc::SIGKILL,
        };
        unsafe {
            libc::kill(-pgid, raw);
        }
    }
}

#[cfg(not(unix))]
fn kill_pgid(_pgid: i32, _signal: Signal) {}

fn build_transcoder_args(profile: &ProfileRecord, input: &Path, work_dir: &Path) -> Vec<String> {
    let t = &profile.transcode;
    let out = work_dir.join(format!("out.{}", t.container_extension));
    let mut args = vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-c:v".to_string(),
        t.video_codec.clone(),
        "-c:a".to_string(),
        t.audio_codec.clone(),
        "-b:v".to_string(),
        format!("{}k", t.bitrate_kbps),
    ];
    if t.crop.top + t.crop.bottom + t.crop.left + t.crop.right > 0 {
        args.push("-vf".to_string());
        args.push(format!(
            "crop=iw-{}-{}:ih-{}-{}:{}:{}",
            t.crop.left, t.crop.right, t.crop.top, t.crop.bottom, t.crop.left, t.crop.top
        ));
    }
    if t.passes == 2 {
        args.push("-pass".to_string());
        args.push("2".to_string());
    }
    if !t.extra_args.is_empty() {
        args.extend(t.extra_args.split_whitespace().map(String::from));
    }
    args.push(out.display().to_string());
    args
}

async fn move_output(work_dir: &Path, dest_dir: &Path, extension: &str) -> std::io::Result<PathBuf> {
    let produced = work_dir.join(format!("out.{extension}"));
    let stem = work_dir
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();

    for n in 0..=999u32 {
        let candidate = if n == 0 {
            dest_dir.join(format!("{stem}.{extension}"))
        } else {
            dest_dir.join(format!("{stem}_{n:03}.{extension}"))
        };
        if !candidate.exists() {
            tokio::fs::rename(&produced, &candidate).await?;
            return Ok(candidate);
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        "exhausted 999 collision suffixes for transcode output",
    ))
}
