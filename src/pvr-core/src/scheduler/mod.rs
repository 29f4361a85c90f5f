// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! The scheduler: the single piece of shared state every worker in
//! the daemon reads or mutates.
//!
//! Every public method takes `&self` and locks one internal
//! [`tokio::sync::Mutex`] for its full duration. The original
//! implementation used a single global mutex around the equivalent C
//! structures for the same reason: the queues, in-flight slots,
//! exclusion table, profile registry and history ledger are small and
//! mutated rarely enough that a single coarse lock is both simpler and
//! no slower in practice than per-field locking, and it rules out the
//! lock-ordering bugs that come with several.

mod queue;
mod recurrence;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::SchedulerError;
use crate::history::{HistoryLedger, HistoryRecord};
use crate::job::{Job, JobTemplate};
use crate::journal;
use crate::profile::{ProfileRecord, ProfileRegistry};
use queue::PendingQueue;

pub use queue::MAX_ENTRIES;

/// Which occurrences a delete request removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteScope {
    /// Just the named occurrence; the rest of its series is untouched
    /// and the occurrence's date is remembered so a future
    /// re-expansion of the series will not recreate it.
    ThisOnly,
    /// Every occurrence sharing the target's `recurrence_id`.
    WholeSeries,
}

/// Longest a single recording may run.
pub const MAX_RECORDING: chrono::Duration = chrono::Duration::hours(4);

struct SchedulerInner {
    queues: Vec<PendingQueue>,
    in_flight: Vec<Option<Job>>,
    exclusions: HashMap<u64, HashSet<NaiveDate>>,
    profiles: ProfileRegistry,
    history: HistoryLedger,
    known_channels: HashSet<String>,
    next_seq: u64,
    next_recurrence_id: u64,
    journal_path: PathBuf,
    history_path: PathBuf,
}

/// Shared handle to the scheduler's state. Cheap to clone; every clone
/// refers to the same underlying lock.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Mutex<SchedulerInner>>,
    abort_flags: Arc<Vec<AtomicBool>>,
    num_devices: usize,
}

impl Scheduler {
    /// Build a fresh scheduler for `num_devices` capture devices,
    /// loading any existing pending-job and history journals from
    /// disk.
    pub fn load(
        num_devices: usize,
        profiles: ProfileRegistry,
        journal_path: PathBuf,
        history_path: PathBuf,
    ) -> Self {
        let pending = journal::load_journal(&journal_path);
        let history_records = journal::load_history(&history_path);

        let mut queues = vec![PendingQueue::new(); num_devices];
        let mut next_seq = 0u64;
        let mut next_recurrence_id = 0u64;
        for job in pending {
            next_seq = next_seq.max(job.seq_nbr + 1);
            next_recurrence_id = next_recurrence_id.max(job.recurrence_id + 1);
            let device = job.device.min(num_devices.saturating_sub(1));
            if let Some(queue) = queues.get_mut(device) {
                let _ = queue.insert(job);
            }
        }

        let inner = SchedulerInner {
            queues,
            in_flight: vec![None; num_devices],
            exclusions: HashMap::new(),
            profiles,
            history: HistoryLedger::from_records(history_records),
            known_channels: HashSet::new(),
            next_seq,
            next_recurrence_id,
            journal_path,
            history_path,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
            abort_flags: Arc::new((0..num_devices).map(|_| AtomicBool::new(false)).collect()),
            num_devices,
        }
    }

    pub fn num_devices(&self) -> usize {
        self.num_devices
    }

    pub async fn set_known_channels(&self, channels: impl IntoIterator<Item = String>) {
        let mut inner = self.inner.lock().await;
        inner.known_channels = channels.into_iter().collect();
    }

    /// Validate and insert a job or recurring series. Returns the
    /// sequence numbers of every occurrence actually queued.
    pub async fn insert(
        &self,
        template: JobTemplate,
        device: Option<usize>,
        now: DateTime<Local>,
    ) -> Result<Vec<u64>, SchedulerError> {
        if template.ts_end <= template.ts_start {
            return Err(SchedulerError::EndBeforeStart);
        }
        if template.ts_end - template.ts_start > MAX_RECORDING {
            return Err(SchedulerError::TooLong);
        }
        if template.ts_start < now {
            return Err(SchedulerError::StartInPast);
        }

        let mut inner = self.inner.lock().await;
        if !inner.known_channels.is_empty() && !inner.known_channels.contains(&template.channel) {
            return Err(SchedulerError::UnknownChannel(template.channel.clone()));
        }
        for name in &template.transcoding_profiles {
            if !inner.profiles.is_empty() && !inner.profiles.contains(name) {
                return Err(SchedulerError::UnknownProfile(name.clone()));
            }
        }

        let candidate_devices: Vec<usize> = match device {
            Some(d) if d < self.num_devices => vec![d],
            Some(_) => return Err(SchedulerError::NoDeviceAvailable),
            None => (0..self.num_devices).collect(),
        };

        let recurrence_id = inner.next_recurrence_id;
        let excluded = inner
            .exclusions
            .get(&recurrence_id)
            .cloned()
            .unwrap_or_default();

        // Expand once, with a throwaway counter, purely to learn the
        // concrete (start, end) interval of every occurrence the series
        // would produce. Every occurrence — not just the template's
        // first — must be collision-checked on a candidate device
        // before any of them are committed (§4.1: "a single collision
        // rejects the entire series").
        let mut dry_seq = 0u64;
        let occurrences = recurrence::expand(&template, recurrence_id, &excluded, || {
            dry_seq += 1;
            dry_seq
        });
        let chosen = candidate_devices.into_iter().find(|&d| {
            let fits = inner.queues[d].len() + occurrences.len() <= MAX_ENTRIES;
            let collides = occurrences.iter().any(|occ| {
                inner.queues[d].overlaps_any(occ.ts_start, occ.ts_end)
                    || inner.in_flight[d]
                        .as_ref()
                        .map(|j| j.overlaps(occ.ts_start, occ.ts_end))
                        .unwrap_or(false)
            });
            fits && !collides
        });

        let Some(device_idx) = chosen else {
            return Err(if device.is_some() {
                SchedulerError::Collides
            } else {
                SchedulerError::NoDeviceAvailable
            });
        };

        let mut seq_nbrs = Vec::new();
        {
            let next_seq = &mut inner.next_seq;
            let mut jobs = recurrence::expand(&template, recurrence_id, &excluded, || {
                let seq = *next_seq;
                *next_seq += 1;
                seq
            });
            for job in &mut jobs {
                job.device = device_idx;
            }
            for job in jobs {
                seq_nbrs.push(job.seq_nbr);
                if inner.queues[device_idx].insert(job).is_err() {
                    return Err(SchedulerError::QueueFull);
                }
            }
        }
        inner.next_recurrence_id += 1;

        self.persist_locked(&inner);
        info!(
            device = device_idx,
            count = seq_nbrs.len(),
            "Inserted recording series"
        );
        Ok(seq_nbrs)
    }

    /// Remove one occurrence or a whole series.
    pub async fn delete(&self, seq_nbr: u64, scope: DeleteScope) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().await;
        let mut found = false;
        for queue in inner.queues.iter_mut() {
            if let Some(job) = queue.find(seq_nbr) {
                found = true;
                let recurrence_id = job.recurrence_id;
                let date = job.ts_start.date_naive();
                match scope {
                    DeleteScope::ThisOnly => {
                        queue.remove_by_seq(seq_nbr);
                        if job.recurrence {
                            inner
                                .exclusions
                                .entry(recurrence_id)
                                .or_default()
                                .insert(date);
                        }
                    }
                    DeleteScope::WholeSeries => {
                        queue.remove_by_recurrence(recurrence_id);
                        inner.exclusions.remove(&recurrence_id);
                    }
                }
                break;
            }
        }
        if !found {
            return Err(SchedulerError::UnknownSeqNbr(seq_nbr));
        }
        self.persist_locked(&inner);
        Ok(())
    }

    /// Replace the transcoding profile list on a still-pending job.
    pub async fn update_profile(
        &self,
        seq_nbr: u64,
        profiles: Vec<String>,
    ) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().await;
        for name in &profiles {
            if !inner.profiles.is_empty() && !inner.profiles.contains(name) {
                return Err(SchedulerError::UnknownProfile(name.clone()));
            }
        }
        let mut found = false;
        for queue in inner.queues.iter_mut() {
            if let Some(job) = queue.iter_mut().find(|j| j.seq_nbr == seq_nbr) {
                job.transcoding_profiles = profiles.clone();
                found = true;
                break;
            }
        }
        if !found {
            return Err(SchedulerError::UnknownSeqNbr(seq_nbr));
        }
        self.persist_locked(&inner);
        Ok(())
    }

    /// Every pending job across every device, sorted by start time.
    pub async fn list(&self) -> Vec<Job> {
        let inner = self.inner.lock().await;
        let mut all: Vec<Job> = inner.queues.iter().flat_map(|q| q.iter().cloned()).collect();
        all.sort_by_key(|j| (j.ts_start, j.seq_nbr));
        all
    }

    /// The next job due on `device`, if any.
    pub async fn head(&self, device: usize) -> Option<Job> {
        let inner = self.inner.lock().await;
        inner.queues.get(device).and_then(|q| q.head()).cloned()
    }

    /// The job currently being captured on `device`, if any.
    pub async fn in_flight(&self, device: usize) -> Option<Job> {
        let inner = self.inner.lock().await;
        inner.in_flight.get(device).cloned().flatten()
    }

    /// The earliest pending job across all devices.
    pub async fn next_scheduled(&self) -> Option<Job> {
        let inner = self.inner.lock().await;
        inner
            .queues
            .iter()
            .filter_map(|q| q.head())
            .min_by_key(|j| (j.ts_start, j.seq_nbr))
            .cloned()
    }

    /// Pop the head of `device`'s queue into its in-flight slot. Used
    /// by the dispatcher once a job's start time has arrived.
    pub async fn begin_capture(&self, device: usize) -> Option<Job> {
        let mut inner = self.inner.lock().await;
        let job = inner.queues.get_mut(device)?.pop_head()?;
        inner.in_flight[device] = Some(job.clone());
        self.persist_locked(&inner);
        Some(job)
    }

    /// Clear `device`'s in-flight slot. Called by the capture worker
    /// once the raw capture loop has exited (§4.5 step 8), before any
    /// post-recording script or transcoding runs — the device becomes
    /// available for the next job immediately, independent of how
    /// long post-processing takes.
    pub async fn clear_in_flight(&self, device: usize) {
        let mut inner = self.inner.lock().await;
        inner.in_flight[device] = None;
        self.persist_locked(&inner);
    }

    /// Append a completed-recording entry to the history ledger and
    /// persist it. Called once per capture after all of its
    /// transcodings (or the decision to skip transcoding) are done.
    pub async fn record_history(&self, record: HistoryRecord) {
        let mut inner = self.inner.lock().await;
        inner.history.push(record);
        let snapshot = inner.history.to_vec_oldest_first();
        if let Err(e) = journal::save_history(&inner.history_path.clone(), &snapshot) {
            tracing::warn!("Failed to persist history journal: {}", e);
        }
    }

    pub async fn history(&self) -> Vec<HistoryRecord> {
        let inner = self.inner.lock().await;
        inner.history.iter().cloned().collect()
    }

    /// Request that the in-progress capture on `device` stop as soon
    /// as it next checks the flag.
    pub fn request_abort(&self, device: usize) {
        if let Some(flag) = self.abort_flags.get(device) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    pub fn should_abort(&self, device: usize) -> bool {
        self.abort_flags
            .get(device)
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn clear_abort(&self, device: usize) {
        if let Some(flag) = self.abort_flags.get(device) {
            flag.store(false, Ordering::SeqCst);
        }
    }

    pub async fn resolve_profile(&self, name: &str) -> Option<Arc<ProfileRecord>> {
        let inner = self.inner.lock().await;
        inner.profiles.resolve(name)
    }

    /// Rescan the profile directory, replacing the registry in place.
    pub async fn refresh_profiles(&self, dir: &std::path::Path) -> std::io::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.profiles.reload(dir)
    }

    fn persist_locked(&self, inner: &SchedulerInner) {
        let all: Vec<Job> = inner.queues.iter().flat_map(|q| q.iter().cloned()).collect();
        if let Err(e) = journal::save_journal(&inner.journal_path, &all) {
            tracing::warn!("Failed to persist journal: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Mangling, RecurrenceType};
    use chrono::TimeZone;

    fn scratch_paths(name: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("pvrd-scheduler-test-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        (dir.join("journal.xml"), dir.join("history.xml"))
    }

    fn fresh_scheduler(name: &str, num_devices: usize) -> Scheduler {
        let (journal_path, history_path) = scratch_paths(name);
        Scheduler::load(num_devices, ProfileRegistry::new(None), journal_path, history_path)
    }

    fn template_at(hour: u32, recurrence: RecurrenceType, count: u32) -> JobTemplate {
        let start = Local.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap();
        JobTemplate {
            title: "t".into(),
            filename: "f".into(),
            channel: "bbc1".into(),
            ts_start: start,
            ts_end: start + chrono::Duration::hours(1),
            recurrence_type: recurrence,
            recurrence_count: count,
            recurrence_start_number: 1,
            recurrence_mangling: Mangling::AppendDate,
            recurrence_mangling_prefix: "_".into(),
            transcoding_profiles: vec![],
        }
    }

    #[tokio::test]
    async fn insert_rejects_in_flight_collision() {
        let sched = fresh_scheduler("in-flight-collision", 1);
        let now = Local.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let seqs = sched
            .insert(template_at(20, RecurrenceType::Single, 1), Some(0), now)
            .await
            .unwrap();
        assert_eq!(seqs.len(), 1);
        let promoted = sched.begin_capture(0).await.unwrap();
        assert_eq!(promoted.seq_nbr, seqs[0]);
        assert!(sched.head(0).await.is_none());
        assert!(sched.in_flight(0).await.is_some());

        // A second job overlapping the now-in-flight job must be
        // rejected even though the pending queue for device 0 is empty.
        let err = sched
            .insert(template_at(20, RecurrenceType::Single, 1), Some(0), now)
            .await
            .unwrap_err();
        assert_eq!(err, SchedulerError::Collides);
    }

    #[tokio::test]
    async fn insert_rejects_whole_series_if_any_occurrence_collides() {
        let sched = fresh_scheduler("series-collision", 1);
        let now = Local.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();

        // A standalone job on day 3 of what will become a daily series.
        let day3 = Local.with_ymd_and_hms(2026, 3, 4, 20, 30, 0).unwrap();
        let mut clashing = template_at(20, RecurrenceType::Single, 1);
        clashing.ts_start = day3;
        clashing.ts_end = day3 + chrono::Duration::hours(1);
        sched.insert(clashing, Some(0), now).await.unwrap();

        // A 4-occurrence daily series starting day 1 only overlaps the
        // standalone job on its *third* occurrence (day 3), not its
        // first. The whole series must still be rejected, and nothing
        // partially inserted.
        let series = template_at(20, RecurrenceType::Daily, 4);
        let err = sched.insert(series, None, now).await.unwrap_err();
        assert_eq!(err, SchedulerError::Collides);

        // Only the one standalone job survives.
        assert_eq!(sched.list().await.len(), 1);
    }

    #[tokio::test]
    async fn insert_recurrence_count_one_matches_single() {
        let sched = fresh_scheduler("single-vs-recurring", 1);
        let now = Local.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let seqs = sched
            .insert(template_at(20, RecurrenceType::Weekly, 1), None, now)
            .await
            .unwrap();
        assert_eq!(seqs.len(), 1);
        let jobs = sched.list().await;
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].recurrence);
    }

    #[tokio::test]
    async fn delete_this_only_records_exclusion_and_keeps_series() {
        let sched = fresh_scheduler("delete-this-only", 1);
        let now = Local.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let seqs = sched
            .insert(template_at(20, RecurrenceType::Weekly, 3), None, now)
            .await
            .unwrap();
        assert_eq!(seqs.len(), 3);

        sched.delete(seqs[1], DeleteScope::ThisOnly).await.unwrap();
        let remaining = sched.list().await;
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|j| j.seq_nbr != seqs[1]));
    }

    #[tokio::test]
    async fn delete_whole_series_removes_every_occurrence() {
        let sched = fresh_scheduler("delete-whole-series", 1);
        let now = Local.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let seqs = sched
            .insert(template_at(20, RecurrenceType::Daily, 4), None, now)
            .await
            .unwrap();
        sched.delete(seqs[0], DeleteScope::WholeSeries).await.unwrap();
        assert!(sched.list().await.is_empty());
    }
}
