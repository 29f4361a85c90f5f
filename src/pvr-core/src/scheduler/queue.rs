// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-device ordered queue of pending [`Job`]s.

use crate::job::Job;

/// Upper bound on how many pending jobs a single device queue holds at
/// once (a single occurrence plus the expansion of one recurring
/// series easily fits well under this).
pub const MAX_ENTRIES: usize = 256;

/// Jobs for one capture device, always kept sorted by `(ts_start,
/// seq_nbr)` so the head is always the next job due on this device.
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    jobs: Vec<Job>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= MAX_ENTRIES
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.jobs.iter_mut()
    }

    pub fn find(&self, seq_nbr: u64) -> Option<&Job> {
        self.jobs.iter().find(|j| j.seq_nbr == seq_nbr)
    }

    pub fn head(&self) -> Option<&Job> {
        self.jobs.first()
    }

    /// Insert keeping sort order; rejects if the queue is at capacity.
    pub fn insert(&mut self, job: Job) -> Result<(), Job> {
        if self.is_full() {
            return Err(job);
        }
        let pos = self
            .jobs
            .partition_point(|existing| order_key(existing) <= order_key(&job));
        self.jobs.insert(pos, job);
        Ok(())
    }

    /// Pop the head job once the dispatcher has handed it to a capture
    /// worker.
    pub fn pop_head(&mut self) -> Option<Job> {
        if self.jobs.is_empty() {
            None
        } else {
            Some(self.jobs.remove(0))
        }
    }

    pub fn remove_by_seq(&mut self, seq_nbr: u64) -> Option<Job> {
        let idx = self.jobs.iter().position(|j| j.seq_nbr == seq_nbr)?;
        Some(self.jobs.remove(idx))
    }

    pub fn remove_by_recurrence(&mut self, recurrence_id: u64) -> Vec<Job> {
        let (removed, kept): (Vec<Job>, Vec<Job>) = self
            .jobs
            .drain(..)
            .partition(|j| j.recurrence_id == recurrence_id);
        self.jobs = kept;
        removed
    }

    pub fn overlaps_any(&self, start: chrono::DateTime<chrono::Local>, end: chrono::DateTime<chrono::Local>) -> bool {
        self.jobs.iter().any(|j| j.overlaps(start, end))
    }
}

fn order_key(job: &Job) -> (chrono::DateTime<chrono::Local>, u64) {
    (job.ts_start, job.seq_nbr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Mangling, RecurrenceType};
    use chrono::{Local, TimeZone};

    fn job_at(seq: u64, hour: u32) -> Job {
        let start = Local.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap();
        Job {
            seq_nbr: seq,
            title: "t".into(),
            filename: "f".into(),
            channel: "c".into(),
            ts_start: start,
            ts_end: start + chrono::Duration::hours(1),
            device: 0,
            recurrence: false,
            recurrence_type: RecurrenceType::Single,
            recurrence_count: 0,
            recurrence_id: 0,
            recurrence_start_number: 0,
            recurrence_mangling: Mangling::AppendDate,
            recurrence_mangling_prefix: String::new(),
            recurrence_title: String::new(),
            recurrence_filename: String::new(),
            transcoding_profiles: vec![],
        }
    }

    #[test]
    fn stays_sorted_by_start_time() {
        let mut q = PendingQueue::new();
        q.insert(job_at(1, 20)).unwrap();
        q.insert(job_at(2, 10)).unwrap();
        q.insert(job_at(3, 15)).unwrap();
        let order: Vec<u64> = q.iter().map(|j| j.seq_nbr).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn pop_head_returns_earliest() {
        let mut q = PendingQueue::new();
        q.insert(job_at(1, 20)).unwrap();
        q.insert(job_at(2, 5)).unwrap();
        let head = q.pop_head().unwrap();
        assert_eq!(head.seq_nbr, 2);
        assert_eq!(q.len(), 1);
    }
}
