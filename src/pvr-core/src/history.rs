// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! The finished-recordings ledger.
//!
//! Bounded so the daemon's memory footprint (and the on-disk history
//! journal) cannot grow without limit across years of uptime; old
//! entries are simply dropped, not archived.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Most history records kept; the oldest is evicted once a new one
/// would exceed this.
pub const HISTORY_LENGTH: usize = 128;

/// One completed capture, logged once the capture (and any transcode)
/// has finished, whether it succeeded or was aborted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub title: String,
    pub channel: String,
    pub ts_start: DateTime<Local>,
    pub ts_end: DateTime<Local>,
    pub final_path: String,
    pub profile: String,
    pub aborted: bool,
}

/// Fixed-capacity, newest-first ledger of [`HistoryRecord`]s.
#[derive(Debug, Clone, Default)]
pub struct HistoryLedger {
    entries: VecDeque<HistoryRecord>,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(HISTORY_LENGTH),
        }
    }

    pub fn from_records(records: Vec<HistoryRecord>) -> Self {
        let mut ledger = Self::new();
        for record in records {
            ledger.push(record);
        }
        ledger
    }

    /// Insert at the front, evicting the oldest entry once at capacity.
    pub fn push(&mut self, record: HistoryRecord) {
        self.entries.push_front(record);
        while self.entries.len() > HISTORY_LENGTH {
            self.entries.pop_back();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot in oldest-first order, suitable for serializing to the
    /// history journal.
    pub fn to_vec_oldest_first(&self) -> Vec<HistoryRecord> {
        self.entries.iter().rev().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(title: &str) -> HistoryRecord {
        let ts = Local.with_ymd_and_hms(2026, 1, 1, 20, 0, 0).unwrap();
        HistoryRecord {
            title: title.to_string(),
            channel: "nrk1".into(),
            ts_start: ts,
            ts_end: ts + chrono::Duration::hours(1),
            final_path: format!("/data/{title}.mp4"),
            profile: "hd".into(),
            aborted: false,
        }
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut ledger = HistoryLedger::new();
        for i in 0..(HISTORY_LENGTH + 10) {
            ledger.push(sample(&format!("show-{i}")));
        }
        assert_eq!(ledger.len(), HISTORY_LENGTH);
        // Most recent is still at the front.
        assert_eq!(ledger.iter().next().unwrap().title, "show-137");
    }

    #[test]
    fn round_trips_oldest_first_order() {
        let mut ledger = HistoryLedger::new();
        ledger.push(sample("a"));
        ledger.push(sample("b"));
        ledger.push(sample("c"));
        let snapshot = ledger.to_vec_oldest_first();
        assert_eq!(
            snapshot.iter().map(|r| r.title.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }
}
