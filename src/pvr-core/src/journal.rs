// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! On-disk persistence for pending jobs and recording history.
//!
//! Both documents are small, human-inspectable XML files written
//! atomically: the new content goes to a sibling temp file first, then
//! an `fs::rename` swaps it into place, so a crash mid-write never
//! leaves a half-written journal behind (the original implementation
//! deleted the old file before writing the new one, which loses
//! everything on a crash between the two steps — see DESIGN.md).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::history::HistoryRecord;
use crate::job::Job;

/// Current on-disk schema version. Bumped whenever a field is added
/// or renamed in a way that isn't forward-compatible.
pub const JOURNAL_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "pvrdjournal")]
struct JournalDocument {
    #[serde(rename = "@version")]
    version: u32,
    #[serde(rename = "recording", default)]
    recordings: Vec<Job>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "pvrdhistory")]
struct HistoryDocument {
    #[serde(rename = "@version")]
    version: u32,
    #[serde(rename = "entry", default)]
    entries: Vec<HistoryRecord>,
}

/// Load the pending-jobs journal from `path`.
///
/// A missing or corrupt journal is not fatal: this daemon starts with
/// no recordings scheduled rather than refusing to boot, logging the
/// problem so an operator can investigate.
pub fn load_journal(path: &Path) -> Vec<Job> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("No journal at {:?}, starting with an empty schedule", path);
            return Vec::new();
        }
        Err(e) => {
            error!("Failed to read journal {:?}: {}", path, e);
            return Vec::new();
        }
    };

    match quick_xml::de::from_str::<JournalDocument>(&content) {
        Ok(doc) => doc.recordings,
        Err(e) => {
            error!("Journal {:?} is corrupt ({}), starting with an empty schedule", path, e);
            Vec::new()
        }
    }
}

/// Persist the full set of pending jobs to `path`, atomically.
pub fn save_journal(path: &Path, recordings: &[Job]) -> std::io::Result<()> {
    let doc = JournalDocument {
        version: JOURNAL_VERSION,
        recordings: recordings.to_vec(),
    };
    let body = quick_xml::se::to_string(&doc)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    write_atomic(path, &body)
}

/// Load the recording-history journal from `path`, oldest entry first.
pub fn load_history(path: &Path) -> Vec<HistoryRecord> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("No history journal at {:?}, starting empty", path);
            return Vec::new();
        }
        Err(e) => {
            error!("Failed to read history journal {:?}: {}", path, e);
            return Vec::new();
        }
    };

    match quick_xml::de::from_str::<HistoryDocument>(&content) {
        Ok(doc) => doc.entries,
        Err(e) => {
            error!(
                "History journal {:?} is corrupt ({}), starting empty",
                path, e
            );
            Vec::new()
        }
    }
}

/// Persist `entries` (oldest first) to the history journal, atomically.
pub fn save_history(path: &Path, entries: &[HistoryRecord]) -> std::io::Result<()> {
    let doc = HistoryDocument {
        version: JOURNAL_VERSION,
        entries: entries.to_vec(),
    };
    let body = quick_xml::se::to_string(&doc)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    write_atomic(path, &body)
}

fn write_atomic(path: &Path, body: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("xml.tmp");
    fs::write(&tmp_path, body)?;
    fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Mangling, RecurrenceType};
    use chrono::{Local, TimeZone};

    fn sample_job(seq: u64) -> Job {
        let start = Local.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap();
        Job {
            seq_nbr: seq,
            title: "news".into(),
            filename: "news".into(),
            channel: "nrk1".into(),
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
            transcoding_profiles: vec!["hd".into()],
        }
    }

    #[test]
    fn journal_round_trips() {
        let dir = std::env::temp_dir().join(format!("pvrd-journal-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("journal.xml");

        let jobs = vec![sample_job(1), sample_job(2)];
        save_journal(&path, &jobs).unwrap();
        let loaded = load_journal(&path);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].seq_nbr, 1);
        assert_eq!(loaded[1].channel, "nrk1");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_journal_yields_empty_schedule() {
        let path = std::env::temp_dir().join("pvrd-journal-does-not-exist.xml");
        assert!(load_journal(&path).is_empty());
    }
}
