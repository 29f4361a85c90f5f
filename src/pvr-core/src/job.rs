// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! The pending-job record and its recurrence descriptor.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Maximum number of transcoding profiles a job may carry.
pub const N_PROF: usize = 4;

/// How an occurrence's title/filename are derived from the series base
/// name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mangling {
    /// `base + prefix + YYYY-MM-DD`
    AppendDate,
    /// `base + prefix + NN-MM` (NN = position, MM = series length)
    AppendPosition,
    /// `base + "E" + NN` (episode-style)
    Episode,
}

impl Default for Mangling {
    fn default() -> Self {
        Mangling::AppendDate
    }
}

/// Recurrence cadence for a series template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrenceType {
    Single,
    Daily,
    Weekly,
    Monthly,
    /// Monday through Friday.
    MonFri,
    /// Saturday and Sunday.
    SatSun,
    /// Monday through Thursday.
    MonThu,
}

impl RecurrenceType {
    pub fn is_recurring(self) -> bool {
        !matches!(self, RecurrenceType::Single)
    }
}

impl Default for RecurrenceType {
    fn default() -> Self {
        RecurrenceType::Single
    }
}

/// A concrete scheduled recording: either a standalone job or one
/// expanded occurrence of a series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub seq_nbr: u64,
    pub title: String,
    pub filename: String,
    pub channel: String,
    pub ts_start: DateTime<Local>,
    pub ts_end: DateTime<Local>,
    pub device: usize,

    pub recurrence: bool,
    pub recurrence_type: RecurrenceType,
    pub recurrence_count: u32,
    pub recurrence_id: u64,
    pub recurrence_start_number: u32,
    pub recurrence_mangling: Mangling,
    pub recurrence_mangling_prefix: String,
    pub recurrence_title: String,
    pub recurrence_filename: String,

    /// Up to [`N_PROF`] profile names; index 0 is primary for encoder
    /// parameter selection purposes at insert time (the actual capture
    /// profile choice is the highest-bitrate entry — see the capture
    /// worker).
    pub transcoding_profiles: Vec<String>,
}

impl Job {
    /// `[ts_start, ts_end]` overlap test, inclusive on both ends — two
    /// jobs that share a boundary second are treated as colliding. This
    /// mirrors the original implementation's endpoint-inclusive check
    /// (see DESIGN.md for the product-decision note).
    pub fn overlaps(&self, other_start: DateTime<Local>, other_end: DateTime<Local>) -> bool {
        self.ts_start <= other_end && other_start <= self.ts_end
    }

    pub fn duration(&self) -> chrono::Duration {
        self.ts_end - self.ts_start
    }
}

/// A not-yet-inserted recording request: either a single job or the
/// template for a recurrent series. Distinct from [`Job`] because it
/// carries no `seq_nbr`/`device` yet and a recurrent template expands
/// into many `Job`s before any of them exist.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub title: String,
    pub filename: String,
    pub channel: String,
    pub ts_start: DateTime<Local>,
    pub ts_end: DateTime<Local>,

    pub recurrence_type: RecurrenceType,
    pub recurrence_count: u32,
    pub recurrence_start_number: u32,
    pub recurrence_mangling: Mangling,
    pub recurrence_mangling_prefix: String,

    pub transcoding_profiles: Vec<String>,
}

impl JobTemplate {
    pub fn is_recurring(&self) -> bool {
        self.recurrence_type.is_recurring()
    }
}
