// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! Expansion of a recurring [`JobTemplate`] into concrete [`Job`]s.
//!
//! Expansion happens once, eagerly, at series-creation time: all
//! occurrences for the series' configured count are produced up
//! front rather than generated lazily as each one comes due. This
//! keeps the pending queue the single source of truth for "what will
//! record next" without a separate recurrence-aware lookahead step in
//! the dispatcher.

use std::collections::HashSet;

use chrono::NaiveDate;

use crate::job::{Job, JobTemplate, Mangling, RecurrenceType};
use crate::time;

/// Produce every occurrence of `template`, skipping any date present
/// in `excluded` (dates a user has previously deleted from this
/// series and which must not reappear if the series is re-expanded).
///
/// `next_seq` is called once per occurrence actually produced, in
/// order, to obtain its `seq_nbr`.
pub fn expand(
    template: &JobTemplate,
    recurrence_id: u64,
    excluded: &HashSet<NaiveDate>,
    mut next_seq: impl FnMut() -> u64,
) -> Vec<Job> {
    let count = if template.is_recurring() {
        template.recurrence_count.max(1)
    } else {
        1
    };

    let mut occurrences = Vec::with_capacity(count as usize);
    let mut start = time::first_valid_start(template.ts_start, template.recurrence_type);
    let duration = template.ts_end - template.ts_start;
    let mut step_index = 0u32;
    let mut produced = 0u32;
    let mut guard = 0u32;

    // `guard` bounds the loop independently of `count` so a pathological
    // exclusion set (every date excluded) cannot spin forever.
    while produced < count && guard < count.saturating_mul(4).max(32) {
        guard += 1;
        let date = start.date_naive();
        if !excluded.contains(&date) {
            let (title, filename) = mangle(template, start, step_index, count);
            occurrences.push(Job {
                seq_nbr: next_seq(),
                title,
                filename,
                channel: template.channel.clone(),
                ts_start: start,
                ts_end: start + duration,
                device: 0,
                recurrence: template.is_recurring(),
                recurrence_type: template.recurrence_type,
                recurrence_count: count,
                recurrence_id,
                recurrence_start_number: template.recurrence_start_number,
                recurrence_mangling: template.recurrence_mangling,
                recurrence_mangling_prefix: template.recurrence_mangling_prefix.clone(),
                recurrence_title: template.title.clone(),
                recurrence_filename: template.filename.clone(),
                transcoding_profiles: template.transcoding_profiles.clone(),
            });
            produced += 1;
            step_index += 1;
        }
        if template.recurrence_type == RecurrenceType::Single {
            break;
        }
        start = time::advance(start, template.recurrence_type);
    }

    occurrences
}

/// `step_index` is the 0-based count of occurrences produced so far
/// (skipped/excluded dates don't advance it); `total` is the series'
/// configured occurrence count; `start` is this occurrence's own
/// start instant (needed for mode 0's per-occurrence date, since every
/// occurrence carries a different date but the same `template`).
fn mangle(
    template: &JobTemplate,
    start: chrono::DateTime<chrono::Local>,
    step_index: u32,
    total: u32,
) -> (String, String) {
    if !template.is_recurring() {
        return (template.title.clone(), template.filename.clone());
    }
    let prefix = &template.recurrence_mangling_prefix;
    let start_number = template.recurrence_start_number;
    // step_index is 0-based; §4.2 defines NN against the 1-based
    // occurrence position, so NN = (step_index + 1) + start_number - 1.
    let nn = step_index + start_number;
    match template.recurrence_mangling {
        Mangling::AppendDate => {
            let date = start.format("%Y-%m-%d");
            (
                format!("{}{}{}", template.title, prefix, date),
                format!("{}{}{}", template.filename, prefix, date),
            )
        }
        Mangling::AppendPosition => {
            let mm = total + start_number.saturating_sub(1);
            let suffix = format!("{:02}-{:02}", nn, mm);
            (
                format!("{}{}{}", template.title, prefix, suffix),
                format!("{}{}{}", template.filename, prefix, suffix),
            )
        }
        Mangling::Episode => {
            let suffix = format!("E{:02}", nn);
            (
                format!("{}{}{}", template.title, prefix, suffix),
                format!("{}{}{}", template.filename, prefix, suffix),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn template(recurrence_type: RecurrenceType, count: u32) -> JobTemplate {
        let start = Local.with_ymd_and_hms(2026, 3, 2, 20, 0, 0).unwrap();
        JobTemplate {
            title: "News".into(),
            filename: "news".into(),
            channel: "nrk1".into(),
            ts_start: start,
            ts_end: start + chrono::Duration::minutes(30),
            recurrence_type,
            recurrence_count: count,
            recurrence_start_number: 1,
            recurrence_mangling: Mangling::AppendDate,
            recurrence_mangling_prefix: "-".into(),
            transcoding_profiles: vec!["hd".into()],
        }
    }

    #[test]
    fn single_produces_exactly_one() {
        let t = template(RecurrenceType::Single, 1);
        let mut seq = 0u64;
        let jobs = expand(&t, 1, &HashSet::new(), || {
            seq += 1;
            seq
        });
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].title, "News");
    }

    #[test]
    fn daily_expands_to_count_with_mangled_titles() {
        let t = template(RecurrenceType::Daily, 3);
        let mut seq = 0u64;
        let jobs = expand(&t, 7, &HashSet::new(), || {
            seq += 1;
            seq
        });
        assert_eq!(jobs.len(), 3);
        assert!(jobs[0].title.starts_with("News-2026"));
        assert!(jobs.iter().all(|j| j.recurrence_id == 7));
        assert_eq!(jobs[1].ts_start.date_naive(), jobs[0].ts_start.date_naive() + chrono::Duration::days(1));

        // Each occurrence's own date, not the template's first date,
        // must appear in its mangled title/filename.
        for job in &jobs {
            let expected = job.ts_start.format("%Y-%m-%d").to_string();
            assert!(job.title.ends_with(&expected), "{} should end with {}", job.title, expected);
            assert!(job.filename.ends_with(&expected));
        }
    }

    #[test]
    fn append_position_mangling_matches_weekly_recurrence_scenario() {
        // §8 scenario 2: a 4-occurrence weekly series mangled in
        // position mode must read base_01-04 .. base_04-04.
        let mut t = template(RecurrenceType::Weekly, 4);
        t.recurrence_mangling = Mangling::AppendPosition;
        t.recurrence_mangling_prefix = "_".into();
        let mut seq = 0u64;
        let jobs = expand(&t, 1, &HashSet::new(), || {
            seq += 1;
            seq
        });
        assert_eq!(jobs.len(), 4);
        let suffixes: Vec<&str> = vec!["01-04", "02-04", "03-04", "04-04"];
        for (job, suffix) in jobs.iter().zip(suffixes) {
            assert_eq!(job.title, format!("News_{suffix}"));
            assert_eq!(job.filename, format!("news_{suffix}"));
        }
    }

    #[test]
    fn episode_mangling_starts_at_start_number() {
        let mut t = template(RecurrenceType::Daily, 2);
        t.recurrence_mangling = Mangling::Episode;
        t.recurrence_mangling_prefix = "".into();
        t.recurrence_start_number = 1;
        let mut seq = 0u64;
        let jobs = expand(&t, 1, &HashSet::new(), || {
            seq += 1;
            seq
        });
        assert_eq!(jobs[0].title, "NewsE01");
        assert_eq!(jobs[1].title, "NewsE02");
    }

    #[test]
    fn excluded_dates_are_skipped() {
        let t = template(RecurrenceType::Daily, 2);
        let first_date = t.ts_start.date_naive();
        let mut excluded = HashSet::new();
        excluded.insert(first_date + chrono::Duration::days(1));

        let mut seq = 0u64;
        let jobs = expand(&t, 1, &excluded, || {
            seq += 1;
            seq
        });
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].ts_start.date_naive(), first_date);
        assert_eq!(jobs[1].ts_start.date_naive(), first_date + chrono::Duration::days(2));
    }
}
