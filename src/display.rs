use chrono::{DateTime, Utc};
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use crate::types::{Candidate, CandidateStatus};

/// A candidate together with how many records its current log holds.
pub struct PlanEntry<'a> {
    pub candidate: &'a Candidate,
    pub records: usize,
}

/// Compact age like "5m ago", "3h ago", "2d ago".
pub fn format_age(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    if secs < 60 {
        "<1m ago".to_string()
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86400)
    }
}

fn age_of(mtime: Option<std::time::SystemTime>, now: DateTime<Utc>) -> String {
    match mtime {
        Some(t) => format_age(now - DateTime::<Utc>::from(t)),
        None => "-".to_string(),
    }
}

/// Table of every registered program and whether it will run.
pub fn format_plan(entries: &[PlanEntry<'_>], now: DateTime<Utc>) -> String {
    let mut out = String::new();

    let name_width = entries
        .iter()
        .map(|e| e.candidate.program.len())
        .max()
        .unwrap_or(0)
        .max("program".len());

    let header = format!(
        "{:<name_width$}  {:<10}  {:>8}  {:>8}  {:>7}",
        "program", "status", "binary", "log", "records"
    );
    out.push_str(
        &header
            .if_supports_color(Stream::Stdout, |s| s.dimmed())
            .to_string(),
    );
    out.push('\n');

    for entry in entries {
        let candidate = entry.candidate;
        let status = format!("{:<10}", candidate.status.label());
        let status_colored = match candidate.status {
            CandidateStatus::Unbenchmarked | CandidateStatus::Stale => status
                .if_supports_color(Stream::Stdout, |s| s.green())
                .to_string(),
            CandidateStatus::UpToDate => status
                .if_supports_color(Stream::Stdout, |s| s.yellow())
                .to_string(),
            CandidateStatus::MissingBinary => status
                .if_supports_color(Stream::Stdout, |s| s.dimmed())
                .to_string(),
        };

        out.push_str(&format!(
            "{:<name_width$}  {}  {:>8}  {:>8}  {:>7}\n",
            candidate.program,
            status_colored,
            age_of(candidate.binary_mtime, now),
            age_of(candidate.log_mtime, now),
            entry.records,
        ));
    }

    let eligible = entries
        .iter()
        .filter(|e| e.candidate.status.is_eligible())
        .count();
    out.push('\n');
    out.push_str(&format!("{} of {} programs will run\n", eligible, entries.len()));

    out
}

#[derive(Serialize)]
struct JsonPlanEntry {
    program: String,
    status: CandidateStatus,
    will_run: bool,
    binary_path: String,
    log_path: String,
    binary_modified: Option<String>,
    log_modified: Option<String>,
    records: usize,
}

pub fn format_plan_json(entries: &[PlanEntry<'_>]) -> String {
    let rfc3339 = |t: std::time::SystemTime| {
        DateTime::<Utc>::from(t)
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string()
    };

    let json_entries: Vec<JsonPlanEntry> = entries
        .iter()
        .map(|entry| {
            let c = entry.candidate;
            JsonPlanEntry {
                program: c.program.clone(),
                status: c.status,
                will_run: c.status.is_eligible(),
                binary_path: c.binary_path.to_string_lossy().to_string(),
                log_path: c.log_path.to_string_lossy().to_string(),
                binary_modified: c.binary_mtime.map(rfc3339),
                log_modified: c.log_mtime.map(rfc3339),
                records: entry.records,
            }
        })
        .collect();

    serde_json::to_string_pretty(&json_entries).unwrap_or_else(|_| "[]".to_string())
}
