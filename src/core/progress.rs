//! Streaming parser for rsync `--progress` output.
//!
//! Output arrives in arbitrary chunks. Each chunk is split on `\r` and `\n`
//! (rsync rewrites its progress line in place with carriage returns) and every
//! non-blank line is classified by [`classify_line`], which walks an ordered
//! priority list: the first rule that matches wins.
//!
//! | priority | rule                | effect                                          |
//! |----------|---------------------|-------------------------------------------------|
//! | 1        | `ProgressWithFiles` | speed, bytes, ETA, file counts, overall percent |
//! | 2        | `Progress`          | speed, bytes, ETA                               |
//! | 3        | `FileListDone`      | current file = "Starting transfer..."           |
//! | 4        | `Summary`           | ignored                                         |
//! | 5        | `Fragment`          | ignored (half-written progress line)            |
//! | 6        | `CurrentFile`       | current file name (truncated)                   |

use std::collections::VecDeque;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::codec;

/// Retained speed samples per job.
pub const SPEED_HISTORY_CAPACITY: usize = 60;

/// Longest current-file label shown before truncation.
pub const MAX_FILE_LABEL: usize = 50;

pub const STARTING_TRANSFER: &str = "Starting transfer...";

static PROGRESS_WITH_FILES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([\d,.]+[kKMGT]?)\s+(\d+)%\s+([\d.]+[kKMGT]?B/s)\s+(\d+:\d{2}(?::\d{2})?)\s+\((?:xfer|xfr)#(\d+),\s*(?:to-check|to-chk|ir-chk)=(\d+)/(\d+)\)",
    )
    .expect("valid progress regex")
});

static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\d,.]+[kKMGT]?)\s+(\d+)%\s+([\d.]+[kKMGT]?B/s)\s+(\d+:\d{2}(?::\d{2})?)")
        .expect("valid progress regex")
});

static FRAGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+%|[\d,.]+[kKMGT]?\s+\d+%.*)$").expect("valid fragment regex")
});

/// Line openings rsync uses for bookkeeping and `--stats` output.
const SUMMARY_PREFIXES: &[&str] = &[
    "sending incremental file list",
    "receiving incremental file list",
    "receiving file list",
    "building file list",
    "file list",
    "created directory",
    "sent ",
    "total size is",
    "total file size",
    "total transferred file size",
    "total bytes ",
    "number of ",
    "literal data",
    "matched data",
    "delta-transmission",
];

/// Fragments that mark a summary wherever they appear.
const SUMMARY_MARKERS: &[&str] = &["speedup is", "incremental file list", "delta-transmission"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCount {
    pub current: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedSample {
    pub at: DateTime<Utc>,
    pub bytes_per_sec: f64,
}

/// Live view of a job's transfer, rebuilt from parsed rsync output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub percentage: u8,
    pub current_speed: String,
    pub average_speed: String,
    pub max_speed: String,
    pub min_speed: String,
    pub transferred: String,
    pub transferred_bytes: u64,
    pub total_bytes: Option<u64>,
    pub eta: String,
    pub current_file: String,
    pub file_count: FileCount,
    pub speed_history: VecDeque<SpeedSample>,
    pub last_update: Option<DateTime<Utc>>,
    #[serde(skip)]
    max_bps: Option<f64>,
    #[serde(skip)]
    min_bps: Option<f64>,
}

impl ProgressSnapshot {
    /// Mean of the retained samples, in bytes per second.
    pub fn average_bps(&self) -> f64 {
        if self.speed_history.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.speed_history.iter().map(|s| s.bytes_per_sec).sum();
        sum / self.speed_history.len() as f64
    }

    fn record_sample(&mut self, at: DateTime<Utc>, bytes_per_sec: f64) {
        self.speed_history.push_back(SpeedSample { at, bytes_per_sec });
        while self.speed_history.len() > SPEED_HISTORY_CAPACITY {
            self.speed_history.pop_front();
        }

        if bytes_per_sec > 0.0 {
            let max = self.max_bps.map_or(bytes_per_sec, |m| m.max(bytes_per_sec));
            let min = self.min_bps.map_or(bytes_per_sec, |m| m.min(bytes_per_sec));
            self.max_bps = Some(max);
            self.min_bps = Some(min);
            self.max_speed = codec::format_speed(max);
            self.min_speed = codec::format_speed(min);
        }

        self.average_speed = codec::format_speed(self.average_bps());
    }

    fn apply_transfer(&mut self, line: &TransferLine<'_>, at: DateTime<Utc>) {
        self.current_speed = line.speed.to_string();
        self.transferred_bytes = codec::parse_size(line.transferred);
        self.transferred = codec::format_bytes(self.transferred_bytes);
        self.eta = line.eta.to_string();
        self.last_update = Some(at);
        self.record_sample(at, codec::parse_speed(line.speed));
    }

    fn apply_file_counts(&mut self, remaining: u64, total: u64) {
        let current = total.saturating_sub(remaining);
        self.file_count = FileCount { current, total };
        self.percentage = overall_percentage(current, total);
    }
}

fn overall_percentage(current: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (current as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Byte/speed/time portion shared by both progress line shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferLine<'a> {
    pub transferred: &'a str,
    pub file_percent: u8,
    pub speed: &'a str,
    pub eta: &'a str,
}

/// What a single trimmed line means, in priority order.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind<'a> {
    ProgressWithFiles {
        transfer: TransferLine<'a>,
        xfer: u64,
        remaining: u64,
        total: u64,
    },
    Progress(TransferLine<'a>),
    FileListDone,
    Summary,
    Fragment,
    CurrentFile(&'a str),
}

type LineRule = for<'a> fn(&'a str) -> Option<LineKind<'a>>;

/// First match wins, most specific first.
const LINE_RULES: &[LineRule] = &[
    match_progress_with_files,
    match_progress,
    match_file_list_done,
    match_summary,
    match_fragment,
    match_current_file,
];

fn transfer_from<'a>(caps: &regex::Captures<'a>) -> TransferLine<'a> {
    TransferLine {
        transferred: caps.get(1).map_or("", |m| m.as_str()),
        file_percent: caps[2].parse().unwrap_or(0),
        speed: caps.get(3).map_or("", |m| m.as_str()),
        eta: caps.get(4).map_or("", |m| m.as_str()),
    }
}

pub fn match_progress_with_files(line: &str) -> Option<LineKind<'_>> {
    let caps = PROGRESS_WITH_FILES_RE.captures(line)?;
    Some(LineKind::ProgressWithFiles {
        transfer: transfer_from(&caps),
        xfer: caps[5].parse().unwrap_or(0),
        remaining: caps[6].parse().unwrap_or(0),
        total: caps[7].parse().unwrap_or(0),
    })
}

pub fn match_progress(line: &str) -> Option<LineKind<'_>> {
    let caps = PROGRESS_RE.captures(line)?;
    Some(LineKind::Progress(transfer_from(&caps)))
}

pub fn match_file_list_done(line: &str) -> Option<LineKind<'_>> {
    (line.contains("receiving file list") && line.contains("done")).then_some(LineKind::FileListDone)
}

pub fn match_summary(line: &str) -> Option<LineKind<'_>> {
    let lower = line.to_lowercase();
    let is_summary = SUMMARY_PREFIXES.iter().any(|p| lower.starts_with(p))
        || SUMMARY_MARKERS.iter().any(|m| lower.contains(m));
    is_summary.then_some(LineKind::Summary)
}

pub fn match_fragment(line: &str) -> Option<LineKind<'_>> {
    FRAGMENT_RE.is_match(line).then_some(LineKind::Fragment)
}

pub fn match_current_file(line: &str) -> Option<LineKind<'_>> {
    if line.contains('(') || line.contains(')') {
        return None;
    }
    Some(LineKind::CurrentFile(line))
}

/// Classify one trimmed, non-blank line. Lines no rule accepts are summaries.
pub fn classify_line(line: &str) -> LineKind<'_> {
    LINE_RULES
        .iter()
        .find_map(|rule| rule(line))
        .unwrap_or(LineKind::Summary)
}

/// Shorten a file name to [`MAX_FILE_LABEL`] characters, keeping the tail.
pub fn truncate_file_label(name: &str) -> String {
    let count = name.chars().count();
    if count <= MAX_FILE_LABEL {
        return name.to_string();
    }
    let keep = MAX_FILE_LABEL - 3;
    let tail: String = name.chars().skip(count - keep).collect();
    format!("...{}", tail)
}

/// Result of feeding one chunk through the parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// A progress line (with or without file counts) was applied.
    pub progress_updated: bool,
    /// The current-file label changed.
    pub file_changed: bool,
}

/// Apply a raw output chunk to `snapshot`.
pub fn apply_chunk(snapshot: &mut ProgressSnapshot, chunk: &str, now: DateTime<Utc>) -> ChunkOutcome {
    let mut outcome = ChunkOutcome::default();

    for line in chunk.split(['\r', '\n']).map(str::trim).filter(|l| !l.is_empty()) {
        match classify_line(line) {
            LineKind::ProgressWithFiles {
                transfer,
                remaining,
                total,
                ..
            } => {
                snapshot.apply_file_counts(remaining, total);
                snapshot.apply_transfer(&transfer, now);
                outcome.progress_updated = true;
            }
            LineKind::Progress(transfer) => {
                snapshot.apply_transfer(&transfer, now);
                outcome.progress_updated = true;
            }
            LineKind::FileListDone => {
                snapshot.current_file = STARTING_TRANSFER.to_string();
                outcome.file_changed = true;
            }
            LineKind::CurrentFile(name) => {
                snapshot.current_file = truncate_file_label(name);
                outcome.file_changed = true;
            }
            LineKind::Summary | LineKind::Fragment => {}
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "   2506567 100%   42.84MB/s   00:00:00 (xfer#161, to-check=429/724)";

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn combined_line_sets_counts_speed_and_bytes() {
        let mut snap = ProgressSnapshot::default();
        let outcome = apply_chunk(&mut snap, SAMPLE, now());

        assert!(outcome.progress_updated);
        assert_eq!(snap.file_count, FileCount { current: 295, total: 724 });
        assert_eq!(snap.percentage, 41);
        assert_eq!(snap.current_speed, "42.84MB/s");
        assert_eq!(snap.transferred, "2.39MB");
        assert_eq!(snap.transferred_bytes, 2_506_567);
        assert_eq!(snap.eta, "00:00:00");
        assert_eq!(snap.speed_history.len(), 1);
        assert_eq!(snap.max_speed, "42.84MB/s");
        assert_eq!(snap.min_speed, "42.84MB/s");
        assert_eq!(snap.average_speed, "42.84MB/s");
        assert!(snap.last_update.is_some());
    }

    #[test]
    fn ir_chk_and_xfr_spellings_are_accepted() {
        let mut snap = ProgressSnapshot::default();
        apply_chunk(
            &mut snap,
            "1.20M  12%  1.00MB/s  0:00:05 (xfr#3, ir-chk=10/20)",
            now(),
        );
        assert_eq!(snap.file_count, FileCount { current: 10, total: 20 });
        assert_eq!(snap.percentage, 50);

        let mut snap = ProgressSnapshot::default();
        let outcome = apply_chunk(
            &mut snap,
            "1.05M 100% 42.84MB/s 0:00:00 (xfr#5, to-chk=10/20)",
            now(),
        );
        assert!(outcome.progress_updated);
        assert_eq!(snap.file_count, FileCount { current: 10, total: 20 });
        assert_eq!(snap.percentage, 50);
    }

    #[test]
    fn remaining_above_total_clamps_to_zero() {
        let mut snap = ProgressSnapshot::default();
        apply_chunk(&mut snap, "100 100% 1.00KB/s 0:00:01 (xfer#1, to-check=900/724)", now());
        assert_eq!(snap.file_count.current, 0);
        assert_eq!(snap.percentage, 0);
    }

    #[test]
    fn zero_total_does_not_divide() {
        let mut snap = ProgressSnapshot::default();
        apply_chunk(&mut snap, "100 100% 1.00KB/s 0:00:01 (xfer#1, to-check=0/0)", now());
        assert_eq!(snap.percentage, 0);
    }

    #[test]
    fn bare_progress_leaves_file_counts_alone() {
        let mut snap = ProgressSnapshot::default();
        apply_chunk(&mut snap, SAMPLE, now());
        let outcome = apply_chunk(&mut snap, "  1,048,576  50%   2.00MB/s    0:00:03", now());

        assert!(outcome.progress_updated);
        assert_eq!(snap.file_count.total, 724);
        assert_eq!(snap.percentage, 41);
        assert_eq!(snap.current_speed, "2.00MB/s");
        assert_eq!(snap.transferred, "1.00MB");
        assert_eq!(snap.eta, "0:00:03");
        assert_eq!(snap.speed_history.len(), 2);
        assert_eq!(snap.min_speed, "2.00MB/s");
        assert_eq!(snap.max_speed, "42.84MB/s");
        assert_eq!(snap.average_speed, "22.42MB/s");
    }

    #[test]
    fn speed_history_evicts_oldest_past_capacity() {
        let mut snap = ProgressSnapshot::default();
        for i in 1..=61 {
            let line = format!("{} 10% {}.00KB/s 0:00:01", i * 1000, i);
            apply_chunk(&mut snap, &line, now());
        }
        assert_eq!(snap.speed_history.len(), SPEED_HISTORY_CAPACITY);
        assert_eq!(snap.speed_history.front().unwrap().bytes_per_sec, 2.0 * 1024.0);
        assert_eq!(snap.speed_history.back().unwrap().bytes_per_sec, 61.0 * 1024.0);
    }

    #[test]
    fn zero_speed_does_not_touch_min_max() {
        let mut snap = ProgressSnapshot::default();
        apply_chunk(&mut snap, "0 0% 0.00B/s 0:00:00", now());
        assert_eq!(snap.max_speed, "");
        assert_eq!(snap.min_speed, "");
        assert_eq!(snap.speed_history.len(), 1);
    }

    #[test]
    fn file_names_and_markers() {
        let mut snap = ProgressSnapshot::default();

        apply_chunk(&mut snap, "receiving file list ... done\n", now());
        assert_eq!(snap.current_file, STARTING_TRANSFER);

        let outcome = apply_chunk(&mut snap, "DCIM/100CANON/IMG_0001.JPG\n", now());
        assert!(outcome.file_changed);
        assert!(!outcome.progress_updated);
        assert_eq!(snap.current_file, "DCIM/100CANON/IMG_0001.JPG");

        apply_chunk(&mut snap, "sending incremental file list\n", now());
        apply_chunk(&mut snap, "total size is 1.23G  speedup is 1.00\n", now());
        apply_chunk(&mut snap, "42%\n", now());
        apply_chunk(&mut snap, "rsync: something (code 23)\n", now());
        assert_eq!(snap.current_file, "DCIM/100CANON/IMG_0001.JPG");
    }

    #[test]
    fn long_file_names_keep_their_tail() {
        let name = format!("{}/final.mov", "a".repeat(80));
        let label = truncate_file_label(&name);
        assert_eq!(label.chars().count(), MAX_FILE_LABEL);
        assert!(label.starts_with("..."));
        assert!(label.ends_with("final.mov"));
    }

    #[test]
    fn rules_are_tried_in_priority_order() {
        assert!(matches!(classify_line(SAMPLE.trim()), LineKind::ProgressWithFiles { xfer: 161, .. }));
        assert!(matches!(classify_line("1 1% 1.00B/s 0:00:01"), LineKind::Progress(_)));
        assert_eq!(classify_line("receiving file list ... done"), LineKind::FileListDone);
        assert_eq!(classify_line("sent 1.2K bytes  received 35 bytes"), LineKind::Summary);
        assert_eq!(classify_line("12,345  3%"), LineKind::Fragment);
        assert_eq!(classify_line("photos/a.jpg"), LineKind::CurrentFile("photos/a.jpg"));
    }

    #[test]
    fn chunk_with_carriage_returns_processes_each_update() {
        let mut snap = ProgressSnapshot::default();
        apply_chunk(
            &mut snap,
            "movie.mp4\r  32768   0%  1.00MB/s  0:01:00\r  65536   1%  3.00MB/s  0:00:40\n",
            now(),
        );
        assert_eq!(snap.current_file, "movie.mp4");
        assert_eq!(snap.speed_history.len(), 2);
        assert_eq!(snap.current_speed, "3.00MB/s");
    }
}
