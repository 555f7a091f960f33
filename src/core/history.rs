//! Transfer history: newest-first JSON log of finished jobs.
//!
//! Persistence is best-effort. A missing or corrupt file loads as empty and a
//! failed write keeps the in-memory record; both are only logged.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::analyzer;
use super::models::{Job, JobId, JobStatus};

pub const HISTORY_LIMIT: usize = 100;

pub const HISTORY_FILE: &str = "transfer-history.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: JobId,
    pub name: String,
    pub source: PathBuf,
    pub target: PathBuf,
    pub is_move: bool,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub file_count: u64,
    pub transferred: String,
    pub average_speed: String,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn from_job(job: &Job, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            source: job.source.clone(),
            target: job.target.clone(),
            is_move: job.is_move,
            status: job.status,
            started_at: job.started_at,
            ended_at: job.ended_at,
            duration_ms: job.duration_ms(),
            file_count: job.progress_data.file_count.total,
            transferred: job.progress_data.transferred.clone(),
            average_speed: job.progress_data.average_speed.clone(),
            recorded_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPrediction {
    pub estimated_secs: u64,
    /// How many history records the estimate is based on.
    pub samples: usize,
}

pub struct TransferHistory {
    path: Option<PathBuf>,
    records: Vec<HistoryRecord>,
}

impl TransferHistory {
    /// Load history from `path`. Never fails.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match read_records(&path) {
            Ok(records) => {
                debug!(path = %path.display(), count = records.len(), "Loaded transfer history");
                records
            }
            Err(e) => {
                if path.exists() {
                    warn!(path = %path.display(), error = %e, "Ignoring unreadable transfer history");
                }
                Vec::new()
            }
        };

        Self {
            path: Some(path),
            records,
        }
    }

    /// History that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    /// Prepend a record for `job`, cap the log and write it through.
    pub fn record_transfer(&mut self, job: &Job) -> &HistoryRecord {
        let record = HistoryRecord::from_job(job, Utc::now());
        info!(job_id = %job.id, status = %job.status, "Recording transfer history");

        self.records.insert(0, record);
        self.records.truncate(HISTORY_LIMIT);

        if let Some(path) = &self.path {
            if let Err(e) = write_records(path, &self.records) {
                warn!(path = %path.display(), error = %e, "Failed to persist transfer history");
            }
        }

        &self.records[0]
    }

    pub fn recent(&self, limit: usize) -> Vec<HistoryRecord> {
        self.records.iter().take(limit).cloned().collect()
    }

    /// Records sharing the source path, the target path or the source folder name.
    pub fn similar(&self, source: &Path, target: &Path) -> Vec<HistoryRecord> {
        let source_name = analyzer::folder_name(source);
        self.records
            .iter()
            .filter(|r| {
                r.source == source
                    || r.target == target
                    || analyzer::folder_name(&r.source) == source_name
            })
            .cloned()
            .collect()
    }

    /// Mean per-file time across usable records, scaled to `file_count`.
    pub fn predict(&self, file_count: u64) -> Option<TransferPrediction> {
        let per_file: Vec<f64> = self
            .records
            .iter()
            .filter_map(|r| match r.duration_ms {
                Some(ms) if ms > 0 && r.file_count > 0 => Some(ms as f64 / r.file_count as f64),
                _ => None,
            })
            .collect();

        if per_file.is_empty() {
            return None;
        }

        let mean_ms = per_file.iter().sum::<f64>() / per_file.len() as f64;
        Some(TransferPrediction {
            estimated_secs: (mean_ms * file_count as f64 / 1000.0).round() as u64,
            samples: per_file.len(),
        })
    }
}

fn read_records(path: &Path) -> Result<Vec<HistoryRecord>> {
    let content = fs::read_to_string(path).context("Failed to read history file")?;
    serde_json::from_str(&content).context("Failed to parse history file")
}

fn write_records(path: &Path, records: &[HistoryRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create history directory")?;
    }
    let json = serde_json::to_string_pretty(records).context("Failed to serialize history")?;
    fs::write(path, json).context("Failed to write history file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{Operation, TransferInvocation};
    use crate::core::progress::ProgressSnapshot;
    use chrono::Duration;
    use tempfile::tempdir;

    fn finished_job(id: &str, source: &str, files: u64, duration_ms: i64) -> Job {
        let start = Utc::now();
        let mut progress = ProgressSnapshot::default();
        progress.file_count.total = files;
        Job {
            id: id.to_string(),
            name: format!("job {}", id),
            source: PathBuf::from(source),
            target: PathBuf::from("/backup"),
            is_move: false,
            operation: Operation::Copy,
            status: JobStatus::Completed,
            progress: 100,
            progress_data: progress,
            created_at: start,
            started_at: Some(start),
            ended_at: Some(start + Duration::milliseconds(duration_ms)),
            paused_at: None,
            resumed_at: None,
            error: None,
            invocation: TransferInvocation {
                program: "rsync".to_string(),
                args: Vec::new(),
            },
        }
    }

    #[test]
    fn prediction_needs_history() {
        let history = TransferHistory::in_memory();
        assert_eq!(history.predict(100), None);
    }

    #[test]
    fn prediction_scales_mean_per_file_time() {
        let mut history = TransferHistory::in_memory();
        history.record_transfer(&finished_job("a", "/cards/a", 50, 10_000));

        let prediction = history.predict(100).unwrap();
        assert_eq!(prediction.estimated_secs, 20);
        assert_eq!(prediction.samples, 1);
    }

    #[test]
    fn records_without_files_are_ignored_for_prediction() {
        let mut history = TransferHistory::in_memory();
        history.record_transfer(&finished_job("a", "/cards/a", 0, 10_000));
        assert_eq!(history.predict(10), None);
    }

    #[test]
    fn newest_first_and_capped() {
        let mut history = TransferHistory::in_memory();
        for i in 0..(HISTORY_LIMIT + 5) {
            history.record_transfer(&finished_job(&i.to_string(), "/cards/a", 1, 10));
        }
        assert_eq!(history.records().len(), HISTORY_LIMIT);
        assert_eq!(history.records()[0].id, (HISTORY_LIMIT + 4).to_string());
        assert_eq!(history.recent(3).len(), 3);
    }

    #[test]
    fn similar_matches_paths_and_folder_name() {
        let mut history = TransferHistory::in_memory();
        history.record_transfer(&finished_job("a", "/Volumes/CARD1/DCIM", 1, 10));
        history.record_transfer(&finished_job("b", "/Volumes/CARD2/DCIM", 1, 10));
        history.record_transfer(&finished_job("c", "/home/me/Music", 1, 10));

        let similar = history.similar(Path::new("/Volumes/CARD3/DCIM"), Path::new("/elsewhere"));
        assert_eq!(similar.len(), 2);

        let by_target = history.similar(Path::new("/x"), Path::new("/backup"));
        assert_eq!(by_target.len(), 3);
    }

    #[test]
    fn persists_and_reloads() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state").join(HISTORY_FILE);

        let mut history = TransferHistory::load(&path);
        assert!(history.records().is_empty());
        history.record_transfer(&finished_job("a", "/cards/a", 5, 1000));

        let reloaded = TransferHistory::load(&path);
        assert_eq!(reloaded.records().len(), 1);
        assert_eq!(reloaded.records()[0].id, "a");
        assert_eq!(reloaded.records()[0].duration_ms, Some(1000));
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let temp = tempdir().unwrap();
        let path = temp.path().join(HISTORY_FILE);
        fs::write(&path, "{not json").unwrap();

        let history = TransferHistory::load(&path);
        assert!(history.records().is_empty());
    }
}
