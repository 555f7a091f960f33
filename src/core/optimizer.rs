//! Advisory recommendations. Nothing here changes how a job runs.

use serde::{Deserialize, Serialize};

use super::analyzer::{self, FolderAnalysis, FolderType};
use super::codec;
use super::history::HistoryRecord;

pub const LARGE_TRANSFER_FILES: u64 = 500;

/// Below this average (bytes/s) the network is probably the bottleneck.
pub const SLOW_SPEED_BPS: f64 = 10.0 * 1024.0 * 1024.0;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationCategory {
    ContentType,
    Volume,
    Performance,
    Destination,
    Timing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub category: RecommendationCategory,
    pub title: String,
    pub suggestion: String,
    pub details: String,
}

fn advise(
    category: RecommendationCategory,
    title: &str,
    suggestion: &str,
    details: impl Into<String>,
) -> Recommendation {
    Recommendation {
        category,
        title: title.to_string(),
        suggestion: suggestion.to_string(),
        details: details.into(),
    }
}

/// Mean of the parseable average speeds in `history`, in bytes per second.
pub fn historical_average_bps(history: &[HistoryRecord]) -> Option<f64> {
    let speeds: Vec<f64> = history
        .iter()
        .map(|r| codec::parse_speed(&r.average_speed))
        .filter(|bps| *bps > 0.0)
        .collect();

    if speeds.is_empty() {
        return None;
    }
    Some(speeds.iter().sum::<f64>() / speeds.len() as f64)
}

/// Build recommendations for moving `source` into `target`.
///
/// `history` should be the records similar to this pair; `hour` is the local
/// wall-clock hour (0-23).
pub fn recommend(
    source: &FolderAnalysis,
    target: &FolderAnalysis,
    history: &[HistoryRecord],
    hour: u32,
) -> Vec<Recommendation> {
    let mut out = Vec::new();

    match source.folder_type {
        FolderType::Photos => out.push(advise(
            RecommendationCategory::ContentType,
            "Photo import",
            "Keep the original folder structure",
            "Photos are already compressed; rsync compression adds little. Copy first and delete from the card only after checking the import.",
        )),
        FolderType::Videos => out.push(advise(
            RecommendationCategory::ContentType,
            "Large video files",
            "Leave partial-transfer resume enabled",
            "Video files are large and already compressed. If the transfer is interrupted, restarting resumes partial files instead of starting over.",
        )),
        _ => {}
    }

    if source.file_count > LARGE_TRANSFER_FILES {
        out.push(advise(
            RecommendationCategory::Volume,
            "Large transfer",
            "Expect a long file-list phase before data moves",
            format!(
                "{} files ({}) will be scanned before copying starts.",
                source.file_count,
                codec::format_bytes(source.total_bytes)
            ),
        ));
    }

    if let Some(avg) = historical_average_bps(history) {
        if avg < SLOW_SPEED_BPS {
            out.push(advise(
                RecommendationCategory::Performance,
                "Slow past transfers",
                "The network or destination drive may be congested",
                format!(
                    "Similar transfers averaged {}. Try a wired connection or run this when the network is quiet.",
                    codec::format_speed(avg)
                ),
            ));
        } else {
            out.push(advise(
                RecommendationCategory::Performance,
                "Good past performance",
                "Similar transfers ran at healthy speeds",
                format!("Similar transfers averaged {}.", codec::format_speed(avg)),
            ));
        }
    }

    if analyzer::looks_like_backup_target(&target.name) {
        out.push(advise(
            RecommendationCategory::Destination,
            "Backup destination",
            "Prefer copy over move for backups",
            format!(
                "'{}' looks like a backup location. Keep the source until the backup has been checked.",
                target.name
            ),
        ));
    }

    out.push(timing_advice(hour));
    out
}

fn timing_advice(hour: u32) -> Recommendation {
    match hour {
        9..=17 => advise(
            RecommendationCategory::Timing,
            "Business hours",
            "Network shares may be busy right now",
            "Large transfers during working hours compete with other traffic. Consider scheduling big jobs for the evening.",
        ),
        18..=22 => advise(
            RecommendationCategory::Timing,
            "Evening",
            "A good time for medium-sized transfers",
            "Network load usually drops in the evening.",
        ),
        _ => advise(
            RecommendationCategory::Timing,
            "Off-peak hours",
            "Ideal time for large transfers",
            "Network and disks are usually idle overnight.",
        ),
    }
}
