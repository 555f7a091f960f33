//! Human-friendly job names derived from what is being transferred.

use std::path::Path;

use chrono::{DateTime, Local};

use super::analyzer::{self, FolderAnalysis, FolderType};
use super::heuristic::Heuristic;
use super::models::Operation;

/// Name built from both folder analyses, with a short date suffix.
pub fn smart_name(
    source: &FolderAnalysis,
    target: &FolderAnalysis,
    now: DateTime<Local>,
) -> String {
    let stamp = now.format("%b %d %H:%M");
    let label = source.folder_type.label();

    if source.folder_type == FolderType::Photos && source.name.to_uppercase().contains("DCIM") {
        return format!("Camera Import ({} items) - {}", source.file_count, stamp);
    }

    if analyzer::looks_like_backup_target(&target.name) {
        return format!("{} to {} - {}", label, target.name, stamp);
    }

    format!(
        "{}: {} ({} files) - {}",
        label, source.name, source.file_count, stamp
    )
}

/// Name that needs nothing but the operation and the raw source path.
pub fn fallback_name(source: &Path, operation: Operation, now: DateTime<Local>) -> String {
    format!(
        "{} {} - {}",
        operation.label(),
        analyzer::folder_name(source),
        now.format("%Y-%m-%d %H:%M")
    )
}

/// Analyze both folders and name the job. An unreadable source falls back to
/// [`fallback_name`]; the target is allowed not to exist yet.
pub fn suggest_name(
    source: &Path,
    target: &Path,
    operation: Operation,
    now: DateTime<Local>,
) -> Heuristic<String> {
    let source_analysis = analyzer::analyze(source);
    if source_analysis.is_fallback() {
        return Heuristic::Fallback(fallback_name(source, operation, now));
    }

    let target_analysis = analyzer::analyze(target);
    Heuristic::Computed(smart_name(
        source_analysis.value(),
        target_analysis.value(),
        now,
    ))
}
