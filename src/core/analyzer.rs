//! Folder inspection for naming and recommendations.
//!
//! The walk counts every file and sums sizes, but only the first
//! [`EXTENSION_SAMPLE`] files contribute extensions to type inference.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::heuristic::Heuristic;

pub const EXTENSION_SAMPLE: usize = 50;

/// Target folder name fragments that mark a backup destination.
pub const BACKUP_TARGET_HINTS: &[&str] = &["backup", "archive", "nas", "time machine", "vault"];

pub fn looks_like_backup_target(name: &str) -> bool {
    let lower = name.to_lowercase();
    BACKUP_TARGET_HINTS.iter().any(|hint| lower.contains(hint))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderType {
    Photos,
    Videos,
    Documents,
    Music,
    Backup,
    Files,
}

impl FolderType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Photos => "Photos",
            Self::Videos => "Videos",
            Self::Documents => "Documents",
            Self::Music => "Music",
            Self::Backup => "Backup",
            Self::Files => "Files",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        let kind = match ext {
            "jpg" | "jpeg" | "png" | "gif" | "heic" | "heif" | "tif" | "tiff" | "raw" | "cr2"
            | "cr3" | "nef" | "arw" | "dng" | "orf" | "raf" => Self::Photos,
            "mp4" | "mov" | "avi" | "mkv" | "m4v" | "mts" | "m2ts" | "wmv" | "webm" => Self::Videos,
            "pdf" | "doc" | "docx" | "txt" | "md" | "rtf" | "odt" | "xls" | "xlsx" | "ppt"
            | "pptx" | "pages" | "numbers" | "key" | "csv" => Self::Documents,
            "mp3" | "wav" | "flac" | "aac" | "m4a" | "ogg" | "aiff" | "alac" => Self::Music,
            "zip" | "tar" | "gz" | "tgz" | "bak" | "dmg" | "iso" | "7z" | "rar" => Self::Backup,
            _ => return None,
        };
        Some(kind)
    }
}

/// Folder-name keywords, checked before extensions.
const NAME_KEYWORDS: &[(&str, FolderType)] = &[
    ("dcim", FolderType::Photos),
    ("camera", FolderType::Photos),
    ("photos", FolderType::Photos),
    ("pictures", FolderType::Photos),
    ("videos", FolderType::Videos),
    ("movies", FolderType::Videos),
    ("footage", FolderType::Videos),
    ("documents", FolderType::Documents),
    ("docs", FolderType::Documents),
    ("music", FolderType::Music),
    ("audio", FolderType::Music),
    ("backup", FolderType::Backup),
    ("archive", FolderType::Backup),
];

/// Tie-break order for extension counts. Photos beat videos.
const TYPE_PRIORITY: [FolderType; 5] = [
    FolderType::Photos,
    FolderType::Videos,
    FolderType::Documents,
    FolderType::Music,
    FolderType::Backup,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderAnalysis {
    pub path: PathBuf,
    pub name: String,
    pub file_count: u64,
    pub total_bytes: u64,
    pub extensions: Vec<String>,
    pub folder_type: FolderType,
}

/// Last path component, or the whole path for roots like `/`.
pub fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn classify_by_name(name: &str) -> Option<FolderType> {
    let lower = name.to_lowercase();
    NAME_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, kind)| *kind)
}

pub fn classify_by_extensions(extensions: &[String]) -> Option<FolderType> {
    let mut counts: HashMap<FolderType, usize> = HashMap::new();
    for ext in extensions {
        if let Some(kind) = FolderType::from_extension(ext) {
            *counts.entry(kind).or_default() += 1;
        }
    }

    let mut best: Option<(FolderType, usize)> = None;
    for kind in TYPE_PRIORITY {
        let count = counts.get(&kind).copied().unwrap_or(0);
        if count > 0 && best.is_none_or(|(_, n)| count > n) {
            best = Some((kind, count));
        }
    }
    best.map(|(kind, _)| kind)
}

struct Walk {
    file_count: u64,
    total_bytes: u64,
    extensions: Vec<String>,
}

fn walk(dir: &Path, acc: &mut Walk) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "Skipping unreadable directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            walk(&entry.path(), acc);
        } else if file_type.is_file() {
            acc.file_count += 1;
            acc.total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);

            if acc.extensions.len() < EXTENSION_SAMPLE {
                if let Some(ext) = entry.path().extension() {
                    acc.extensions.push(ext.to_string_lossy().to_lowercase());
                }
            }
        }
    }
}

/// Inspect `path`. A folder that cannot be listed yields zero counts, typed by
/// name alone.
pub fn analyze(path: &Path) -> Heuristic<FolderAnalysis> {
    let name = folder_name(path);

    if let Err(e) = fs::read_dir(path) {
        debug!(path = %path.display(), error = %e, "Folder analysis fell back");
        return Heuristic::Fallback(FolderAnalysis {
            path: path.to_path_buf(),
            folder_type: classify_by_name(&name).unwrap_or(FolderType::Files),
            name,
            file_count: 0,
            total_bytes: 0,
            extensions: Vec::new(),
        });
    }

    let mut acc = Walk {
        file_count: 0,
        total_bytes: 0,
        extensions: Vec::new(),
    };
    walk(path, &mut acc);

    let folder_type = classify_by_name(&name)
        .or_else(|| classify_by_extensions(&acc.extensions))
        .unwrap_or(FolderType::Files);

    Heuristic::Computed(FolderAnalysis {
        path: path.to_path_buf(),
        name,
        file_count: acc.file_count,
        total_bytes: acc.total_bytes,
        extensions: acc.extensions,
        folder_type,
    })
}
