//! Maps raw rsync error text to a known failure category with remediation
//! steps. Total: unknown text gets a generic entry.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Permission,
    DiskFull,
    Network,
    NameCollision,
    InvalidArguments,
    Timeout,
    UnsupportedOption,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub title: String,
    pub explanation: String,
    pub suggestions: Vec<String>,
    /// The text exactly as it was received.
    pub original: String,
}

struct ErrorRule {
    pattern: Regex,
    category: ErrorCategory,
    title: &'static str,
    explanation: &'static str,
    suggestions: &'static [&'static str],
}

fn rule(
    pattern: &str,
    category: ErrorCategory,
    title: &'static str,
    explanation: &'static str,
    suggestions: &'static [&'static str],
) -> ErrorRule {
    ErrorRule {
        pattern: Regex::new(pattern).expect("valid classifier regex"),
        category,
        title,
        explanation,
        suggestions,
    }
}

static RULES: LazyLock<Vec<ErrorRule>> = LazyLock::new(|| {
    vec![
        rule(
            r"permission denied|operation not permitted|\(13\)|\beacces\b",
            ErrorCategory::Permission,
            "Permission Denied",
            "The transfer could not read the source or write to the destination.",
            &[
                "Check that you have read access to the source folder",
                "Check that the destination folder is writable",
                "Grant the application full disk access if the OS restricts it",
            ],
        ),
        rule(
            r"no space left on device|disk full|quota exceeded|\(28\)",
            ErrorCategory::DiskFull,
            "Destination Full",
            "The destination ran out of free space during the transfer.",
            &[
                "Free up space on the destination drive",
                "Choose a destination with more capacity",
                "Split the transfer into smaller folders",
            ],
        ),
        rule(
            r"connection refused|connection reset|connection timed out|network is unreachable|no route to host|broken pipe|connection unexpectedly closed|could not resolve",
            ErrorCategory::Network,
            "Network Problem",
            "The connection to the remote side was lost or could not be made.",
            &[
                "Check that the network share or remote host is reachable",
                "Reconnect the drive or share and restart the job",
                "Retry when the network is less busy",
            ],
        ),
        rule(
            r"file exists|already exists|\(17\)",
            ErrorCategory::NameCollision,
            "Name Collision",
            "Something with the same name already exists at the destination.",
            &[
                "Rename or remove the conflicting item at the destination",
                "Pick a different destination folder",
            ],
        ),
        rule(
            r"unknown option|unrecognized option|not supported|does not support|protocol version mismatch",
            ErrorCategory::UnsupportedOption,
            "Unsupported Option",
            "The installed rsync does not understand one of the requested options.",
            &[
                "Update rsync to a recent version",
                "Check which rsync binary is on the PATH",
            ],
        ),
        rule(
            r"syntax or usage error|invalid argument|\(code 1\)",
            ErrorCategory::InvalidArguments,
            "Invalid Arguments",
            "rsync rejected the source or destination it was given.",
            &[
                "Check that both paths exist and are spelled correctly",
                "Avoid special characters in folder names",
            ],
        ),
        rule(
            r"timed out|timeout",
            ErrorCategory::Timeout,
            "Timed Out",
            "The transfer stopped making progress for too long.",
            &[
                "Check that the source drive is still connected",
                "Restart the job; partial files are resumed",
            ],
        ),
    ]
});

const GENERIC_SUGGESTIONS: &[&str] = &[
    "Check the raw error output below for details",
    "Verify both folders are still accessible",
    "Restart the job",
];

/// Classify raw error text. Never fails.
pub fn classify(raw: &str) -> ClassifiedError {
    let lower = raw.to_lowercase();

    match RULES.iter().find(|r| r.pattern.is_match(&lower)) {
        Some(r) => ClassifiedError {
            category: r.category,
            title: r.title.to_string(),
            explanation: r.explanation.to_string(),
            suggestions: r.suggestions.iter().map(|s| s.to_string()).collect(),
            original: raw.to_string(),
        },
        None => ClassifiedError {
            category: ErrorCategory::Unknown,
            title: "Transfer Error".to_string(),
            explanation: "rsync reported an error that is not recognised.".to_string(),
            suggestions: GENERIC_SUGGESTIONS.iter().map(|s| s.to_string()).collect(),
            original: raw.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_is_recognised() {
        let raw = "rsync: send_files failed to open \"/Volumes/CARD/x.jpg\": Permission denied (13)";
        let classified = classify(raw);

        assert_eq!(classified.category, ErrorCategory::Permission);
        assert_eq!(classified.title, "Permission Denied");
        assert_eq!(classified.suggestions.len(), 3);
        assert_eq!(classified.original, raw);
    }

    #[test]
    fn categories_match_in_table_order() {
        let cases = [
            ("rsync: write failed: No space left on device (28)", ErrorCategory::DiskFull),
            ("ssh: connect to host nas port 22: Connection refused", ErrorCategory::Network),
            ("mkdir \"/backup/a\" failed: File exists (17)", ErrorCategory::NameCollision),
            ("rsync: --info=progress2: unknown option", ErrorCategory::UnsupportedOption),
            ("rsync error: syntax or usage error (code 1) at main.c", ErrorCategory::InvalidArguments),
            ("io timeout after 30 seconds -- exiting", ErrorCategory::Timeout),
        ];

        for (raw, expected) in cases {
            assert_eq!(classify(raw).category, expected, "{}", raw);
        }
    }

    #[test]
    fn unknown_text_gets_generic_help() {
        let classified = classify("something odd happened");
        assert_eq!(classified.category, ErrorCategory::Unknown);
        assert_eq!(classified.suggestions.len(), GENERIC_SUGGESTIONS.len());
        assert_eq!(classified.original, "something odd happened");
    }
}
