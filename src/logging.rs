//! Logging and tracing initialization.
//!
//! Structured logging on the `tracing` ecosystem, as pretty console output or
//! JSON for machine parsing.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Configuration for the logging system.
#[derive(Default)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` overrides the level chosen here. Calling this twice is harmless;
/// the second call leaves the first subscriber in place.
pub fn init(config: LogConfig) {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "syncpilot={}",
            default_level.as_str().to_lowercase()
        ))
    });

    let result = if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}

/// Per-key rate limiter for log lines.
///
/// Progress arrives several times a second for every running job; the manager
/// keys this by job id so each job logs at most once per interval.
pub struct LogThrottle {
    interval: Duration,
    last_logged: HashMap<String, Instant>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_logged: HashMap::new(),
        }
    }

    /// True on the first call for `key` and whenever `interval` has passed.
    pub fn should_log(&mut self, key: &str) -> bool {
        let now = Instant::now();
        match self.last_logged.get(key) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                self.last_logged.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Drop state for `key`; its next log goes through immediately.
    pub fn forget(&mut self, key: &str) {
        self.last_logged.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_log_per_key_passes() {
        let mut throttle = LogThrottle::new(Duration::from_secs(1));
        assert!(throttle.should_log("a"));
        assert!(throttle.should_log("b"));
    }

    #[test]
    fn immediate_repeat_is_blocked() {
        let mut throttle = LogThrottle::new(Duration::from_secs(1));
        assert!(throttle.should_log("a"));
        assert!(!throttle.should_log("a"));
    }

    #[test]
    fn forget_allows_log() {
        let mut throttle = LogThrottle::new(Duration::from_secs(100));
        assert!(throttle.should_log("a"));
        throttle.forget("a");
        assert!(throttle.should_log("a"));
    }

    #[test]
    fn zero_interval_never_blocks() {
        let mut throttle = LogThrottle::new(Duration::ZERO);
        assert!(throttle.should_log("a"));
        assert!(throttle.should_log("a"));
    }
}
