//! Logging and tracing initialization for watchdogd.
//!
//! Structured logging through the `tracing` ecosystem, either human-readable
//! or JSON for log collectors.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Configuration for the logging system.
#[derive(Default)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
}

/// Filter used when `RUST_LOG` is unset: our crate at the chosen level,
/// dependencies (hyper, reqwest) at warn.
fn default_directive(verbose: bool) -> String {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    format!("warn,watchdogd={}", level.as_str().to_lowercase())
}

/// Install the global subscriber. Call once, early in `main()`.
pub fn init(config: LogConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config.verbose)));

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.json {
        // Upload attempts are spans; keep their attempt id on every line
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).compact())
            .init();
    }
}

/// Rate limit for a warning that would otherwise repeat every tick.
///
/// The window is kept per subject, here the device address: a warning about
/// a newly configured address goes through at once instead of waiting out
/// the window of the old one.
pub struct LogThrottle {
    interval: Duration,
    last: Mutex<Option<(String, Instant)>>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// True if `subject` has not been logged within the interval.
    pub fn should_log(&self, subject: &str) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        let due = match last.as_ref() {
            Some((prev, at)) => prev != subject || now.duration_since(*at) >= self.interval,
            None => true,
        };
        if due {
            *last = Some((subject.to_string(), now));
        }
        due
    }

    /// Forget the last warning, e.g. once the device answered again.
    pub fn clear(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
