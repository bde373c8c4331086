//! Seeding progress reporting.
//!
//! Reports what the seeding loop is doing (attempts, retries, waits,
//! snapshots of the remote catalog) so an operator watching `ferretero seed`
//! can tell a slow run from a stuck one. Events go to **stderr** so stdout
//! only carries the final run report.

use chrono::{DateTime, Utc};
use std::io::Write;
use std::time::Duration;

use crate::models::CatalogCounts;

/// A single progress event of a seeding run.
#[derive(Clone, Debug, PartialEq)]
pub enum SeedEvent {
    /// The run starts at `start` of `total` batches.
    Starting { start: usize, total: usize },
    /// One seed request is about to be sent.
    Attempt {
        at: DateTime<Utc>,
        index: usize,
        attempt: u32,
        max_attempts: u32,
        queries: String,
    },
    AttemptFailed {
        at: DateTime<Utc>,
        index: usize,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    BatchSucceeded {
        index: usize,
        attempts: u32,
        upserted: u64,
    },
    /// The batch exhausted its attempts and is skipped for this run.
    BatchFailed {
        index: usize,
        queries: String,
        error: String,
    },
    /// Remote catalog counts; `None` when `/admin/count` could not be read.
    Snapshot {
        at: DateTime<Utc>,
        counts: Option<CatalogCounts>,
        last: bool,
    },
    Waiting { duration: Duration },
}

/// Receives seeding events. Implementations write to stderr (human or JSON).
pub trait SeedReporter: Send + Sync {
    fn report(&self, event: SeedEvent);

    /// True when events are dropped, so callers log them through tracing.
    fn is_silent(&self) -> bool {
        false
    }
}

/// Human-friendly progress on stderr, one timestamped line per event.
pub struct StderrProgress;

impl SeedReporter for StderrProgress {
    fn report(&self, event: SeedEvent) {
        let line = match &event {
            SeedEvent::Starting { start, total } => {
                if start >= total {
                    format!("seed  nothing to do (cursor {} of {} batches)\n", start, total)
                } else {
                    format!("seed  resuming at batch {} of {}\n", start + 1, total)
                }
            }
            SeedEvent::Attempt {
                at,
                index,
                attempt,
                max_attempts,
                queries,
            } => format!(
                "[{}] batch {}  attempt {}/{}  {}\n",
                stamp(at),
                index + 1,
                attempt,
                max_attempts,
                queries
            ),
            SeedEvent::AttemptFailed {
                at,
                index,
                attempt,
                max_attempts,
                error,
            } => format!(
                "[{}] batch {}  attempt {}/{} failed: {}\n",
                stamp(at),
                index + 1,
                attempt,
                max_attempts,
                error
            ),
            SeedEvent::BatchSucceeded {
                index,
                attempts,
                upserted,
            } => format!(
                "batch {}  ok after {} attempt{}  ({} upserted)\n",
                index + 1,
                attempts,
                if *attempts == 1 { "" } else { "s" },
                upserted
            ),
            SeedEvent::BatchFailed {
                index,
                queries,
                error,
            } => format!(
                "WARNING: batch {} ({}) failed, skipping: {}\n",
                index + 1,
                queries,
                error
            ),
            SeedEvent::Snapshot { at, counts, last } => {
                let label = if *last { "final" } else { "progress" };
                match counts {
                    Some(c) => format!(
                        "[{}] {}  products={} brands={} families={}\n",
                        stamp(at),
                        label,
                        c.products,
                        c.brands,
                        c.families
                    ),
                    None => format!("[{}] {}  (count unavailable)\n", stamp(at), label),
                }
            }
            SeedEvent::Waiting { duration } => {
                format!("waiting {}s before next batch\n", duration.as_secs())
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SeedReporter for JsonProgress {
    fn report(&self, event: SeedEvent) {
        let obj = match &event {
            SeedEvent::Starting { start, total } => serde_json::json!({
                "event": "starting", "start": start, "total": total
            }),
            SeedEvent::Attempt {
                at,
                index,
                attempt,
                max_attempts,
                queries,
            } => serde_json::json!({
                "event": "attempt", "ts": at.to_rfc3339(), "batch": index,
                "attempt": attempt, "max_attempts": max_attempts, "queries": queries
            }),
            SeedEvent::AttemptFailed {
                at,
                index,
                attempt,
                max_attempts,
                error,
            } => serde_json::json!({
                "event": "attempt_failed", "ts": at.to_rfc3339(), "batch": index,
                "attempt": attempt, "max_attempts": max_attempts, "error": error
            }),
            SeedEvent::BatchSucceeded {
                index,
                attempts,
                upserted,
            } => serde_json::json!({
                "event": "batch_ok", "batch": index, "attempts": attempts, "upserted": upserted
            }),
            SeedEvent::BatchFailed {
                index,
                queries,
                error,
            } => serde_json::json!({
                "event": "batch_failed", "batch": index, "queries": queries, "error": error
            }),
            SeedEvent::Snapshot { at, counts, last } => serde_json::json!({
                "event": "snapshot", "ts": at.to_rfc3339(), "counts": counts, "final": last
            }),
            SeedEvent::Waiting { duration } => serde_json::json!({
                "event": "waiting", "secs": duration.as_secs()
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SeedReporter for NoProgress {
    fn report(&self, _event: SeedEvent) {}

    fn is_silent(&self) -> bool {
        true
    }
}

fn stamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SeedReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
