//! Read-only ingestion monitor.
//!
//! Polls `/admin/count`, `/admin/ingest_stats`, and `/admin/recent` on a
//! fixed interval and prints one frame per poll. An endpoint that answers
//! with a non-2xx status (or not at all) is shown as unavailable instead of
//! stopping the loop. Nothing is persisted.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::time::Duration;
use tracing::debug;

use crate::admin_client::{AdminApi, HttpAdminClient, Reading};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;

pub const UNAVAILABLE: &str = "(endpoint no disponible)";

/// Responses gathered by one poll.
#[derive(Debug, Clone)]
pub struct Frame {
    pub at: DateTime<Utc>,
    pub count: Reading,
    pub ingest_stats: Reading,
    pub recent: Reading,
}

pub async fn poll(api: &dyn AdminApi, clock: &dyn Clock, recent_limit: u32) -> Frame {
    Frame {
        at: clock.now(),
        count: api.read_endpoint("count", &[]).await,
        ingest_stats: api.read_endpoint("ingest_stats", &[]).await,
        recent: api
            .read_endpoint("recent", &[("limit", recent_limit.to_string())])
            .await,
    }
}

pub fn render_frame(frame: &Frame) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "===== {} =====\n",
        frame.at.format("%Y-%m-%d %H:%M:%S")
    ));
    for (title, reading) in [
        ("count", &frame.count),
        ("ingest_stats", &frame.ingest_stats),
        ("recent", &frame.recent),
    ] {
        out.push_str(&format!("--- {} ---\n", title));
        out.push_str(&render_reading(reading));
        out.push('\n');
    }
    out
}

fn render_reading(reading: &Reading) -> String {
    match reading {
        Reading::Available(value) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        Reading::Unavailable(reason) => {
            debug!(reason = %reason, "monitor endpoint unavailable");
            UNAVAILABLE.to_string()
        }
    }
}

/// Polls `iterations` times (forever when `None`), sleeping `interval`
/// between polls.
pub async fn run_loop(
    api: &dyn AdminApi,
    clock: &dyn Clock,
    interval: Duration,
    recent_limit: u32,
    iterations: Option<u64>,
    out: &mut dyn Write,
) -> Result<()> {
    let mut done = 0u64;
    loop {
        let frame = poll(api, clock, recent_limit).await;
        out.write_all(render_frame(&frame).as_bytes())?;
        out.flush()?;
        done += 1;

        if iterations.is_some_and(|n| done >= n) {
            return Ok(());
        }
        clock.sleep(interval).await;
    }
}

/// CLI entry point for `ferretero monitor`.
pub async fn run_monitor(config: &Config, once: bool, interval_secs: Option<u64>) -> Result<()> {
    let api = HttpAdminClient::from_config(config)?;
    let interval = Duration::from_secs(interval_secs.unwrap_or(config.monitor.interval_secs));
    let iterations = if once { Some(1) } else { None };

    let mut stdout = std::io::stdout();
    run_loop(
        &api,
        &SystemClock,
        interval,
        config.monitor.recent_limit,
        iterations,
        &mut stdout,
    )
    .await
}
