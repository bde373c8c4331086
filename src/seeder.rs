//! Resumable batch seeding.
//!
//! Drives `POST /admin/seed_basic` over an ordered list of batches. The
//! [`BatchRunner`] sends one batch with a bounded number of attempts and a
//! fixed delay between them. The [`LoopDriver`] walks the batch list from the
//! persisted cursor, advances the cursor after each successful batch, and
//! waits between batches so the remote service is not flooded.
//!
//! A batch that fails every attempt is skipped for the rest of the run and
//! the cursor stops advancing, so the stored cursor points at the first
//! failed batch and the next run starts there again.

use anyhow::{bail, Result};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::admin_client::{AdminApi, HttpAdminClient};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, SeedConfig};
use crate::cursor::{CursorStore, FileCursorStore};
use crate::models::{CatalogCounts, SeedReply};
use crate::progress::{ProgressMode, SeedEvent, SeedReporter};
use crate::terms;

/// Retry and pacing settings of a seeding run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeedSettings {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub batch_delay: Duration,
}

impl From<&SeedConfig> for SeedSettings {
    fn from(c: &SeedConfig) -> Self {
        Self {
            max_attempts: c.max_attempts.max(1),
            retry_delay: c.retry_delay(),
            batch_delay: c.batch_delay(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Succeeded { attempts: u32, reply: SeedReply },
    Failed { attempts: u32, last_error: String },
}

impl BatchOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            BatchOutcome::Succeeded { attempts, .. } | BatchOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Sends one batch, retrying up to `max_attempts` times.
pub struct BatchRunner<'a> {
    api: &'a dyn AdminApi,
    clock: &'a dyn Clock,
    reporter: &'a dyn SeedReporter,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        api: &'a dyn AdminApi,
        clock: &'a dyn Clock,
        reporter: &'a dyn SeedReporter,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            api,
            clock,
            reporter,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// Runs batch `index`. Success requires a 2xx reply with `ok: true`; no
    /// delay follows the last attempt.
    pub async fn run(&self, index: usize, batch: &str) -> BatchOutcome {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            self.reporter.report(SeedEvent::Attempt {
                at: self.clock.now(),
                index,
                attempt,
                max_attempts: self.max_attempts,
                queries: batch.to_string(),
            });
            if self.reporter.is_silent() {
                info!(batch = index, attempt, max = self.max_attempts, queries = %batch, "seed attempt");
            } else {
                debug!(batch = index, attempt, max = self.max_attempts, queries = %batch, "seed attempt");
            }

            let error = match self.api.seed_basic(batch).await {
                Ok(reply) if reply.ok => {
                    return BatchOutcome::Succeeded {
                        attempts: attempt,
                        reply,
                    }
                }
                Ok(reply) if reply.failed.is_empty() => "server replied ok=false".to_string(),
                Ok(reply) => format!(
                    "server replied ok=false (failed terms: {})",
                    reply.failed.join(", ")
                ),
                Err(e) => format!("{:#}", e),
            };

            if self.reporter.is_silent() {
                warn!(batch = index, attempt, error = %error, "seed attempt failed");
            } else {
                debug!(batch = index, attempt, error = %error, "seed attempt failed");
            }
            self.reporter.report(SeedEvent::AttemptFailed {
                at: self.clock.now(),
                index,
                attempt,
                max_attempts: self.max_attempts,
                error: error.clone(),
            });
            last_error = error;

            if attempt < self.max_attempts {
                self.clock.sleep(self.retry_delay).await;
            }
        }

        BatchOutcome::Failed {
            attempts: self.max_attempts,
            last_error,
        }
    }
}

/// A batch that exhausted its attempts during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedBatch {
    pub index: usize,
    pub queries: String,
    pub error: String,
}

/// Summary of one seeding run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeedReport {
    /// Cursor read at the start of the run.
    pub start: usize,
    pub total: usize,
    /// Batches attempted in this run.
    pub processed: usize,
    pub succeeded: usize,
    pub failed: Vec<FailedBatch>,
    /// Cursor persisted at the end of the run.
    pub final_cursor: usize,
    pub upserted: u64,
    /// Most recent remote counts read during the run.
    pub last_counts: Option<CatalogCounts>,
}

/// Walks the batch list from the stored cursor.
pub struct LoopDriver<'a> {
    api: &'a dyn AdminApi,
    store: &'a dyn CursorStore,
    clock: &'a dyn Clock,
    reporter: &'a dyn SeedReporter,
    settings: SeedSettings,
}

impl<'a> LoopDriver<'a> {
    pub fn new(
        api: &'a dyn AdminApi,
        store: &'a dyn CursorStore,
        clock: &'a dyn Clock,
        reporter: &'a dyn SeedReporter,
        settings: SeedSettings,
    ) -> Self {
        Self {
            api,
            store,
            clock,
            reporter,
            settings,
        }
    }

    /// Runs every batch from the stored cursor to the end.
    ///
    /// Returns an error only when the cursor cannot be written; remote
    /// failures are recorded in the report.
    pub async fn run(&self, batches: &[String]) -> Result<SeedReport> {
        let total = batches.len();
        let start = usize::try_from(self.store.read()).unwrap_or(usize::MAX);
        self.reporter.report(SeedEvent::Starting { start, total });

        let runner = BatchRunner::new(
            self.api,
            self.clock,
            self.reporter,
            self.settings.max_attempts,
            self.settings.retry_delay,
        );

        let mut report = SeedReport {
            start,
            total,
            processed: 0,
            succeeded: 0,
            failed: Vec::new(),
            final_cursor: start,
            upserted: 0,
            last_counts: None,
        };

        for index in start..total {
            let batch = &batches[index];
            report.processed += 1;

            match runner.run(index, batch).await {
                BatchOutcome::Succeeded { attempts, reply } => {
                    report.succeeded += 1;
                    report.upserted += reply.inserted_or_updated;
                    if report.failed.is_empty() {
                        self.store.write((index + 1) as u64)?;
                        report.final_cursor = index + 1;
                    }
                    self.reporter.report(SeedEvent::BatchSucceeded {
                        index,
                        attempts,
                        upserted: reply.inserted_or_updated,
                    });
                    if let Some(counts) = self.snapshot(false).await {
                        report.last_counts = Some(counts);
                    }
                }
                BatchOutcome::Failed { last_error, .. } => {
                    warn!(batch = index, queries = %batch, error = %last_error, "batch skipped");
                    self.reporter.report(SeedEvent::BatchFailed {
                        index,
                        queries: batch.clone(),
                        error: last_error.clone(),
                    });
                    report.failed.push(FailedBatch {
                        index,
                        queries: batch.clone(),
                        error: last_error,
                    });
                }
            }

            if index + 1 < total {
                self.reporter.report(SeedEvent::Waiting {
                    duration: self.settings.batch_delay,
                });
                self.clock.sleep(self.settings.batch_delay).await;
            }
        }

        if let Some(counts) = self.snapshot(true).await {
            report.last_counts = Some(counts);
        }
        info!(
            start = report.start,
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed.len(),
            cursor = report.final_cursor,
            "seed run finished"
        );
        Ok(report)
    }

    /// Reads `/admin/count`, logs it, and hands it to the reporter.
    async fn snapshot(&self, last: bool) -> Option<CatalogCounts> {
        let counts = match self.api.count().await {
            Ok(c) => {
                info!(
                    products = c.products,
                    brands = c.brands,
                    families = c.families,
                    final_snapshot = last,
                    "seed snapshot"
                );
                Some(c)
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), final_snapshot = last, "count unavailable");
                None
            }
        };
        self.reporter.report(SeedEvent::Snapshot {
            at: self.clock.now(),
            counts: counts.clone(),
            last,
        });
        counts
    }
}

/// Picks the batch list: a batches file, a named strategy, or `[seed].batches`.
pub fn resolve_batches(
    config: &Config,
    batches_file: Option<&Path>,
    strategy: Option<&str>,
    batch_size: usize,
) -> Result<Vec<String>> {
    let batches = match (batches_file, strategy) {
        (Some(_), Some(_)) => bail!("--batches-file and --strategy are mutually exclusive"),
        (Some(path), None) => terms::load_batches_file(path)?,
        (None, Some(name)) => terms::group_batches(&terms::strategy_terms(name)?, batch_size),
        (None, None) => config.seed.batches.clone(),
    };
    if batches.is_empty() {
        bail!("no batches to seed (set [seed].batches, --batches-file, or --strategy)");
    }
    Ok(batches)
}

/// CLI entry point for `ferretero seed`.
pub async fn run_seed(
    config: &Config,
    batches: Vec<String>,
    reset: bool,
    mode: ProgressMode,
) -> Result<()> {
    let api = HttpAdminClient::from_config(config)?;
    let store = FileCursorStore::new(&config.seed.cursor_path);
    if reset {
        store.clear()?;
        info!(path = %store.path().display(), "cursor reset");
    }

    let reporter = mode.reporter();
    let clock = SystemClock;
    let driver = LoopDriver::new(
        &api,
        &store,
        &clock,
        reporter.as_ref(),
        SeedSettings::from(&config.seed),
    );
    let report = driver.run(&batches).await?;
    print!("{}", render_report(&report));
    Ok(())
}

/// Formats the run summary printed on stdout.
pub fn render_report(report: &SeedReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "seed {} batches (started at {})\n",
        report.total, report.start
    ));
    out.push_str(&format!("  processed:  {}\n", report.processed));
    out.push_str(&format!("  succeeded:  {}\n", report.succeeded));
    out.push_str(&format!("  upserted:   {}\n", report.upserted));
    out.push_str(&format!("  cursor:     {}\n", report.final_cursor));
    match &report.last_counts {
        Some(c) => out.push_str(&format!(
            "  catalog:    products={} brands={} families={}\n",
            c.products, c.brands, c.families
        )),
        None => out.push_str("  catalog:    (count unavailable)\n"),
    }
    if report.failed.is_empty() {
        out.push_str("ok\n");
        return out;
    }
    out.push_str(&format!("  failed:     {}\n", report.failed.len()));
    for f in &report.failed {
        out.push_str(&format!("    #{} [{}] {}\n", f.index, f.queries, f.error));
    }
    out.push_str(&format!(
        "partial (re-run resumes at batch {})\n",
        report.final_cursor
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin_client::Reading;
    use crate::clock::ManualClock;
    use crate::cursor::MemoryCursorStore;
    use crate::models::{BackfillParams, BackfillReply, CatalogCounts};
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted admin API: each batch fails its first `fail_times` calls
    /// (`u32::MAX` for always).
    #[derive(Default)]
    struct FakeAdmin {
        fail_times: HashMap<String, u32>,
        reject: Vec<String>,
        count_down: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeAdmin {
        fn failing(mut self, batch: &str, times: u32) -> Self {
            self.fail_times.insert(batch.to_string(), times);
            self
        }

        fn rejecting(mut self, batch: &str) -> Self {
            self.reject.push(batch.to_string());
            self
        }

        fn without_count(mut self) -> Self {
            self.count_down = true;
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn calls_for(&self, batch: &str) -> usize {
            self.calls().iter().filter(|c| *c == batch).count()
        }
    }

    #[async_trait]
    impl AdminApi for FakeAdmin {
        async fn seed_basic(&self, queries: &str) -> Result<SeedReply> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(queries.to_string());
            let seen = calls.iter().filter(|c| *c == queries).count() as u32;
            drop(calls);

            if seen <= self.fail_times.get(queries).copied().unwrap_or(0) {
                bail!("503 Service Unavailable");
            }
            Ok(SeedReply {
                ok: !self.reject.iter().any(|r| r == queries),
                inserted_or_updated: 2,
                queries: terms::split_batch(queries),
                failed: Vec::new(),
            })
        }

        async fn count(&self) -> Result<CatalogCounts> {
            if self.count_down {
                bail!("/admin/count returned 404 Not Found");
            }
            Ok(CatalogCounts {
                brands: 1,
                families: 1,
                products: self.calls().len() as i64,
            })
        }

        async fn count_missing_ean(&self) -> Result<i64> {
            Ok(0)
        }

        async fn backfill_ean_loop(&self, params: BackfillParams) -> Result<BackfillReply> {
            Ok(BackfillReply {
                ok: true,
                dry: params.dry,
                runs: Vec::new(),
                updated_total: 0,
            })
        }

        async fn read_endpoint(&self, _endpoint: &str, _params: &[(&str, String)]) -> Reading {
            Reading::Unavailable("not scripted".into())
        }
    }

    /// Keeps every event for inspection.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<SeedEvent>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<SeedEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl SeedReporter for Recorder {
        fn report(&self, event: SeedEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn settings() -> SeedSettings {
        SeedSettings {
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            batch_delay: Duration::from_secs(20),
        }
    }

    fn batches(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("term{}a,term{}b", i, i)).collect()
    }

    async fn run(api: &FakeAdmin, store: &MemoryCursorStore, clock: &ManualClock, list: &[String]) -> SeedReport {
        LoopDriver::new(api, store, clock, &NoProgress, settings())
            .run(list)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn full_run_persists_cursor_equal_to_batch_count() {
        let api = FakeAdmin::default();
        let store = MemoryCursorStore::new();
        let clock = ManualClock::default();
        let list = batches(4);

        let report = run(&api, &store, &clock, &list).await;
        assert_eq!(store.current(), Some(4));
        assert_eq!(store.writes(), vec![1, 2, 3, 4]);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.final_cursor, 4);
        assert_eq!(report.upserted, 8);
        // delays only between batches
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(20); 3]);
    }

    #[tokio::test]
    async fn absent_cursor_starts_at_zero() {
        let api = FakeAdmin::default();
        let store = MemoryCursorStore::new();
        let clock = ManualClock::default();
        let list = batches(2);

        let report = run(&api, &store, &clock, &list).await;
        assert_eq!(report.start, 0);
        assert_eq!(api.calls()[0], list[0]);
    }

    #[tokio::test]
    async fn resumes_from_stored_cursor() {
        let api = FakeAdmin::default();
        let store = MemoryCursorStore::starting_at(5);
        let clock = ManualClock::default();
        let list = batches(11);

        let report = run(&api, &store, &clock, &list).await;
        assert_eq!(report.start, 5);
        assert_eq!(report.processed, 6);
        assert_eq!(api.calls(), list[5..].to_vec());
        assert_eq!(store.current(), Some(11));
    }

    #[tokio::test]
    async fn failed_batch_blocks_cursor_and_rerun_resumes_there() {
        let list = batches(5);
        let api = FakeAdmin::default().failing(&list[2], u32::MAX);
        let store = MemoryCursorStore::new();
        let clock = ManualClock::default();

        let report = run(&api, &store, &clock, &list).await;
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].index, 2);
        assert!(report.failed[0].error.contains("503"));
        assert_eq!(store.current(), Some(2));
        assert_eq!(report.final_cursor, 2);
        // later batches still ran
        assert_eq!(api.calls_for(&list[4]), 1);

        let healed = FakeAdmin::default();
        let rerun = run(&healed, &store, &clock, &list).await;
        assert_eq!(rerun.start, 2);
        assert_eq!(healed.calls()[0], list[2]);
        assert_eq!(store.current(), Some(5));
    }

    #[tokio::test]
    async fn retries_never_exceed_max_attempts() {
        let list = batches(1);
        let api = FakeAdmin::default().failing(&list[0], u32::MAX);
        let clock = ManualClock::default();

        let runner = BatchRunner::new(&api, &clock, &NoProgress, 3, Duration::from_secs(5));
        let outcome = runner.run(0, &list[0]).await;
        assert!(matches!(outcome, BatchOutcome::Failed { attempts: 3, .. }));
        assert_eq!(api.calls_for(&list[0]), 3);
        // no delay after the last attempt
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5); 2]);
    }

    #[tokio::test]
    async fn transient_failure_recovers_within_budget() {
        let list = batches(1);
        let api = FakeAdmin::default().failing(&list[0], 2);
        let clock = ManualClock::default();

        let runner = BatchRunner::new(&api, &clock, &NoProgress, 3, Duration::from_secs(5));
        let outcome = runner.run(0, &list[0]).await;
        assert_eq!(outcome.attempts(), 3);
        assert!(matches!(outcome, BatchOutcome::Succeeded { .. }));
    }

    #[tokio::test]
    async fn ok_false_counts_as_failure() {
        let list = batches(1);
        let api = FakeAdmin::default().rejecting(&list[0]);
        let clock = ManualClock::default();

        let runner = BatchRunner::new(&api, &clock, &NoProgress, 2, Duration::from_secs(1));
        match runner.run(0, &list[0]).await {
            BatchOutcome::Failed {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("ok=false"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cursor_past_end_does_nothing() {
        let api = FakeAdmin::default();
        let store = MemoryCursorStore::starting_at(9);
        let clock = ManualClock::default();

        let report = run(&api, &store, &clock, &batches(3)).await;
        assert_eq!(report.processed, 0);
        assert!(api.calls().is_empty());
        assert!(store.writes().is_empty());
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn resolve_prefers_explicit_sources() {
        let mut cfg = Config::minimal();
        assert!(resolve_batches(&cfg, None, None, 5).is_err());

        cfg.seed.batches = vec!["broca,disco".into()];
        assert_eq!(
            resolve_batches(&cfg, None, None, 5).unwrap(),
            vec!["broca,disco"]
        );

        let brands = resolve_batches(&cfg, None, Some("brands"), 10).unwrap();
        assert_eq!(brands.len(), 2);
        assert!(brands[0].starts_with("bosch,makita"));
    }

    #[tokio::test]
    async fn attempts_are_stamped_by_the_injected_clock() {
        let list = batches(1);
        let api = FakeAdmin::default().failing(&list[0], u32::MAX);
        let clock = ManualClock::default();
        let recorder = Recorder::default();

        BatchRunner::new(&api, &clock, &recorder, 3, Duration::from_secs(5))
            .run(0, &list[0])
            .await;

        let attempts: Vec<(u32, DateTime<Utc>)> = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SeedEvent::Attempt { attempt, at, max_attempts, .. } => {
                    assert_eq!(max_attempts, 3);
                    Some((attempt, at))
                }
                _ => None,
            })
            .collect();
        let t = |secs| DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(secs);
        assert_eq!(attempts, vec![(1, t(0)), (2, t(5)), (3, t(10))]);

        let failures: Vec<u32> = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SeedEvent::AttemptFailed { attempt, error, .. } => {
                    assert!(error.contains("503"));
                    Some(attempt)
                }
                _ => None,
            })
            .collect();
        assert_eq!(failures, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn success_stops_attempts_and_is_reported() {
        let list = batches(1);
        let api = FakeAdmin::default().failing(&list[0], 1);
        let clock = ManualClock::default();
        let recorder = Recorder::default();

        BatchRunner::new(&api, &clock, &recorder, 3, Duration::from_secs(5))
            .run(0, &list[0])
            .await;

        let kinds: Vec<&str> = recorder
            .events()
            .iter()
            .map(|e| match e {
                SeedEvent::Attempt { .. } => "attempt",
                SeedEvent::AttemptFailed { .. } => "failed",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["attempt", "failed", "attempt"]);
    }

    #[tokio::test]
    async fn report_carries_final_counts_without_a_reporter() {
        let api = FakeAdmin::default();
        let store = MemoryCursorStore::starting_at(5);
        let clock = ManualClock::default();

        let report = run(&api, &store, &clock, &batches(11)).await;
        let counts = report.last_counts.clone().unwrap();
        assert_eq!(counts.products, 6);

        let text = render_report(&report);
        assert!(text.contains("catalog:    products=6 brands=1 families=1"), "{}", text);
        assert!(text.ends_with("ok\n"));
    }

    #[tokio::test]
    async fn snapshots_follow_each_success_and_the_end() {
        let list = batches(3);
        let api = FakeAdmin::default().failing(&list[1], u32::MAX);
        let store = MemoryCursorStore::new();
        let clock = ManualClock::default();
        let recorder = Recorder::default();

        LoopDriver::new(&api, &store, &clock, &recorder, settings())
            .run(&list)
            .await
            .unwrap();

        let snapshots: Vec<bool> = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SeedEvent::Snapshot { last, counts, .. } => {
                    assert!(counts.is_some());
                    Some(last)
                }
                _ => None,
            })
            .collect();
        assert_eq!(snapshots, vec![false, false, true]);
    }

    #[tokio::test]
    async fn unreadable_count_is_reported_as_unavailable() {
        let api = FakeAdmin::default().without_count();
        let store = MemoryCursorStore::new();
        let clock = ManualClock::default();

        let report = run(&api, &store, &clock, &batches(2)).await;
        assert_eq!(report.succeeded, 2);
        assert!(report.last_counts.is_none());
        assert!(render_report(&report).contains("catalog:    (count unavailable)"));
    }
}
