//! Server-side EAN backfill.
//!
//! Products stored without an EAN are looked up again at the provider (by
//! searching for their provider id) and the preferred code among the
//! returned references is written back. Work is bounded per request by
//! `batch` and `loops`; rows are walked by ascending id so a product with no
//! EAN upstream is not rescanned within the same request.
//!
//! [`run_backfill_ean`] is the operator side: it triggers the loop on a
//! running service through the admin API and prints the per-loop summary.

use anyhow::Result;
use sqlx::SqlitePool;
use std::io::Write;
use std::time::Duration;
use tracing::{info, warn};

use crate::admin_client::{AdminApi, HttpAdminClient};
use crate::config::Config;
use crate::ean::{packaged_eans, prefer_ean};
use crate::ingest::{log_ingest, store_eans};
use crate::models::{BackfillParams, BackfillReply, BackfillRun, ProviderRecord};
use crate::provider::CatalogProvider;
use crate::stats::count_missing_ean;

pub const BACKFILL_STRATEGY: &str = "backfill_ean";

pub async fn run_backfill_loop(
    pool: &SqlitePool,
    provider: &dyn CatalogProvider,
    params: BackfillParams,
) -> Result<BackfillReply> {
    let batch = params.batch.max(1) as i64;
    let mut last_id = 0i64;
    let mut runs = Vec::new();
    let mut updated_total = 0u64;

    for loop_index in 1..=params.loops.max(1) {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT id, daterium_id FROM products WHERE ean IS NULL AND id > ? ORDER BY id ASC LIMIT ?",
        )
        .bind(last_id)
        .bind(batch)
        .fetch_all(pool)
        .await?;

        if rows.is_empty() {
            break;
        }

        let mut run = BackfillRun {
            loop_index,
            scanned: rows.len() as u64,
            found: 0,
            updated: 0,
            errors: 0,
            remaining: 0,
        };

        for (id, daterium_id) in &rows {
            last_id = *id;
            let records = match provider.search(&daterium_id.to_string()).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(product_id = id, daterium_id, error = %e, "backfill lookup failed");
                    run.errors += 1;
                    continue;
                }
            };

            let eans = packaged_eans(matching_records(&records, *daterium_id));
            let codes: Vec<String> = eans.iter().map(|p| p.ean.clone()).collect();
            let Some(ean) = prefer_ean(&codes) else {
                continue;
            };
            run.found += 1;

            if params.dry {
                continue;
            }

            let mut tx = pool.begin().await?;
            let changed = sqlx::query(
                "UPDATE products SET ean = ?, updated_at = ? WHERE id = ? AND ean IS NULL",
            )
            .bind(&ean)
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            // zero rows: another writer filled the code first
            if changed > 0 {
                store_eans(&mut *tx, *id, &eans, Some(&ean)).await?;
                run.updated += 1;
            }
            tx.commit().await?;
        }

        run.remaining = count_missing_ean(pool).await?;
        updated_total += run.updated;

        let note = format!(
            "scanned={} found={} errors={}{}",
            run.scanned,
            run.found,
            run.errors,
            if params.dry { " dry" } else { "" }
        );
        log_ingest(
            pool,
            BACKFILL_STRATEGY,
            &format!("loop {}", loop_index),
            run.updated as i64,
            run.errors == 0,
            Some(&note),
        )
        .await?;
        info!(
            loop_index,
            scanned = run.scanned,
            found = run.found,
            updated = run.updated,
            remaining = run.remaining,
            "backfill loop done"
        );

        runs.push(run);

        if loop_index < params.loops && params.pause_ms > 0 {
            tokio::time::sleep(Duration::from_millis(params.pause_ms)).await;
        }
    }

    Ok(BackfillReply {
        ok: true,
        dry: params.dry,
        runs,
        updated_total,
    })
}

/// Records for `daterium_id` when the response names it; otherwise every
/// record, since a search by id may return fichas keyed by catalog id.
fn matching_records(records: &[ProviderRecord], daterium_id: i64) -> &[ProviderRecord] {
    match records.iter().position(|r| r.daterium_id == Some(daterium_id)) {
        Some(i) => &records[i..=i],
        None => records,
    }
}

/// Triggers one remote backfill request and writes a report to `out`:
/// missing count before, one line per loop, missing count after.
pub async fn drive_remote_backfill(
    api: &dyn AdminApi,
    params: BackfillParams,
    out: &mut dyn Write,
) -> Result<BackfillReply> {
    let before = api.count_missing_ean().await?;
    writeln!(out, "missing EAN before: {}", before)?;
    writeln!(
        out,
        "backfill batch={} loops={} pause_ms={}{}",
        params.batch,
        params.loops,
        params.pause_ms,
        if params.dry { " (dry run)" } else { "" }
    )?;

    let reply = api.backfill_ean_loop(params).await?;
    writeln!(
        out,
        "  {:>4} {:>8} {:>6} {:>8} {:>6} {:>10}",
        "LOOP", "SCANNED", "FOUND", "UPDATED", "ERRORS", "REMAINING"
    )?;
    for run in &reply.runs {
        writeln!(
            out,
            "  {:>4} {:>8} {:>6} {:>8} {:>6} {:>10}",
            run.loop_index, run.scanned, run.found, run.updated, run.errors, run.remaining
        )?;
    }
    writeln!(out, "updated total: {}", reply.updated_total)?;

    let after = api.count_missing_ean().await?;
    writeln!(out, "missing EAN after: {}", after)?;
    Ok(reply)
}

/// CLI entry point for `ferretero backfill-ean`.
pub async fn run_backfill_ean(config: &Config, params: BackfillParams) -> Result<()> {
    let api = HttpAdminClient::from_config(config)?;
    let mut stdout = std::io::stdout();
    drive_remote_backfill(&api, params, &mut stdout).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::ingest;
    use crate::models::ProviderReference;
    use crate::provider::StaticProvider;
    use tempfile::TempDir;

    async fn test_pool(tmp: &TempDir) -> SqlitePool {
        let mut cfg = Config::minimal();
        cfg.db.path = tmp.path().join("catalog.sqlite");
        let pool = db::connect(&cfg).await.unwrap();
        crate::migrate::apply_schema(&pool).await.unwrap();
        pool
    }

    fn bare(id: i64) -> ProviderRecord {
        ProviderRecord {
            daterium_id: Some(id),
            name: format!("Producto {}", id),
            ..Default::default()
        }
    }

    fn with_eans(id: i64, eans: &[&str]) -> ProviderRecord {
        ProviderRecord {
            references: eans
                .iter()
                .map(|e| ProviderReference {
                    ean: Some(e.to_string()),
                    pvp: None,
                    ..Default::default()
                })
                .collect(),
            ..bare(id)
        }
    }

    fn provider() -> StaticProvider {
        StaticProvider::new()
            .with_records("1", vec![with_eans(1, &["12345678", "8412345678901"])])
            .with_records("2", vec![bare(2)])
            .with_failure("3")
    }

    fn params(dry: bool) -> BackfillParams {
        BackfillParams {
            batch: 10,
            loops: 3,
            pause_ms: 0,
            dry,
        }
    }

    #[tokio::test]
    async fn writes_preferred_ean_and_counts_errors() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        ingest::ingest_records(&pool, &[bare(1), bare(2), bare(3)], "dump.xml")
            .await
            .unwrap();

        let reply = run_backfill_loop(&pool, &provider(), params(false))
            .await
            .unwrap();
        assert!(reply.ok);
        assert_eq!(reply.updated_total, 1);
        // keyset walk: the second loop finds nothing past the last id
        assert_eq!(reply.runs.len(), 1);
        let run = &reply.runs[0];
        assert_eq!((run.scanned, run.found, run.updated, run.errors), (3, 1, 1, 1));
        assert_eq!(run.remaining, 2);

        let ean: Option<String> =
            sqlx::query_scalar("SELECT ean FROM products WHERE daterium_id = 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(ean.as_deref(), Some("8412345678901"));

        let logged: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM ingest_log WHERE strategy = 'backfill_ean'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(logged, 1);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        ingest::ingest_records(&pool, &[bare(1)], "dump.xml")
            .await
            .unwrap();

        let reply = run_backfill_loop(&pool, &provider(), params(true))
            .await
            .unwrap();
        assert!(reply.dry);
        assert_eq!(reply.updated_total, 0);
        assert_eq!(reply.runs[0].found, 1);
        assert_eq!(count_missing_ean(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn batch_bounds_each_loop() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        ingest::ingest_records(&pool, &[bare(1), bare(2), bare(3)], "dump.xml")
            .await
            .unwrap();

        let reply = run_backfill_loop(
            &pool,
            &provider(),
            BackfillParams {
                batch: 2,
                loops: 5,
                pause_ms: 0,
                dry: false,
            },
        )
        .await
        .unwrap();
        let scanned: Vec<u64> = reply.runs.iter().map(|r| r.scanned).collect();
        assert_eq!(scanned, vec![2, 1]);
    }

    #[tokio::test]
    async fn backfilled_codes_land_in_the_ean_table() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        ingest::ingest_records(&pool, &[bare(1)], "dump.xml")
            .await
            .unwrap();

        run_backfill_loop(&pool, &provider(), params(false))
            .await
            .unwrap();

        let rows: Vec<(String, bool)> = sqlx::query_as(
            "SELECT ean, is_primary FROM product_eans ORDER BY is_primary DESC, ean",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(
            rows,
            vec![
                ("8412345678901".to_string(), true),
                ("12345678".to_string(), false),
            ]
        );
    }

    /// Fills the product's EAN itself while the lookup is in flight.
    struct RacingProvider {
        pool: SqlitePool,
        inner: StaticProvider,
    }

    #[async_trait::async_trait]
    impl CatalogProvider for RacingProvider {
        fn name(&self) -> &str {
            "racing"
        }

        async fn search(&self, term: &str) -> Result<Vec<ProviderRecord>> {
            sqlx::query("UPDATE products SET ean = '40000001' WHERE daterium_id = ?")
                .bind(term.parse::<i64>()?)
                .execute(&self.pool)
                .await?;
            self.inner.search(term).await
        }
    }

    #[tokio::test]
    async fn a_row_filled_concurrently_is_not_counted_as_updated() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        ingest::ingest_records(&pool, &[bare(1)], "dump.xml")
            .await
            .unwrap();

        let racing = RacingProvider {
            pool: pool.clone(),
            inner: provider(),
        };
        let reply = run_backfill_loop(&pool, &racing, params(false))
            .await
            .unwrap();
        let run = &reply.runs[0];
        assert_eq!((run.found, run.updated), (1, 0));
        assert_eq!(reply.updated_total, 0);

        let ean: Option<String> =
            sqlx::query_scalar("SELECT ean FROM products WHERE daterium_id = 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(ean.as_deref(), Some("40000001"));
        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM product_eans")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stored, 0);
    }
}
