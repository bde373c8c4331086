//! Catalog statistics and ingestion overview.
//!
//! The queries here back both `ferretero stats` and the read-only admin
//! endpoints (`/admin/count`, `/admin/recent`, `/admin/ingest_stats`,
//! `/admin/ingest_log`, `/admin/progress`, `/admin/tables`,
//! `/admin/count_missing_ean`).

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::get::{format_ts_iso, summary_from_row, SUMMARY_JOINS, SUMMARY_SELECT};
use crate::models::{CatalogCounts, IngestLogRow, IngestStat, ProductSummary};

pub async fn catalog_counts(pool: &SqlitePool) -> Result<CatalogCounts> {
    let row = sqlx::query(
        r#"
        SELECT (SELECT COUNT(*) FROM brands)   AS brands,
               (SELECT COUNT(*) FROM families) AS families,
               (SELECT COUNT(*) FROM products) AS products
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(CatalogCounts {
        brands: row.get("brands"),
        families: row.get("families"),
        products: row.get("products"),
    })
}

/// Most recently inserted products, newest first.
pub async fn recent_products(pool: &SqlitePool, limit: i64) -> Result<Vec<ProductSummary>> {
    let sql = format!(
        "{} FROM products p {} ORDER BY p.id DESC LIMIT ?",
        SUMMARY_SELECT, SUMMARY_JOINS
    );
    let rows = sqlx::query(&sql).bind(limit).fetch_all(pool).await?;
    Ok(rows.iter().map(summary_from_row).collect())
}

/// Every ingest cursor, most recently moved first.
pub async fn ingest_stats(pool: &SqlitePool) -> Result<Vec<IngestStat>> {
    let rows = sqlx::query(
        "SELECT strategy, cursor_key, updated_at FROM ingest_cursor ORDER BY updated_at DESC, strategy ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| IngestStat {
            strategy: row.get("strategy"),
            cursor_key: row.get("cursor_key"),
            updated_at: format_ts_iso(row.get("updated_at")),
        })
        .collect())
}

/// Latest audit rows, newest first.
pub async fn ingest_log(pool: &SqlitePool, limit: i64) -> Result<Vec<IngestLogRow>> {
    let rows = sqlx::query(
        "SELECT ts, strategy, item_key, rows, ok, note FROM ingest_log ORDER BY ts DESC, id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(log_row).collect())
}

pub async fn latest_ingest(pool: &SqlitePool) -> Result<Option<IngestLogRow>> {
    Ok(ingest_log(pool, 1).await?.into_iter().next())
}

fn log_row(row: &SqliteRow) -> IngestLogRow {
    IngestLogRow {
        ts: format_ts_iso(row.get("ts")),
        strategy: row.get("strategy"),
        item_key: row.get("item_key"),
        rows: row.get("rows"),
        ok: row.get("ok"),
        note: row.get("note"),
    }
}

/// Names of the user tables in the catalog database.
pub async fn list_tables(pool: &SqlitePool) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT name FROM sqlite_master
        WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE 'products_fts_%'
        ORDER BY name
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(names)
}

pub async fn count_missing_ean(pool: &SqlitePool) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE ean IS NULL")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let counts = catalog_counts(&pool).await?;
    let missing = count_missing_ean(&pool).await?;
    let images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM product_images")
        .fetch_one(&pool)
        .await?;
    let cursors = ingest_stats(&pool).await?;
    let latest = latest_ingest(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Ferretero — Catalog Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Brands:      {}", counts.brands);
    println!("  Families:    {}", counts.families);
    println!("  Products:    {}", counts.products);
    println!("  Images:      {}", images);
    println!(
        "  With EAN:    {} / {} ({}%)",
        counts.products - missing,
        counts.products,
        if counts.products > 0 {
            ((counts.products - missing) * 100) / counts.products
        } else {
            0
        }
    );

    if !cursors.is_empty() {
        println!();
        println!("  Ingest cursors:");
        println!("  {:<16} {:<32} {}", "STRATEGY", "CURSOR", "UPDATED");
        println!("  {}", "-".repeat(72));
        for c in &cursors {
            println!("  {:<16} {:<32} {}", c.strategy, c.cursor_key, c.updated_at);
        }
    }

    if let Some(row) = latest {
        println!();
        println!(
            "  Last ingest: {} {} {} ({} rows, {})",
            row.ts,
            row.strategy,
            row.item_key,
            row.rows,
            if row.ok { "ok" } else { "failed" }
        );
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest;
    use crate::models::{ProviderRecord, ProviderReference};
    use tempfile::TempDir;

    async fn test_pool(tmp: &TempDir) -> SqlitePool {
        let mut cfg = Config::minimal();
        cfg.db.path = tmp.path().join("catalog.sqlite");
        let pool = db::connect(&cfg).await.unwrap();
        crate::migrate::apply_schema(&pool).await.unwrap();
        pool
    }

    fn record(id: i64, ean: Option<&str>) -> ProviderRecord {
        ProviderRecord {
            daterium_id: Some(id),
            name: format!("Producto {}", id),
            brand: Some("Bahco".into()),
            family: Some("Llaves".into()),
            subfamily: Some("Llaves fijas".into()),
            references: vec![ProviderReference {
                ean: ean.map(str::to_string),
                pvp: None,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn counts_and_missing_ean() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        ingest::ingest_records(
            &pool,
            &[record(1, Some("8412345678901")), record(2, None)],
            "dump.xml",
        )
        .await
        .unwrap();

        let counts = catalog_counts(&pool).await.unwrap();
        assert_eq!(
            counts,
            CatalogCounts {
                brands: 1,
                families: 2,
                products: 2
            }
        );
        assert_eq!(count_missing_ean(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn recent_lists_newest_first_with_family_hierarchy() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        ingest::ingest_records(&pool, &[record(10, None), record(11, None)], "dump.xml")
            .await
            .unwrap();

        let items = recent_products(&pool, 1).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].daterium_id, 11);
        assert_eq!(items[0].familia.as_deref(), Some("Llaves"));
        assert_eq!(items[0].subfamilia.as_deref(), Some("Llaves fijas"));
    }

    #[tokio::test]
    async fn audit_views() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;
        assert!(latest_ingest(&pool).await.unwrap().is_none());

        ingest::log_ingest(&pool, "seed_basic", "broca", 3, true, None)
            .await
            .unwrap();
        let mut conn = pool.acquire().await.unwrap();
        ingest::set_cursor(&mut conn, "seed_basic", "broca").await.unwrap();
        drop(conn);

        let latest = latest_ingest(&pool).await.unwrap().unwrap();
        assert_eq!(latest.item_key, "broca");
        assert!(latest.ok);

        let stats = ingest_stats(&pool).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].cursor_key, "broca");

        let tables = list_tables(&pool).await.unwrap();
        assert!(tables.contains(&"products".to_string()));
        assert!(tables.contains(&"ingest_log".to_string()));
    }
}
