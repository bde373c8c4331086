//! Ingestion pipeline.
//!
//! Turns provider records into catalog rows: text is cleaned, brand and
//! family are resolved by name (created on demand), the product is upserted
//! on its provider id, every barcode, image and synonym is attached, and the
//! product's trigram search row is rewritten. Every ingestion unit leaves an `ingest_log` row, and the last
//! processed key of each strategy is kept in `ingest_cursor`.

use anyhow::{Context, Result};
use sqlx::{SqliteConnection, SqlitePool};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db;
use crate::ean::{self, PackagedEan};
use crate::models::{ProviderRecord, SeedReply};
use crate::provider::{self, CatalogProvider, DateriumProvider};
use crate::text::normalize_text;

/// Strategy label used for seeding by search term.
pub const SEED_STRATEGY: &str = "seed_basic";

/// CLI entry point for `ferretero ingest`.
///
/// Loads either a local XML dump (`xml`) or the given terms through the
/// configured provider, then prints a summary.
pub async fn run_ingest(config: &Config, terms: Vec<String>, xml: Option<&Path>) -> Result<()> {
    let pool = db::connect(config).await?;

    if let Some(path) = xml {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read XML dump: {}", path.display()))?;
        let label = path.display().to_string();
        let written = ingest_xml(&pool, &bytes, &label).await?;

        println!("ingest {}", label);
        println!("  upserted products: {}", written);
        println!("ok");
        pool.close().await;
        return Ok(());
    }

    let terms = if terms.is_empty() {
        config.provider.default_queries.clone()
    } else {
        terms
    };
    let provider = DateriumProvider::new(&config.provider)?;
    let reply = seed_queries(&pool, &provider, &terms).await?;

    println!("ingest {}", reply.queries.join(","));
    println!("  upserted products: {}", reply.inserted_or_updated);
    if !reply.failed.is_empty() {
        println!("  failed terms: {}", reply.failed.join(", "));
    }
    println!("{}", if reply.ok { "ok" } else { "partial" });

    pool.close().await;
    Ok(())
}

/// Searches the provider for each term and upserts what it returns.
///
/// A provider failure for one term is recorded and the remaining terms still
/// run; the reply's `ok` is false when any term failed. Each term commits in
/// its own transaction.
pub async fn seed_queries(
    pool: &SqlitePool,
    provider: &dyn CatalogProvider,
    terms: &[String],
) -> Result<SeedReply> {
    let terms: Vec<String> = terms
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let mut total = 0u64;
    let mut failed = Vec::new();

    for term in &terms {
        let records = match provider.search(term).await {
            Ok(records) => records,
            Err(e) => {
                warn!(term = %term, provider = provider.name(), error = %e, "provider search failed");
                log_ingest(pool, SEED_STRATEGY, term, 0, false, Some(&e.to_string())).await?;
                failed.push(term.clone());
                continue;
            }
        };

        let mut tx = pool.begin().await?;
        let mut written = 0u64;
        for record in &records {
            if upsert_record(&mut *tx, record, Some(term)).await?.is_some() {
                written += 1;
            }
        }
        set_cursor(&mut *tx, SEED_STRATEGY, term).await?;
        tx.commit().await?;

        log_ingest(pool, SEED_STRATEGY, term, written as i64, true, None).await?;
        info!(term = %term, records = records.len(), upserted = written, "seeded term");
        total += written;
    }

    Ok(SeedReply {
        ok: failed.is_empty(),
        inserted_or_updated: total,
        queries: terms,
        failed,
    })
}

/// Parses a provider XML document and upserts every record in it.
pub async fn ingest_xml(pool: &SqlitePool, xml: &[u8], label: &str) -> Result<u64> {
    let records = provider::parse_fichas(xml)?;
    info!(label = %label, records = records.len(), "loading XML dump");
    ingest_records(pool, &records, label).await
}

/// Upserts records that did not come from a search (e.g. a local dump).
pub async fn ingest_records(pool: &SqlitePool, records: &[ProviderRecord], label: &str) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut written = 0u64;
    for record in records {
        if upsert_record(&mut *tx, record, None).await?.is_some() {
            written += 1;
        }
    }
    tx.commit().await?;

    log_ingest(pool, "xml_dump", label, written as i64, true, None).await?;
    Ok(written)
}

/// Writes one provider record. Returns the product id, or `None` when the
/// record has no provider id and was skipped.
pub async fn upsert_record(
    conn: &mut SqliteConnection,
    record: &ProviderRecord,
    synonym: Option<&str>,
) -> Result<Option<i64>> {
    let Some(daterium_id) = record.daterium_id else {
        debug!(name = %record.name, "skipping record without provider id");
        return Ok(None);
    };

    let name = normalize_text(&record.name);
    if name.is_empty() {
        debug!(daterium_id, "skipping record with blank name");
        return Ok(None);
    }

    let brand_id = match record.brand.as_deref() {
        Some(name) => Some(upsert_brand(conn, name, record.brand_logo.as_deref()).await?),
        None => None,
    };

    let parent_id = match record.family.as_deref() {
        Some(name) => Some(upsert_family(conn, name, None).await?),
        None => None,
    };
    let family_id = match record.subfamily.as_deref() {
        Some(sub) if Some(sub) != record.family.as_deref() => {
            Some(upsert_family(conn, sub, parent_id).await?)
        }
        _ => parent_id,
    };

    let description = record
        .description
        .as_deref()
        .map(normalize_text)
        .filter(|d| !d.is_empty());

    let eans = ean::packaged_eans(std::slice::from_ref(record));
    let codes: Vec<String> = eans.iter().map(|p| p.ean.clone()).collect();
    let primary_ean = ean::prefer_ean(&codes);
    let now = chrono::Utc::now().timestamp();

    let product_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO products (daterium_id, brand_id, family_id, name, description, ean, sku, pvp, thumb_url, image_url, source, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'daterium', ?, ?)
        ON CONFLICT(daterium_id) DO UPDATE SET
            name = excluded.name,
            description = COALESCE(excluded.description, products.description),
            brand_id = COALESCE(excluded.brand_id, products.brand_id),
            family_id = COALESCE(excluded.family_id, products.family_id),
            ean = COALESCE(excluded.ean, products.ean),
            sku = COALESCE(excluded.sku, products.sku),
            pvp = COALESCE(excluded.pvp, products.pvp),
            thumb_url = COALESCE(excluded.thumb_url, products.thumb_url),
            image_url = COALESCE(excluded.image_url, products.image_url),
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(daterium_id)
    .bind(brand_id)
    .bind(family_id)
    .bind(&name)
    .bind(&description)
    .bind(&primary_ean)
    .bind(record.sku())
    .bind(record.pvp())
    .bind(&record.thumb)
    .bind(record.primary_image())
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    let primary = record.primary_image();
    for url in record.image_urls() {
        sqlx::query(
            "INSERT OR IGNORE INTO product_images (product_id, url, is_primary) VALUES (?, ?, ?)",
        )
        .bind(product_id)
        .bind(url)
        .bind(Some(url) == primary)
        .execute(&mut *conn)
        .await?;
    }

    store_eans(conn, product_id, &eans, primary_ean.as_deref()).await?;

    if let Some(term) = synonym {
        add_synonym(conn, product_id, term, "seed").await?;
    }

    refresh_search_row(conn, product_id).await?;
    Ok(Some(product_id))
}

/// Records a product's barcodes. `primary` becomes the only primary code of
/// the product; without it existing flags are left alone.
pub async fn store_eans(
    conn: &mut SqliteConnection,
    product_id: i64,
    eans: &[PackagedEan],
    primary: Option<&str>,
) -> Result<()> {
    if let Some(primary) = primary {
        sqlx::query("UPDATE product_eans SET is_primary = 0 WHERE product_id = ? AND ean <> ?")
            .bind(product_id)
            .bind(primary)
            .execute(&mut *conn)
            .await?;
    }

    for item in eans {
        let is_primary = primary == Some(item.ean.as_str());
        sqlx::query(
            r#"
            INSERT INTO product_eans (product_id, ean, packaging_type, quantity, is_primary)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(product_id, ean) DO UPDATE SET
                packaging_type = excluded.packaging_type,
                quantity = excluded.quantity,
                is_primary = excluded.is_primary OR product_eans.is_primary
            "#,
        )
        .bind(product_id)
        .bind(&item.ean)
        .bind(item.packaging.kind.as_str())
        .bind(item.packaging.quantity)
        .bind(is_primary)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn upsert_brand(conn: &mut SqliteConnection, name: &str, logo_url: Option<&str>) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO brands (name, logo_url) VALUES (?, ?)
        ON CONFLICT(name) DO UPDATE SET logo_url = COALESCE(excluded.logo_url, brands.logo_url)
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(logo_url)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

async fn upsert_family(conn: &mut SqliteConnection, name: &str, parent_id: Option<i64>) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO families (name, parent_id) VALUES (?, ?)
        ON CONFLICT(name) DO UPDATE SET parent_id = COALESCE(excluded.parent_id, families.parent_id)
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(parent_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Attaches a search synonym to a product. Terms are stored lowercased.
pub async fn add_synonym(
    conn: &mut SqliteConnection,
    product_id: i64,
    term: &str,
    source: &str,
) -> Result<()> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return Ok(());
    }
    sqlx::query("INSERT OR IGNORE INTO product_synonyms (product_id, term, source) VALUES (?, ?, ?)")
        .bind(product_id)
        .bind(&term)
        .bind(source)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Rebuilds the trigram index row of one product from its current data.
pub async fn refresh_search_row(conn: &mut SqliteConnection, product_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM products_fts WHERE product_id = ?")
        .bind(product_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO products_fts (product_id, name, brand, description, synonyms)
        SELECT p.id,
               p.name,
               COALESCE(b.name, ''),
               COALESCE(p.description, ''),
               COALESCE((SELECT group_concat(s.term, ' ') FROM product_synonyms s WHERE s.product_id = p.id), '')
        FROM products p
        LEFT JOIN brands b ON b.id = p.brand_id
        WHERE p.id = ?
        "#,
    )
    .bind(product_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Appends one row to the ingest audit log.
pub async fn log_ingest(
    pool: &SqlitePool,
    strategy: &str,
    item_key: &str,
    rows: i64,
    ok: bool,
    note: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO ingest_log (ts, strategy, item_key, rows, ok, note) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(chrono::Utc::now().timestamp())
    .bind(strategy)
    .bind(item_key)
    .bind(rows)
    .bind(ok)
    .bind(note)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_cursor(conn: &mut SqliteConnection, strategy: &str, key: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO ingest_cursor (strategy, cursor_key, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(strategy) DO UPDATE SET cursor_key = excluded.cursor_key, updated_at = excluded.updated_at
        "#,
    )
    .bind(strategy)
    .bind(key)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
