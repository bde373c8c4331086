//! Product retrieval by id.
//!
//! Fetches a product with its brand, family, images, and synonyms. Used by
//! both the `ferretero get` CLI command and `GET /products/{id}`. Also owns
//! the summary projection shared by search and the recent-items listing.

use anyhow::{bail, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::models::{ProductDetail, ProductEan, ProductImage, ProductSummary};

/// Columns of a [`ProductSummary`]. A product linked to a subfamily reports
/// the parent as `familia`; one linked to a top-level family reports no
/// `subfamilia`.
pub(crate) const SUMMARY_SELECT: &str = r#"
    SELECT p.id, p.daterium_id, p.name, p.ean, p.pvp, p.image_url, p.thumb_url,
           b.name AS brand,
           COALESCE(pf.name, f.name) AS family,
           CASE WHEN pf.id IS NULL THEN NULL ELSE f.name END AS subfamily
"#;

pub(crate) const SUMMARY_JOINS: &str = r#"
    LEFT JOIN brands b ON b.id = p.brand_id
    LEFT JOIN families f ON f.id = p.family_id
    LEFT JOIN families pf ON pf.id = f.parent_id
"#;

pub(crate) fn summary_from_row(row: &SqliteRow) -> ProductSummary {
    let image: Option<String> = row.get("image_url");
    let thumb: Option<String> = row.get("thumb_url");
    ProductSummary {
        id: row.get("id"),
        daterium_id: row.get("daterium_id"),
        nombre: row.get("name"),
        marca: row.get("brand"),
        familia: row.get("family"),
        subfamilia: row.get("subfamily"),
        ean: row.get("ean"),
        pvp: row.get("pvp"),
        img: image.or(thumb),
    }
}

/// Core get function returning structured data (used by CLI and server).
pub async fn get_product(pool: &SqlitePool, id: i64) -> Result<ProductDetail> {
    let sql = format!(
        "{} , p.description, p.sku, p.source, p.updated_at FROM products p {} WHERE p.id = ?",
        SUMMARY_SELECT, SUMMARY_JOINS
    );
    let row = match sqlx::query(&sql).bind(id).fetch_optional(pool).await? {
        Some(row) => row,
        None => bail!("product not found: {}", id),
    };

    let images = sqlx::query(
        "SELECT url, is_primary FROM product_images WHERE product_id = ? ORDER BY is_primary DESC, id ASC",
    )
    .bind(id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(|r| ProductImage {
        url: r.get("url"),
        is_primary: r.get("is_primary"),
    })
    .collect();

    let eans = sqlx::query(
        "SELECT ean, packaging_type, quantity, is_primary FROM product_eans WHERE product_id = ? ORDER BY is_primary DESC, id ASC",
    )
    .bind(id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(|r| ProductEan {
        ean: r.get("ean"),
        packaging_type: r.get("packaging_type"),
        quantity: r.get("quantity"),
        is_primary: r.get("is_primary"),
    })
    .collect();

    let synonyms: Vec<String> =
        sqlx::query_scalar("SELECT term FROM product_synonyms WHERE product_id = ? ORDER BY term")
            .bind(id)
            .fetch_all(pool)
            .await?;

    Ok(ProductDetail {
        summary: summary_from_row(&row),
        description: row.get("description"),
        sku: row.get("sku"),
        source: row.get("source"),
        images,
        eans,
        synonyms,
        updated_at: row.get("updated_at"),
    })
}

/// CLI entry point: calls get_product and prints to stdout.
pub async fn run_get(config: &Config, id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let product = get_product(&pool, id).await;
    pool.close().await;
    let p = product?;

    println!("--- Product ---");
    println!("id:           {}", p.summary.id);
    println!("daterium_id:  {}", p.summary.daterium_id);
    println!("nombre:       {}", p.summary.nombre);
    println!("marca:        {}", p.summary.marca.as_deref().unwrap_or("-"));
    println!("familia:      {}", p.summary.familia.as_deref().unwrap_or("-"));
    if let Some(ref sub) = p.summary.subfamilia {
        println!("subfamilia:   {}", sub);
    }
    println!("ean:          {}", p.summary.ean.as_deref().unwrap_or("-"));
    if let Some(ref sku) = p.sku {
        println!("sku:          {}", sku);
    }
    match p.summary.pvp {
        Some(pvp) => println!("pvp:          {:.2}", pvp),
        None => println!("pvp:          -"),
    }
    println!("source:       {}", p.source);
    println!("updated_at:   {}", format_ts_iso(p.updated_at));
    println!();

    if let Some(ref desc) = p.description {
        println!("--- Description ---");
        println!("{}", desc);
        println!();
    }

    println!("--- Images ({}) ---", p.images.len());
    for img in &p.images {
        let tag = if img.is_primary { " (primary)" } else { "" };
        println!("{}{}", img.url, tag);
    }
    println!();

    if !p.eans.is_empty() {
        println!("--- EANs ({}) ---", p.eans.len());
        for e in &p.eans {
            let tag = if e.is_primary { " (primary)" } else { "" };
            println!("{}  {} x{}{}", e.ean, e.packaging_type, e.quantity, tag);
        }
        println!();
    }

    if !p.synonyms.is_empty() {
        println!("--- Synonyms ---");
        println!("{}", p.synonyms.join(", "));
    }

    Ok(())
}

pub(crate) fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
