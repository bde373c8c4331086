use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates every catalog and audit table. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Create brands table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS brands (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            logo_url TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create families table (a subfamily points at its family)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS families (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            parent_id INTEGER REFERENCES families(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create products table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            daterium_id INTEGER NOT NULL UNIQUE,
            brand_id INTEGER REFERENCES brands(id),
            family_id INTEGER REFERENCES families(id),
            name TEXT NOT NULL,
            description TEXT,
            ean TEXT,
            sku TEXT,
            pvp REAL,
            thumb_url TEXT,
            image_url TEXT,
            source TEXT NOT NULL DEFAULT 'daterium',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_images (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            url TEXT NOT NULL,
            is_primary INTEGER NOT NULL DEFAULT 0,
            UNIQUE(product_id, url)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Every barcode of a product; the primary one is mirrored in products.ean
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_eans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            ean TEXT NOT NULL,
            packaging_type TEXT NOT NULL DEFAULT 'unit',
            quantity INTEGER NOT NULL DEFAULT 1,
            is_primary INTEGER NOT NULL DEFAULT 0,
            UNIQUE(product_id, ean)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS product_synonyms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            term TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'seed',
            UNIQUE(product_id, term)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Audit tables
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts INTEGER NOT NULL,
            strategy TEXT NOT NULL,
            item_key TEXT NOT NULL,
            rows INTEGER NOT NULL DEFAULT 0,
            ok INTEGER NOT NULL,
            note TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_cursor (
            strategy TEXT PRIMARY KEY,
            cursor_key TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Trigram FTS5 index for fuzzy product search.
    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='products_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE products_fts USING fts5(
                product_id UNINDEXED,
                name,
                brand,
                description,
                synonyms,
                tokenize = 'trigram'
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_ean ON products(ean)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_brand_id ON products(brand_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_family_id ON products(family_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_product_images_product ON product_images(product_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_product_synonyms_product ON product_synonyms(product_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_product_eans_ean ON product_eans(ean)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ingest_log_ts ON ingest_log(ts DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
