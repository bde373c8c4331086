//! Fuzzy product search.
//!
//! Products are indexed in an FTS5 table with the `trigram` tokenizer, so
//! any term of three or more characters matches as a case-insensitive
//! substring of the name, brand, description, or synonyms. Every such term
//! must match; hits are ranked by `bm25`. Queries whose terms are all shorter
//! than three characters fall back to a `LIKE` scan over name, brand, and
//! synonyms.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::get::{summary_from_row, SUMMARY_JOINS, SUMMARY_SELECT};
use crate::models::SearchHit;

/// Shortest query (in characters, after trimming) that is searched at all.
pub const MIN_QUERY_CHARS: usize = 2;
const TRIGRAM: usize = 3;

/// Core search function returning structured data (used by CLI and server).
pub async fn search_products(pool: &SqlitePool, query: &str, limit: i64) -> Result<Vec<SearchHit>> {
    let query = query.trim();
    if query.chars().count() < MIN_QUERY_CHARS {
        return Ok(Vec::new());
    }
    let limit = limit.max(1);

    match build_match_expression(query) {
        Some(expr) => fetch_trigram_hits(pool, &expr, limit).await,
        None => fetch_like_hits(pool, query, limit).await,
    }
}

/// CLI entry point: runs a search and prints ranked results.
pub async fn run_search(config: &Config, query: &str, limit: Option<i64>) -> Result<()> {
    let limit = limit
        .unwrap_or(config.search.default_limit)
        .clamp(1, config.search.max_limit);

    let pool = db::connect(config).await?;
    let hits = search_products(&pool, query, limit).await?;
    pool.close().await;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let p = &hit.product;
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            hit.score,
            p.marca.as_deref().unwrap_or("-"),
            p.nombre
        );
        if let Some(ref fam) = p.familia {
            match p.subfamilia {
                Some(ref sub) => println!("    familia: {} > {}", fam, sub),
                None => println!("    familia: {}", fam),
            }
        }
        if let Some(ref ean) = p.ean {
            println!("    ean: {}", ean);
        }
        if let Some(pvp) = p.pvp {
            println!("    pvp: {:.2}", pvp);
        }
        println!("    id: {}", p.id);
        println!();
    }

    Ok(())
}

/// Builds an FTS5 expression requiring every term of at least three
/// characters. Terms are quoted so punctuation is matched literally.
fn build_match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .filter(|t| t.chars().count() >= TRIGRAM)
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

async fn fetch_trigram_hits(pool: &SqlitePool, expr: &str, limit: i64) -> Result<Vec<SearchHit>> {
    let sql = format!(
        r#"{} , bm25(products_fts) AS rank
        FROM products_fts
        JOIN products p ON p.id = products_fts.product_id
        {}
        WHERE products_fts MATCH ?
        ORDER BY rank ASC, p.id ASC
        LIMIT ?"#,
        SUMMARY_SELECT, SUMMARY_JOINS
    );

    let rows = sqlx::query(&sql)
        .bind(expr)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = sqlx::Row::get(row, "rank");
            SearchHit {
                product: summary_from_row(row),
                score: -rank, // negate so higher = better
            }
        })
        .collect())
}

async fn fetch_like_hits(pool: &SqlitePool, query: &str, limit: i64) -> Result<Vec<SearchHit>> {
    let pattern = format!("%{}%", escape_like(query));
    let sql = format!(
        r#"{}
        FROM products p
        {}
        WHERE p.name LIKE ?1 ESCAPE '\'
           OR b.name LIKE ?1 ESCAPE '\'
           OR EXISTS (SELECT 1 FROM product_synonyms s
                      WHERE s.product_id = p.id AND s.term LIKE ?1 ESCAPE '\')
        ORDER BY p.name ASC, p.id ASC
        LIMIT ?2"#,
        SUMMARY_SELECT, SUMMARY_JOINS
    );

    let rows = sqlx::query(&sql)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| SearchHit {
            product: summary_from_row(row),
            score: 0.0,
        })
        .collect())
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
