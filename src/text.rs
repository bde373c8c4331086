//! Cleanup of provider text.
//!
//! Product names and descriptions arrive with HTML entities (`&aacute;`),
//! JSON-style escapes written out literally (`est\u00e1ndar`), and UTF-8 that
//! was decoded as Latin-1 somewhere upstream (`BrocÃ¡`). [`normalize_text`]
//! repairs all three and tidies whitespace; it runs on every upsert, and
//! [`repair_catalog_text`] applies it to rows already stored.

use anyhow::Result;
use quick_xml::escape::{resolve_html5_entity, unescape_with};
use regex::Regex;
use sqlx::SqlitePool;
use std::borrow::Cow;
use std::sync::LazyLock;
use tracing::info;

use crate::config::Config;
use crate::{db, ingest};

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});")
        .expect("regex for HTML entities")
});

static U_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\u([0-9a-fA-F]{4})").expect("regex for \\u escapes"));

static BLANKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("regex for blank runs"));

static NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("regex for blank lines"));

/// UTF-8 sequences as they read when decoded as Latin-1/Windows-1252.
/// Three-character forms come first so their two-character prefixes do not
/// match early.
const MOJIBAKE: &[(&str, &str)] = &[
    ("â€“", "–"),
    ("â€”", "—"),
    ("â€œ", "“"),
    ("â€\u{9d}", "”"),
    ("â€™", "’"),
    ("â€˜", "‘"),
    ("â€¢", "•"),
    ("â€¦", "…"),
    ("â‚¬", "€"),
    ("Ã¡", "á"),
    ("Ã©", "é"),
    ("Ã\u{ad}", "í"),
    ("Ã³", "ó"),
    ("Ãº", "ú"),
    ("Ã\u{81}", "Á"),
    ("Ã‰", "É"),
    ("Ã\u{8d}", "Í"),
    ("Ã“", "Ó"),
    ("Ãš", "Ú"),
    ("Ã±", "ñ"),
    ("Ã‘", "Ñ"),
    ("Ã¼", "ü"),
    ("Ãœ", "Ü"),
    ("Ã§", "ç"),
    ("Ã\u{a0}", "à"),
    ("Ã¨", "è"),
    ("Â¿", "¿"),
    ("Â¡", "¡"),
    ("Âº", "º"),
    ("Âª", "ª"),
    ("Â°", "°"),
    ("Â·", "·"),
    ("Â½", "½"),
    ("Ã˜", "Ø"),
];

/// Replaces HTML entities with their characters. Unknown or malformed
/// entities (and bare `&`) are left as written.
pub fn unescape_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }
    ENTITY.replace_all(s, |caps: &regex::Captures| {
        let raw = &caps[0];
        match unescape_with(raw, resolve_html5_entity) {
            Ok(text) => text.into_owned(),
            Err(_) => raw.to_string(),
        }
    })
}

/// Turns literal `\uXXXX` escapes into characters. Lone surrogates are kept
/// as written.
pub fn unescape_u_sequences(s: &str) -> Cow<'_, str> {
    U_ESCAPE.replace_all(s, |caps: &regex::Captures| {
        u32::from_str_radix(&caps[1], 16)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    })
}

/// Repairs common mojibake from UTF-8 read as Latin-1.
pub fn fix_mojibake(s: &str) -> Cow<'_, str> {
    if !s.contains(['Ã', 'Â', 'â']) {
        return Cow::Borrowed(s);
    }
    let mut out = s.to_string();
    for (broken, fixed) in MOJIBAKE {
        if out.contains(broken) {
            out = out.replace(broken, fixed);
        }
    }
    Cow::Owned(out)
}

/// Full cleanup: entities, `\u` escapes, mojibake, then whitespace
/// (CRLF to LF, runs of blanks to one space, at most one empty line, trimmed).
pub fn normalize_text(s: &str) -> String {
    let s = unescape_entities(s);
    let s = unescape_u_sequences(&s);
    let s = fix_mojibake(&s);
    let s = s.replace("\r\n", "\n").replace('\r', "\n");
    let s = BLANKS.replace_all(&s, " ");
    let s = NEWLINES.replace_all(&s, "\n\n");
    s.trim().to_string()
}

/// Result of a stored-text repair pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepairSummary {
    pub scanned: u64,
    pub changed: u64,
}

/// Normalizes name and description of up to `limit` stored products that
/// look damaged (`\u` escapes, mojibake markers, or entities). With `dry`
/// nothing is written and `changed` counts the rows that would change.
pub async fn repair_catalog_text(pool: &SqlitePool, limit: i64, dry: bool) -> Result<RepairSummary> {
    let rows: Vec<(i64, String, Option<String>)> = sqlx::query_as(
        r#"
        SELECT id, name, description FROM products
        WHERE name LIKE '%\u%' OR description LIKE '%\u%'
           OR name LIKE '%Ã%' OR description LIKE '%Ã%'
           OR name LIKE '%Â%' OR description LIKE '%Â%'
           OR name LIKE '%â€%' OR description LIKE '%â€%'
           OR name LIKE '%&%;%' OR description LIKE '%&%;%'
        ORDER BY id
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut summary = RepairSummary {
        scanned: rows.len() as u64,
        changed: 0,
    };

    let mut tx = pool.begin().await?;
    for (id, name, description) in rows {
        let new_name = normalize_text(&name);
        let new_description = description
            .as_deref()
            .map(normalize_text)
            .filter(|d| !d.is_empty());
        if new_name == name && new_description == description {
            continue;
        }
        summary.changed += 1;
        if dry || new_name.is_empty() {
            continue;
        }

        sqlx::query("UPDATE products SET name = ?, description = ? WHERE id = ?")
            .bind(&new_name)
            .bind(&new_description)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        ingest::refresh_search_row(&mut *tx, id).await?;
    }
    tx.commit().await?;

    info!(scanned = summary.scanned, changed = summary.changed, dry, "text repair pass");
    Ok(summary)
}

/// CLI entry point for `ferretero repair-text`.
pub async fn run_repair_text(config: &Config, limit: i64, dry: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let summary = repair_catalog_text(&pool, limit, dry).await?;
    let verb = if dry { "would change" } else { "changed" };
    println!("Scanned {} products, {} {}.", summary.scanned, verb, summary.changed);
    pool.close().await;
    Ok(())
}
