//! Search-term generation and batching for the seeding loop.
//!
//! A batch is a comma-separated list of terms, the unit the seeding endpoint
//! accepts in one `queries=` parameter. Batches come from the config, from a
//! batches file, or from one of the named strategies below grouped into
//! fixed-size chunks.

use anyhow::{bail, Context, Result};
use std::path::Path;

const TOOLS: &[&str] = &[
    // power tools
    "taladro", "atornillador", "sierra", "calar", "radial", "amoladora", "lijadora",
    "fresadora", "router", "caladora", "ingletadora",
    // hand tools
    "llave", "destornillador", "alicate", "martillo", "nivel", "escuadra", "flexometro",
    "metro", "regla",
    // accessories
    "broca", "punta", "disco", "hoja", "mecha", "corona", "vaso", "dado", "extension",
    "carraca",
    // fixings
    "tornillo", "tuerca", "arandela", "clavo", "taco", "anclaje", "remache", "espárrago",
    "tirafondo",
    // brands
    "bosch", "makita", "dewalt", "milwaukee", "metabo", "festool", "stanley", "irwin",
    "wiha", "wera", "tivoly", "ruko",
];

const MATERIALS: &[&str] = &["metal", "madera", "hormigon", "plastico"];

const BRANDS: &[&str] = &[
    "bosch", "makita", "dewalt", "milwaukee", "metabo", "festool", "stanley", "irwin", "wiha",
    "wera", "tivoly", "ruko", "asein", "bahco", "facom", "gedore", "knipex", "stabila", "fein",
];

/// Names accepted by [`strategy_terms`].
pub const STRATEGIES: &[&str] = &["tools", "brands", "ngrams"];

/// Splits a batch descriptor into its trimmed, non-empty terms.
pub fn split_batch(batch: &str) -> Vec<String> {
    batch
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Generates the term list of a named strategy.
///
/// - `tools`: every tool term, each followed by its four material variants
/// - `brands`: known tool brands
/// - `ngrams`: the 26 letters, then every two-letter combination
pub fn strategy_terms(name: &str) -> Result<Vec<String>> {
    let terms = match name {
        "tools" => TOOLS
            .iter()
            .flat_map(|t| {
                std::iter::once(t.to_string())
                    .chain(MATERIALS.iter().map(move |m| format!("{} {}", t, m)))
            })
            .collect(),
        "brands" => BRANDS.iter().map(|b| b.to_string()).collect(),
        "ngrams" => {
            let alpha = 'a'..='z';
            alpha
                .clone()
                .map(String::from)
                .chain(alpha.clone().flat_map(|a| {
                    ('a'..='z').map(move |b| format!("{}{}", a, b))
                }))
                .collect()
        }
        other => bail!(
            "unknown term strategy '{}' (expected one of: {})",
            other,
            STRATEGIES.join(", ")
        ),
    };
    Ok(terms)
}

/// Groups terms into comma-joined batches of at most `size` terms.
pub fn group_batches(terms: &[String], size: usize) -> Vec<String> {
    terms
        .chunks(size.max(1))
        .map(|chunk| chunk.join(","))
        .collect()
}

/// Reads a batches file: one batch per line, blank lines and `#` comments
/// ignored. A line with no terms is an error.
pub fn load_batches_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batches file: {}", path.display()))?;
    parse_batches(&content).with_context(|| format!("Invalid batches file: {}", path.display()))
}

fn parse_batches(content: &str) -> Result<Vec<String>> {
    let mut batches = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let terms = split_batch(line);
        if terms.is_empty() {
            bail!("line {} has no search terms", lineno + 1);
        }
        batches.push(terms.join(","));
    }
    Ok(batches)
}
