//! EAN/GTIN code handling.
//!
//! Provider records carry EANs in free text with inconsistent separators, and
//! one record may list several codes (unit, pack, box). These helpers clean
//! the candidates, tell which packaging each one identifies, and pick the
//! one the catalog shows as the product's code.

use crate::models::{ProviderRecord, ProviderReference};

/// Preference order when a product has several valid codes.
const PREFERRED_LENGTHS: [usize; 4] = [13, 14, 12, 8];

/// Cleans an EAN candidate.
///
/// Accepts digits optionally separated by spaces or dashes, starting with a
/// digit. After removing separators the code must be 8, 12, 13, or 14 digits
/// long; anything else yields `None`.
pub fn normalize_ean(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let first = trimmed.chars().next()?;
    if !first.is_ascii_digit() {
        return None;
    }
    if trimmed.len() < 7 || trimmed.len() > 21 {
        return None;
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || c == ' ' || c == '-')
    {
        return None;
    }

    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if PREFERRED_LENGTHS.contains(&digits.len()) {
        Some(digits)
    } else {
        None
    }
}

/// Every valid, distinct EAN found in the records' references, in order of
/// appearance.
pub fn extract_eans(records: &[ProviderRecord]) -> Vec<String> {
    packaged_eans(records).into_iter().map(|p| p.ean).collect()
}

/// Sellable unit a barcode identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackagingType {
    Unit,
    Pack,
    Box,
    Pallet,
}

impl PackagingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackagingType::Unit => "unit",
            PackagingType::Pack => "pack",
            PackagingType::Box => "box",
            PackagingType::Pallet => "pallet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packaging {
    pub kind: PackagingType,
    pub quantity: i64,
}

impl Default for Packaging {
    fn default() -> Self {
        Self {
            kind: PackagingType::Unit,
            quantity: 1,
        }
    }
}

/// A valid EAN with the packaging of the reference that listed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedEan {
    pub ean: String,
    pub packaging: Packaging,
}

const PALLET_WORDS: &[&str] = &["pallet", "palet", "pale"];
const BOX_WORDS: &[&str] = &["caja", "cajas", "box", "carton", "cartón"];
const PACK_WORDS: &[&str] = &["pack", "packs", "blister", "blíster", "blist"];

/// Guesses the packaging from the reference's code, description, quantity and
/// packaging texts. The largest container named wins ("pack 10 uds" is a
/// pack of 10); its quantity is the number written next to the keyword, else
/// a numeric quantity field, else 1. Nothing recognizable means a single unit.
pub fn detect_packaging(reference: &ProviderReference) -> Packaging {
    let text = [
        &reference.code,
        &reference.description,
        &reference.quantity,
        &reference.packaging,
    ]
    .into_iter()
    .flatten()
    .map(|s| s.to_lowercase())
    .collect::<Vec<_>>()
    .join(" ");
    let tokens = tokenize(&text);

    let kinds = [
        (PackagingType::Pallet, PALLET_WORDS),
        (PackagingType::Box, BOX_WORDS),
        (PackagingType::Pack, PACK_WORDS),
    ];
    for (kind, words) in kinds {
        if let Some(pos) = tokens.iter().position(|t| words.contains(&t.as_str())) {
            let quantity = adjacent_number(&tokens, pos)
                .or_else(|| plain_number(reference.quantity.as_deref()))
                .unwrap_or(1);
            return Packaging { kind, quantity };
        }
    }

    Packaging::default()
}

/// Every valid, distinct EAN of the records with its packaging. When the
/// same code appears twice, the first reference wins.
pub fn packaged_eans(records: &[ProviderRecord]) -> Vec<PackagedEan> {
    let mut out: Vec<PackagedEan> = Vec::new();
    for record in records {
        for reference in &record.references {
            let Some(ean) = reference.ean.as_deref().and_then(normalize_ean) else {
                continue;
            };
            if out.iter().any(|p| p.ean == ean) {
                continue;
            }
            out.push(PackagedEan {
                ean,
                packaging: detect_packaging(reference),
            });
        }
    }
    out
}

/// Splits into runs of letters and runs of digits ("pack10" → "pack", "10").
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut digits = false;
    for c in text.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        let is_digit = c.is_ascii_digit();
        if !current.is_empty() && is_digit != digits {
            tokens.push(std::mem::take(&mut current));
        }
        digits = is_digit;
        current.push(c);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn adjacent_number(tokens: &[String], pos: usize) -> Option<i64> {
    let after = tokens.get(pos + 1).and_then(|t| plain_number(Some(t)));
    let before = pos
        .checked_sub(1)
        .and_then(|i| tokens.get(i))
        .and_then(|t| plain_number(Some(t)));
    after.or(before)
}

fn plain_number(s: Option<&str>) -> Option<i64> {
    s?.trim().parse::<i64>().ok().filter(|n| *n > 0)
}

/// Picks the code to store: EAN-13 first, then 14, then 12, then 8.
pub fn prefer_ean(eans: &[String]) -> Option<String> {
    PREFERRED_LENGTHS
        .iter()
        .find_map(|len| eans.iter().find(|e| e.len() == *len))
        .or_else(|| eans.first())
        .cloned()
}
