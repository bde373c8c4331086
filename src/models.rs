//! Core data models used throughout the catalog service and its tools.
//!
//! Provider records flow in through [`crate::provider`], are upserted by
//! [`crate::ingest`], and come back out as the JSON shapes below through the
//! HTTP server and the admin client. Types that cross the wire derive both
//! `Serialize` and `Deserialize` so server and client share one definition.

use serde::{Deserialize, Serialize};

/// One `<referencia>` of a provider record.
///
/// A record lists one reference per sellable unit (single item, blister,
/// box); `description`, `quantity` and `packaging` carry the provider's
/// free-text hints about which one it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderReference {
    /// Manufacturer reference code (`<ref>`), stored as the product SKU.
    pub code: Option<String>,
    pub ean: Option<String>,
    pub pvp: Option<f64>,
    pub description: Option<String>,
    pub quantity: Option<String>,
    pub packaging: Option<String>,
}

/// One `<ficha>` parsed from a provider response, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderRecord {
    pub daterium_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub brand_logo: Option<String>,
    pub family: Option<String>,
    pub subfamily: Option<String>,
    pub thumb: Option<String>,
    pub img280: Option<String>,
    pub img500: Option<String>,
    pub references: Vec<ProviderReference>,
}

impl ProviderRecord {
    /// Largest available image: 500x500, then 280x240, then the thumbnail.
    pub fn primary_image(&self) -> Option<&str> {
        self.img500
            .as_deref()
            .or(self.img280.as_deref())
            .or(self.thumb.as_deref())
    }

    /// All image URLs in ascending size order, deduplicated.
    pub fn image_urls(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = Vec::new();
        for url in [&self.thumb, &self.img280, &self.img500].into_iter().flatten() {
            if !urls.contains(&url.as_str()) {
                urls.push(url);
            }
        }
        urls
    }

    /// Price of the first priced reference.
    pub fn pvp(&self) -> Option<f64> {
        self.references.iter().find_map(|r| r.pvp)
    }

    /// First non-empty reference code.
    pub fn sku(&self) -> Option<&str> {
        self.references
            .iter()
            .filter_map(|r| r.code.as_deref())
            .map(str::trim)
            .find(|c| !c.is_empty())
    }
}

/// Row counts of the catalog tables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogCounts {
    pub brands: i64,
    pub families: i64,
    pub products: i64,
}

/// A product as listed by `/admin/recent` and `/search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSummary {
    pub id: i64,
    pub daterium_id: i64,
    pub nombre: String,
    pub marca: Option<String>,
    pub familia: Option<String>,
    pub subfamilia: Option<String>,
    pub ean: Option<String>,
    pub pvp: Option<f64>,
    pub img: Option<String>,
}

/// A search hit: a product summary with its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub product: ProductSummary,
    pub score: f64,
}

/// Full product view returned by `/products/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub summary: ProductSummary,
    pub description: Option<String>,
    pub sku: Option<String>,
    pub source: String,
    pub images: Vec<ProductImage>,
    pub eans: Vec<ProductEan>,
    pub synonyms: Vec<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductImage {
    pub url: String,
    pub is_primary: bool,
}

/// One barcode of a product with the packaging it identifies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductEan {
    pub ean: String,
    pub packaging_type: String,
    pub quantity: i64,
    pub is_primary: bool,
}

/// One row of the `ingest_cursor` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestStat {
    pub strategy: String,
    pub cursor_key: String,
    pub updated_at: String,
}

/// One row of the `ingest_log` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestLogRow {
    pub ts: String,
    pub strategy: String,
    pub item_key: String,
    pub rows: i64,
    pub ok: bool,
    pub note: Option<String>,
}

/// Response of `POST /admin/seed_basic`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedReply {
    pub ok: bool,
    #[serde(default)]
    pub inserted_or_updated: u64,
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default)]
    pub failed: Vec<String>,
}

/// Parameters of one server-side EAN backfill request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BackfillParams {
    pub batch: u32,
    pub loops: u32,
    pub pause_ms: u64,
    pub dry: bool,
}

impl Default for BackfillParams {
    fn default() -> Self {
        Self {
            batch: 200,
            loops: 1,
            pause_ms: 150,
            dry: false,
        }
    }
}

/// Summary of one backfill iteration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackfillRun {
    #[serde(rename = "loop")]
    pub loop_index: u32,
    pub scanned: u64,
    pub found: u64,
    pub updated: u64,
    pub errors: u64,
    pub remaining: i64,
}

/// Response of `POST /admin/backfill_ean_loop`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillReply {
    pub ok: bool,
    pub dry: bool,
    pub runs: Vec<BackfillRun>,
    pub updated_total: u64,
}
