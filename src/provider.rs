//! Upstream catalog provider.
//!
//! The catalog is populated from Daterium's advanced-search XML endpoint. The
//! service only needs one capability from it (search by free-text term), so
//! that is all [`CatalogProvider`] exposes. [`DateriumProvider`] is the real
//! HTTP client; [`StaticProvider`] serves canned records for offline loads
//! and tests.
//!
//! # Wire format
//!
//! ```xml
//! <resultados>
//!   <ficha idcatalogo="1234">
//!     <id>98765</id>
//!     <nombre>Broca HSS 6mm</nombre>
//!     <descripcion>…</descripcion>
//!     <marca>Tivoly</marca>
//!     <familia>Brocas</familia>
//!     <subfamilia>Brocas metal</subfamilia>
//!     <thumb>…</thumb><img280x240>…</img280x240><img500x500>…</img500x500>
//!     <referencias>
//!       <referencia>
//!         <ref>TIV-0600</ref><ean>8412345678901</ean><pvp>4,95</pvp>
//!         <descripcion>Blister 2</descripcion><cantidad>2</cantidad><envase>blister</envase>
//!       </referencia>
//!     </referencias>
//!   </ficha>
//! </resultados>
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::models::{ProviderRecord, ProviderReference};

const SEARCH_PATH: &str = "/busqueda_avanzada_fc_xml.php";
const USER_AGENT: &str = concat!("ferretero/", env!("CARGO_PKG_VERSION"));

/// A source of catalog records searchable by term.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Short label used in logs and the ingest audit.
    fn name(&self) -> &str;

    /// Returns every record the provider lists for `term`.
    async fn search(&self, term: &str) -> Result<Vec<ProviderRecord>>;
}

/// HTTP client for the Daterium XML search API.
pub struct DateriumProvider {
    client: reqwest::Client,
    base_url: String,
    user_id: String,
}

impl DateriumProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        if config.user_id.trim().is_empty() {
            bail!("provider.user_id is not set (config or DATERIUM_USER_ID)");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_id: config.user_id.trim().to_string(),
        })
    }
}

#[async_trait]
impl CatalogProvider for DateriumProvider {
    fn name(&self) -> &str {
        "daterium"
    }

    async fn search(&self, term: &str) -> Result<Vec<ProviderRecord>> {
        let url = format!("{}{}", self.base_url, SEARCH_PATH);
        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/xml")
            .query(&[("userID", self.user_id.as_str()), ("searchbox", term)])
            .send()
            .await
            .with_context(|| format!("provider request failed for '{}'", term))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("provider returned {} for '{}'", status, term);
        }

        let body = resp.bytes().await?;
        parse_fichas(&body).with_context(|| format!("invalid provider XML for '{}'", term))
    }
}

/// Provider backed by a fixed term → records table.
///
/// Terms listed in `failing` return an error, which lets callers exercise
/// partial-failure paths.
#[derive(Default)]
pub struct StaticProvider {
    records: HashMap<String, Vec<ProviderRecord>>,
    failing: Vec<String>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(mut self, term: &str, records: Vec<ProviderRecord>) -> Self {
        self.records.insert(term.to_lowercase(), records);
        self
    }

    pub fn with_failure(mut self, term: &str) -> Self {
        self.failing.push(term.to_lowercase());
        self
    }
}

#[async_trait]
impl CatalogProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(&self, term: &str) -> Result<Vec<ProviderRecord>> {
        let key = term.trim().to_lowercase();
        if self.failing.contains(&key) {
            bail!("provider unavailable for '{}'", term);
        }
        Ok(self.records.get(&key).cloned().unwrap_or_default())
    }
}

/// Parses every `<ficha>` in a provider response.
///
/// Records without a `<nombre>` are dropped. The numeric id comes from the
/// `<id>` child, falling back to the `idcatalogo` attribute.
pub fn parse_fichas(xml: &[u8]) -> Result<Vec<ProviderRecord>> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut out = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();

    let mut record: Option<ProviderRecord> = None;
    let mut raw_id: Option<String> = None;
    let mut catalog_id: Option<String> = None;
    let mut reference: Option<ProviderReference> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "ficha" => {
                        record = Some(ProviderRecord::default());
                        raw_id = None;
                        catalog_id = e
                            .try_get_attribute("idcatalogo")?
                            .map(|a| a.unescape_value().map(|v| v.into_owned()))
                            .transpose()?;
                    }
                    "referencia" if record.is_some() => {
                        reference = Some(ProviderReference::default());
                    }
                    _ => {}
                }
                stack.push(name);
                text.clear();
            }
            Event::Text(t) => {
                text.push_str(&t.unescape()?);
            }
            Event::CData(c) => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Event::End(_) => {
                let name = stack.pop().unwrap_or_default();
                let value = non_empty(&text);
                text.clear();
                let parent = stack.last().map(String::as_str);

                match (name.as_str(), parent) {
                    ("ficha", _) => {
                        if let Some(mut rec) = record.take() {
                            rec.daterium_id = [raw_id.take(), catalog_id.take()]
                                .into_iter()
                                .flatten()
                                .find_map(|v| parse_id(&v));
                            if !rec.name.is_empty() {
                                out.push(rec);
                            }
                        }
                    }
                    ("referencia", _) => {
                        if let (Some(rec), Some(r)) = (record.as_mut(), reference.take()) {
                            rec.references.push(r);
                        }
                    }
                    ("ean", Some("referencia")) => {
                        if let Some(r) = reference.as_mut() {
                            r.ean = value;
                        }
                    }
                    ("pvp", Some("referencia")) => {
                        if let Some(r) = reference.as_mut() {
                            r.pvp = value.as_deref().and_then(parse_decimal);
                        }
                    }
                    (field, Some("referencia")) => {
                        if let Some(r) = reference.as_mut() {
                            match field {
                                "ref" => r.code = value,
                                "descripcion" => r.description = value,
                                "cantidad" => r.quantity = value,
                                "envase" => r.packaging = value,
                                _ => {}
                            }
                        }
                    }
                    (field, Some("ficha")) => {
                        if let Some(rec) = record.as_mut() {
                            apply_field(rec, &mut raw_id, field, value);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

fn apply_field(
    rec: &mut ProviderRecord,
    raw_id: &mut Option<String>,
    field: &str,
    value: Option<String>,
) {
    match field {
        "id" => *raw_id = value,
        "nombre" => rec.name = value.unwrap_or_default(),
        "descripcion" => {
            if value.is_some() {
                rec.description = value;
            }
        }
        "descripcioncorta" => {
            if rec.description.is_none() {
                rec.description = value;
            }
        }
        "marca" => rec.brand = value,
        "logo_marca" => rec.brand_logo = value,
        "familia" => rec.family = value,
        "subfamilia" => rec.subfamily = value,
        "thumb" => rec.thumb = value,
        "img280x240" => rec.img280 = value,
        "img500x500" => rec.img500 = value,
        _ => {}
    }
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

fn parse_id(s: &str) -> Option<i64> {
    let t = s.trim();
    if !t.is_empty() && t.chars().all(|c| c.is_ascii_digit()) {
        t.parse().ok()
    } else {
        None
    }
}

/// Parses prices written with either decimal separator (`4,95` or `4.95`).
pub fn parse_decimal(s: &str) -> Option<f64> {
    s.trim().replace(',', ".").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<resultados>
  <ficha idcatalogo="555">
    <id>98765</id>
    <nombre>Broca HSS 6mm</nombre>
    <descripcion></descripcion>
    <descripcioncorta>Broca para metal</descripcioncorta>
    <marca>Tivoly</marca>
    <logo_marca>https://img/tivoly.png</logo_marca>
    <familia>Brocas</familia>
    <subfamilia>Brocas metal</subfamilia>
    <thumb>https://img/t.jpg</thumb>
    <img500x500>https://img/l.jpg</img500x500>
    <referencias>
      <referencia>
        <ref>TIV-0600</ref>
        <descripcion>blister 2</descripcion>
        <ean>8412345678901</ean>
        <pvp>4,95</pvp>
      </referencia>
      <referencia><ean>08412345678902</ean></referencia>
    </referencias>
  </ficha>
  <ficha idcatalogo="777">
    <id>n/a</id>
    <nombre><![CDATA[Disco & corte]]></nombre>
  </ficha>
  <ficha>
    <id>1</id>
    <nombre>   </nombre>
  </ficha>
</resultados>"#;

    #[test]
    fn parses_fields_and_references() {
        let recs = parse_fichas(SAMPLE.as_bytes()).unwrap();
        assert_eq!(recs.len(), 2);

        let broca = &recs[0];
        assert_eq!(broca.daterium_id, Some(98765));
        assert_eq!(broca.name, "Broca HSS 6mm");
        assert_eq!(broca.description.as_deref(), Some("Broca para metal"));
        assert_eq!(broca.brand.as_deref(), Some("Tivoly"));
        assert_eq!(broca.subfamily.as_deref(), Some("Brocas metal"));
        assert_eq!(broca.primary_image(), Some("https://img/l.jpg"));
        assert_eq!(broca.references.len(), 2);
        assert_eq!(broca.references[0].ean.as_deref(), Some("8412345678901"));
        assert_eq!(broca.references[0].pvp, Some(4.95));
        assert_eq!(broca.references[1].pvp, None);
        assert_eq!(broca.sku(), Some("TIV-0600"));
        assert_eq!(broca.references[0].description.as_deref(), Some("blister 2"));
    }

    #[test]
    fn falls_back_to_catalog_id_attribute() {
        let recs = parse_fichas(SAMPLE.as_bytes()).unwrap();
        assert_eq!(recs[1].daterium_id, Some(777));
        assert_eq!(recs[1].name, "Disco & corte");
    }

    #[test]
    fn reference_description_does_not_leak_into_record() {
        let recs = parse_fichas(SAMPLE.as_bytes()).unwrap();
        assert_ne!(recs[0].description.as_deref(), Some("blister 2"));
    }

    #[test]
    fn empty_document_yields_nothing() {
        assert!(parse_fichas(b"<resultados/>").unwrap().is_empty());
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(parse_fichas(b"<resultados><ficha></resultados>").is_err());
    }

    #[test]
    fn decimal_comma() {
        assert_eq!(parse_decimal("12,50"), Some(12.5));
        assert_eq!(parse_decimal("abc"), None);
    }

    #[tokio::test]
    async fn static_provider_matches_case_insensitively() {
        let p = StaticProvider::new()
            .with_records(
                "Broca",
                vec![ProviderRecord {
                    name: "b".into(),
                    ..Default::default()
                }],
            )
            .with_failure("disco");
        assert_eq!(p.search("broca").await.unwrap().len(), 1);
        assert!(p.search("sierra").await.unwrap().is_empty());
        assert!(p.search("DISCO").await.is_err());
    }
}
