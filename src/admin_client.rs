//! Client side of the catalog admin API.
//!
//! The operator tools never touch the database; they drive a running catalog
//! service through its `/admin` endpoints. [`AdminApi`] is the seam between
//! the tools and the transport so the seeding and monitor loops can be tested
//! against a fake.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::Config;
use crate::models::{BackfillParams, BackfillReply, CatalogCounts, SeedReply};

/// Result of polling an endpoint whose absence is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// 2xx with a JSON body.
    Available(Value),
    /// Non-2xx status, transport error, or non-JSON body; carries the reason.
    Unavailable(String),
}

#[async_trait]
pub trait AdminApi: Send + Sync {
    /// `POST /admin/seed_basic?queries=<batch>`. Errors on transport
    /// failure, non-2xx status, or an undecodable body; an `ok: false` reply
    /// is returned as-is.
    async fn seed_basic(&self, queries: &str) -> Result<SeedReply>;

    /// `GET /admin/count`.
    async fn count(&self) -> Result<CatalogCounts>;

    /// `GET /admin/count_missing_ean`.
    async fn count_missing_ean(&self) -> Result<i64>;

    /// `POST /admin/backfill_ean_loop`.
    async fn backfill_ean_loop(&self, params: BackfillParams) -> Result<BackfillReply>;

    /// `GET /admin/<endpoint>` with extra query parameters, for display only.
    async fn read_endpoint(&self, endpoint: &str, params: &[(&str, String)]) -> Reading;
}

/// [`AdminApi`] over HTTP with reqwest.
pub struct HttpAdminClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct CountReply {
    counts: CatalogCounts,
}

#[derive(Deserialize)]
struct MissingReply {
    missing: i64,
}

impl HttpAdminClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ferretero/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Builds a client from `[client]` and `[admin]`.
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.admin.token.is_empty() {
            bail!("admin.token is not set (config or MIGRATION_TOKEN)");
        }
        Self::new(
            &config.client.base_url,
            &config.admin.token,
            Duration::from_secs(config.client.timeout_secs),
        )
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/admin/{}", self.base_url, endpoint)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder, endpoint: &str) -> Result<T> {
        let resp = req
            .query(&[("token", self.token.as_str())])
            .send()
            .await
            .with_context(|| format!("request to /admin/{} failed", endpoint))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "/admin/{} returned {}: {}",
                endpoint,
                status,
                truncate(&body, 200)
            );
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("invalid JSON from /admin/{}", endpoint))
    }
}

#[async_trait]
impl AdminApi for HttpAdminClient {
    async fn seed_basic(&self, queries: &str) -> Result<SeedReply> {
        let req = self
            .client
            .post(self.url("seed_basic"))
            .query(&[("queries", queries)]);
        self.send_json(req, "seed_basic").await
    }

    async fn count(&self) -> Result<CatalogCounts> {
        let req = self.client.get(self.url("count"));
        let reply: CountReply = self.send_json(req, "count").await?;
        Ok(reply.counts)
    }

    async fn count_missing_ean(&self) -> Result<i64> {
        let req = self.client.get(self.url("count_missing_ean"));
        let reply: MissingReply = self.send_json(req, "count_missing_ean").await?;
        Ok(reply.missing)
    }

    async fn backfill_ean_loop(&self, params: BackfillParams) -> Result<BackfillReply> {
        let req = self.client.post(self.url("backfill_ean_loop")).query(&[
            ("batch", params.batch.to_string()),
            ("loops", params.loops.to_string()),
            ("pause_ms", params.pause_ms.to_string()),
            ("dry", params.dry.to_string()),
        ]);
        self.send_json(req, "backfill_ean_loop").await
    }

    async fn read_endpoint(&self, endpoint: &str, params: &[(&str, String)]) -> Reading {
        let req = self.client.get(self.url(endpoint)).query(params);
        match self.send_json::<Value>(req, endpoint).await {
            Ok(v) => Reading::Available(v),
            Err(e) => Reading::Unavailable(format!("{:#}", e)),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
