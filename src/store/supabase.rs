//! Supabase/PostgREST store: rows are POSTed as a JSON array and merged on the
//! conflict column by the server.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{validate_identifier, MarketRow, UpsertStore};

const MERGE_PREFER: &str = "resolution=merge-duplicates,return=minimal";

pub struct SupabaseStore {
    client: Client,
    rest_base: Url,
    api_key: String,
}

impl SupabaseStore {
    pub fn new(project_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base = format!("{}/rest/v1/", project_url.trim().trim_end_matches('/'));
        let rest_base =
            Url::parse(&base).with_context(|| format!("invalid SUPABASE_URL {project_url:?}"))?;
        let client = Client::builder()
            .user_agent(concat!("market-ingest/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("building supabase http client")?;
        Ok(Self {
            client,
            rest_base,
            api_key: api_key.into(),
        })
    }

    fn table_url(&self, table: &str) -> Result<Url> {
        validate_identifier(table)?;
        Ok(self.rest_base.join(table)?)
    }

    async fn check(resp: Response, what: &str) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(300).collect();
        bail!("{what} failed: HTTP {status}: {snippet}");
    }
}

#[async_trait]
impl UpsertStore for SupabaseStore {
    async fn upsert(&self, table: &str, rows: &[MarketRow], conflict_key: &str) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        validate_identifier(conflict_key)?;
        let mut url = self.table_url(table)?;
        url.query_pairs_mut().append_pair("on_conflict", conflict_key);

        let resp = self
            .client
            .post(url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", MERGE_PREFER)
            .json(rows)
            .send()
            .await
            .with_context(|| format!("upsert into {table}"))?;
        Self::check(resp, &format!("upsert into {table}")).await?;
        debug!(target: "writer", table, rows = rows.len(), "supabase upsert ok");
        Ok(rows.len() as u64)
    }

    async fn check_table(&self, table: &str) -> Result<()> {
        let mut url = self.table_url(table)?;
        url.query_pairs_mut()
            .append_pair("select", "item_key")
            .append_pair("limit", "1");
        let resp = self
            .client
            .get(url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("reading {table}"))?;
        let resp = Self::check(resp, &format!("reading {table}")).await?;
        let sample: Vec<Value> = resp
            .json()
            .await
            .context("table check response was not a JSON array")?;
        debug!(target: "writer", table, sample = sample.len(), "supabase table readable");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "supabase"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::source::tests::serve_once;
    use chrono::Utc;

    fn rows() -> Vec<MarketRow> {
        vec![MarketRow {
            item_key: "Widget|Factory New".into(),
            name_base: "Widget".into(),
            stattrak: false,
            souvenir: false,
            condition: Some("Factory New".into()),
            price_whitemarket: None,
            qty_whitemarket: 2,
            fetched_at: Utc::now(),
        }]
    }

    #[tokio::test]
    async fn upsert_posts_merge_request() {
        let (base, server) = serve_once("201 Created", Vec::new()).await;
        let store =
            SupabaseStore::new(&format!("{base}/"), "service-key", Duration::from_secs(5))
                .unwrap();
        let written = store.upsert("market_data", &rows(), "item_key").await.unwrap();
        assert_eq!(written, 1);

        let request = server.await.unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /rest/v1/market_data?on_conflict=item_key "));
        assert!(lower.contains("apikey: service-key"));
        assert!(lower.contains("authorization: bearer service-key"));
        assert!(lower.contains("prefer: resolution=merge-duplicates,return=minimal"));
    }

    #[tokio::test]
    async fn upsert_surfaces_http_errors() {
        let body = br#"{"message":"permission denied"}"#.to_vec();
        let (base, server) = serve_once("401 Unauthorized", body).await;
        let store = SupabaseStore::new(&base, "anon", Duration::from_secs(5)).unwrap();
        let err = store.upsert("market_data", &rows(), "item_key").await.unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("401"));
        assert!(msg.contains("permission denied"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn check_table_reads_one_row() {
        let (base, server) = serve_once("200 OK", b"[]".to_vec()).await;
        let store = SupabaseStore::new(&base, "anon", Duration::from_secs(5)).unwrap();
        store.check_table("market_data").await.unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /rest/v1/market_data?select=item_key&limit=1 "));
    }
}
