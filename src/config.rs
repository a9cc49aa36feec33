//! Run configuration assembled from the environment, with CLI overrides applied on top.

use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use tracing::info;

use crate::pipeline::IngestOptions;
use crate::util::env::{db_url, env_first, env_opt, env_parse, redact_value};
use crate::writer::DEFAULT_BATCH_SIZE;

pub const DEFAULT_FEED_URL: &str = "https://s3.white.market/export/v1/products/730.json";
pub const DEFAULT_TABLE: &str = "market_data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// Direct Postgres connection (DATABASE_URL).
    Postgres,
    /// Supabase REST API (SUPABASE_URL + key).
    Supabase,
}

impl StoreBackend {
    fn from_name(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "supabase" | "rest" => Ok(Self::Supabase),
            other => bail!("unknown INGEST_STORE {other:?} (expected postgres or supabase)"),
        }
    }
}

#[derive(Clone)]
pub struct IngestConfig {
    pub feed_url: String,
    pub bearer_token: Option<String>,
    pub table: String,
    pub batch_size: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_conns: u32,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
}

impl IngestConfig {
    pub fn from_env() -> Result<Self> {
        let supabase_url = env_opt("SUPABASE_URL");
        let supabase_key = env_first(&["SUPABASE_SERVICE_ROLE", "SUPABASE_ANON_KEY"]);
        let database_url = db_url();

        let store = match env_opt("INGEST_STORE") {
            Some(raw) => StoreBackend::from_name(&raw)?,
            // Prefer the REST API when only Supabase credentials are around.
            None if database_url.is_none() && supabase_url.is_some() => StoreBackend::Supabase,
            None => StoreBackend::Postgres,
        };

        Ok(Self {
            feed_url: env_opt("WHITEMARKET_URL").unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
            bearer_token: env_opt("WHITEMARKET_API_TOKEN"),
            table: env_opt("SUPABASE_MARKET_TABLE").unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            batch_size: env_parse("SUPABASE_UPSERT_BATCH", DEFAULT_BATCH_SIZE),
            connect_timeout: Duration::from_secs(env_parse("FEED_CONNECT_TIMEOUT_SECS", 30)),
            read_timeout: Duration::from_secs(env_parse("FEED_READ_TIMEOUT_SECS", 60)),
            store,
            database_url,
            db_max_conns: env_parse("DB_MAX_CONNS", 4),
            supabase_url,
            supabase_key,
        })
    }

    /// Reject settings that would only fail later, halfway through a run.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        url::Url::parse(&self.feed_url)
            .with_context(|| format!("invalid feed url {:?}", self.feed_url))?;
        crate::store::validate_identifier(&self.table)?;
        self.validate_store()
    }

    /// Only the credentials of the selected store are required.
    pub fn validate_store(&self) -> Result<()> {
        match self.store {
            StoreBackend::Postgres if self.database_url.is_none() => {
                bail!("postgres store selected but no DATABASE_URL/SUPABASE_DB_URL is set")
            }
            StoreBackend::Supabase
                if self.supabase_url.is_none() || self.supabase_key.is_none() =>
            {
                bail!(
                    "supabase store selected but SUPABASE_URL or \
                     SUPABASE_SERVICE_ROLE/SUPABASE_ANON_KEY is missing"
                )
            }
            _ => Ok(()),
        }
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            table: self.table.clone(),
            batch_size: self.batch_size,
        }
    }

    pub fn log_snapshot(&self) {
        info!(
            target: "config",
            feed_url = %redact_value("WHITEMARKET_URL", &self.feed_url),
            token = self.bearer_token.is_some(),
            table = %self.table,
            batch_size = self.batch_size,
            store = ?self.store,
            connect_timeout_secs = self.connect_timeout.as_secs(),
            read_timeout_secs = self.read_timeout.as_secs(),
            "configuration"
        );
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("IngestConfig")
            .field("feed_url", &self.feed_url)
            .field("bearer_token", &secret(&self.bearer_token))
            .field("table", &self.table)
            .field("batch_size", &self.batch_size)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("store", &self.store)
            .field(
                "database_url",
                &self
                    .database_url
                    .as_deref()
                    .map(|u| redact_value("DATABASE_URL", u)),
            )
            .field("db_max_conns", &self.db_max_conns)
            .field("supabase_url", &self.supabase_url)
            .field("supabase_key", &secret(&self.supabase_key))
            .finish()
    }
}
