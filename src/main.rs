use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use market_ingest::config::{IngestConfig, StoreBackend};
use market_ingest::feed::{FeedSource, FileFeedSource, HttpFeedSource};
use market_ingest::pipeline::{collect_items, run_ingest, IngestError};
use market_ingest::store::{PgStore, SupabaseStore, UpsertStore};
use market_ingest::tracing::{init_tracing, DEFAULT_FILTER};
use market_ingest::util::{db::Db, env as env_util};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "market-ingest", version, about = "Marketplace feed ingestion CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    // Allow `market-ingest --batch-size 200` without the explicit `run` subcommand.
    // If a subcommand is present, these args are ignored.
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch, aggregate and upsert the feed (default when no command supplied)
    Run(RunArgs),
    /// Fetch and aggregate without writing; prints items as JSON lines
    Preview(PreviewArgs),
    /// Verify the destination store is reachable and the table readable
    Check(StoreArgs),
}

#[derive(Debug, Default, Args)]
struct FeedArgs {
    /// Feed URL (overrides WHITEMARKET_URL)
    #[arg(long)]
    feed_url: Option<String>,
    /// Read the feed from a local file (plain or gzip) instead of HTTP
    #[arg(long, conflicts_with = "feed_url")]
    file: Option<PathBuf>,
}

#[derive(Debug, Default, Args)]
struct StoreArgs {
    /// Store backend (overrides INGEST_STORE)
    #[arg(long, value_enum)]
    store: Option<StoreBackend>,
    /// Destination table (overrides SUPABASE_MARKET_TABLE)
    #[arg(long)]
    table: Option<String>,
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    #[command(flatten)]
    feed: FeedArgs,
    #[command(flatten)]
    store: StoreArgs,
    /// Rows per upsert request (overrides SUPABASE_UPSERT_BATCH)
    #[arg(long)]
    batch_size: Option<usize>,
}

#[derive(Debug, Args)]
struct PreviewArgs {
    #[command(flatten)]
    feed: FeedArgs,
    /// Number of items to print
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

impl FeedArgs {
    fn apply(&self, cfg: &mut IngestConfig) {
        if let Some(url) = &self.feed_url {
            cfg.feed_url = url.clone();
        }
    }
}

impl StoreArgs {
    fn apply(&self, cfg: &mut IngestConfig) {
        if let Some(store) = self.store {
            cfg.store = store;
        }
        if let Some(table) = &self.table {
            cfg.table = table.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing(DEFAULT_FILTER)?;
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; stopping at the next record or chunk boundary");
                cancel.cancel();
            }
        });
    }

    match cli.command.unwrap_or(Command::Run(cli.run)) {
        Command::Run(args) => run(args, &cancel).await,
        Command::Preview(args) => preview(args, &cancel).await,
        Command::Check(args) => check(args).await,
    }
}

fn feed_source(cfg: &IngestConfig, file: Option<&PathBuf>) -> Result<Box<dyn FeedSource>> {
    if let Some(path) = file {
        return Ok(Box::new(FileFeedSource::new(path)));
    }
    let source = HttpFeedSource::new(
        cfg.feed_url.clone(),
        cfg.bearer_token.clone(),
        cfg.connect_timeout,
        cfg.read_timeout,
    )?;
    Ok(Box::new(source))
}

async fn connect_store(cfg: &IngestConfig) -> Result<Box<dyn UpsertStore>> {
    cfg.validate_store()?;
    match cfg.store {
        StoreBackend::Postgres => {
            let url = cfg
                .database_url
                .as_deref()
                .context("no database url configured")?;
            let db = Db::connect(url, cfg.db_max_conns).await?;
            Ok(Box::new(PgStore::new(db)))
        }
        StoreBackend::Supabase => {
            let (Some(url), Some(key)) = (cfg.supabase_url.as_deref(), cfg.supabase_key.clone())
            else {
                anyhow::bail!("supabase credentials missing");
            };
            let store = SupabaseStore::new(url, key, cfg.read_timeout)?;
            Ok(Box::new(store))
        }
    }
}

async fn run(args: RunArgs, cancel: &CancellationToken) -> Result<()> {
    let mut cfg = IngestConfig::from_env()?;
    args.feed.apply(&mut cfg);
    args.store.apply(&mut cfg);
    if let Some(batch_size) = args.batch_size {
        cfg.batch_size = batch_size;
    }
    cfg.validate()?;
    cfg.log_snapshot();

    let source = feed_source(&cfg, args.feed.file.as_ref())?;
    let store = connect_store(&cfg).await?;
    let started = std::time::Instant::now();

    match run_ingest(
        source.as_ref(),
        store.as_ref(),
        &cfg.ingest_options(),
        Utc::now(),
        cancel,
    )
    .await
    {
        Ok(report) => {
            info!(
                rows_written = report.rows_written,
                items = report.items,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "run complete"
            );
            Ok(())
        }
        Err(err) => {
            error!(rows_written = err.rows_written(), error = %err, "run failed");
            if let IngestError::Feed(_) = err {
                return Err(err).context("feed could not be read; nothing was written");
            }
            Err(err.into())
        }
    }
}

async fn preview(args: PreviewArgs, cancel: &CancellationToken) -> Result<()> {
    let mut cfg = IngestConfig::from_env()?;
    args.feed.apply(&mut cfg);
    let source = feed_source(&cfg, args.feed.file.as_ref())?;

    let (items, report) = collect_items(source.as_ref(), Utc::now(), cancel).await?;
    for item in items.iter().take(args.limit) {
        println!("{}", serde_json::to_string(item)?);
    }
    info!(
        shape = report.shape.as_deref().unwrap_or("-"),
        records = report.records_seen,
        unroutable = report.unroutable,
        items = report.items,
        shown = items.len().min(args.limit),
        "preview complete"
    );
    Ok(())
}

async fn check(args: StoreArgs) -> Result<()> {
    env_util::preflight_check(
        "market-ingest check",
        &[],
        &[
            "INGEST_STORE",
            "SUPABASE_MARKET_TABLE",
            "DATABASE_URL",
            "SUPABASE_DB_URL",
            "SUPABASE_URL",
            "SUPABASE_SERVICE_ROLE",
            "SUPABASE_ANON_KEY",
        ],
    )?;
    let mut cfg = IngestConfig::from_env()?;
    args.apply(&mut cfg);
    let store = connect_store(&cfg).await?;
    store
        .check_table(&cfg.table)
        .await
        .with_context(|| format!("{} store check of {} failed", store.name(), cfg.table))?;
    info!(store = store.name(), table = %cfg.table, "store reachable");
    Ok(())
}
