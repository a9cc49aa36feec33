use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Used when `RUST_LOG` is unset: our own targets at info, sqlx statement logs muted.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Sets up the global tracing subscriber with a fmt formatter and env filter.
///
/// `default_filter` applies only when `RUST_LOG` is not set. Stage targets
/// (`feed.source`, `feed.parser`, `aggregate`, `writer`) can be tuned
/// individually, e.g. `RUST_LOG=info,feed.parser=debug`.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
