//! feed-relay: binary entrypoint.
//! Loads settings, wires the pipeline components, then runs one cycle or loops.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_relay::enrich::EnrichmentClient;
use feed_relay::fetch::{ContentFetcher, HttpPageFetcher};
use feed_relay::notify::dry_run::DryRunMessenger;
use feed_relay::notify::telegram::TelegramMessenger;
use feed_relay::notify::{DeliveryClient, Messenger};
use feed_relay::{DedupStore, DryRunStore, Orchestrator, Settings, SqliteDedupStore};

#[derive(Debug, Parser)]
#[command(name = "feed-relay", version, about = "Relay new feed items as translated TLDRs")]
struct Cli {
    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,

    /// Run the full pipeline but send nothing and record nothing.
    #[arg(long)]
    dry_run: bool,

    /// Settings file (defaults to $RELAY_CONFIG_PATH, then config/relay.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Compact logs by default, JSON when RELAY_LOG_JSON=1.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feed_relay=info,warn"));
    let json = std::env::var("RELAY_LOG_JSON").is_ok_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real environment wins.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let retry = settings.retry_policy();
    let timeout = settings.http_timeout();

    let real_store: Arc<dyn DedupStore> = Arc::new(
        SqliteDedupStore::open(&settings.state_db_path)
            .with_context(|| format!("opening {}", settings.state_db_path.display()))?,
    );
    let overlay = cli.dry_run.then(|| Arc::new(DryRunStore::new(real_store.clone())));
    let store: Arc<dyn DedupStore> = match &overlay {
        Some(o) => o.clone() as Arc<dyn DedupStore>,
        None => real_store,
    };

    let messenger: Arc<dyn Messenger> = if cli.dry_run {
        Arc::new(DryRunMessenger::new())
    } else {
        Arc::new(
            TelegramMessenger::new(&settings.telegram.api_base, settings.telegram.bot_token.clone(), timeout)
                .context("building Telegram client")?,
        )
    };

    let pages = HttpPageFetcher::new(timeout).context("building article HTTP client")?;
    let enrichment = EnrichmentClient::new(
        settings.completion_backend()?,
        settings.enrichment_options(),
        retry,
    );

    let delivery = DeliveryClient::new(messenger, retry);
    tracing::info!(
        dry_run = cli.dry_run,
        once = cli.once,
        groups = settings.groups.len(),
        forum = settings.forum.enabled,
        completions = enrichment.backend_name(),
        messenger = delivery.messenger_name(),
        "feed-relay starting"
    );

    let mut orchestrator = Orchestrator::new(
        store,
        ContentFetcher::new(Arc::new(pages), retry),
        enrichment,
        delivery,
    )
    .with_groups(settings.source_groups()?)
    .with_policy(settings.content_policy()?)
    .with_destinations(settings.destinations())
    .with_hashtags(settings.source_hashtags.clone());
    if let Some(dir) = &settings.output_dir {
        orchestrator = orchestrator.with_output_dir(dir);
    }

    let lookback = settings.lookback();
    let max_items = settings.max_items_per_run;
    if cli.once {
        let report = orchestrator.run_cycle(lookback, max_items).await?;
        tracing::info!(
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "single cycle done"
        );
        if let Some(o) = &overlay {
            tracing::info!(would_record = o.pending().len(), "[dry-run] nothing was persisted");
        }
        return Ok(());
    }

    tokio::select! {
        res = orchestrator.run_forever(settings.poll_interval(), lookback, max_items) => {
            res.context("poll loop stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }
    Ok(())
}
