use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use rss_ingestor::{
    config, EmailNotifier, Fetcher, FsPublisher, IngestRunner, NoopTagger, PgItemStore, RunConfig,
    SmtpConfig,
};

#[derive(Parser, Debug)]
#[command(name = "rss-ingestor", about = "Incremental RSS/Atom ingestion runner")]
struct Cli {
    /// Feeds file with one category,url pair per line.
    #[arg(long, default_value = "feeds.txt")]
    feeds: PathBuf,

    /// How many days back entries still count as new.
    #[arg(long, default_value_t = 1)]
    lookback_days: u32,

    /// Send a notification per newly persisted item.
    #[arg(long)]
    notify: bool,

    /// Notification recipient address.
    #[arg(long)]
    notify_to: Option<String>,

    /// Rebuild and publish category snapshots for touched categories.
    #[arg(long)]
    publish: bool,

    /// Directory the snapshot JSON objects are published into.
    #[arg(long, default_value = "snapshots")]
    snapshot_dir: PathBuf,

    /// Worker pool size for concurrent feed pipelines.
    #[arg(long, default_value_t = config::MAX_WORKERS)]
    max_concurrency: usize,

    /// Optional run deadline in seconds.
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Apply database migrations before running.
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let feeds = config::load_feeds(&cli.feeds)
        .with_context(|| format!("loading feeds from {}", cli.feeds.display()))?;
    if feeds.is_empty() {
        anyhow::bail!("no feeds configured in {}", cli.feeds.display());
    }
    info!("loaded {} feeds from {}", feeds.len(), cli.feeds.display());

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let store = PgItemStore::connect(&database_url)
        .await
        .context("connecting to the item store")?;
    if cli.migrate {
        store.migrate().await.context("applying migrations")?;
    }

    let mut run_config = RunConfig::new(cli.lookback_days, feeds);
    run_config.notify_enabled = cli.notify;
    run_config.notify_recipient = cli.notify_to;
    run_config.publish_enabled = cli.publish;
    run_config.max_concurrency = cli.max_concurrency;
    run_config.deadline_secs = cli.deadline_secs;

    let fetcher = Arc::new(Fetcher::new(Default::default()).context("building HTTP client")?);
    let mut runner = IngestRunner::new(Arc::new(store), fetcher, Arc::new(NoopTagger), run_config);

    if cli.notify {
        match SmtpConfig::from_env().context("reading SMTP configuration")? {
            Some(smtp) => {
                let notifier = EmailNotifier::new(&smtp).context("building SMTP notifier")?;
                runner = runner.with_notifier(Arc::new(notifier));
            }
            None => warn!("--notify set but SMTP_HOST is unset; notifications disabled"),
        }
    }

    if cli.publish {
        runner = runner.with_publisher(Arc::new(FsPublisher::new(cli.snapshot_dir.clone())));
    }

    let summary = runner.run().await.context("ingestion run failed")?;

    info!(
        "ingested {} new items across {:?}",
        summary.new_item_count, summary.touched_categories
    );
    for (category, error) in &summary.per_feed_errors {
        warn!("feed {} reported: {}", category, error);
    }

    Ok(())
}
