//! Newsroom service binary
//!
//! Wires configured feeds, composer, publisher and store into jobs and
//! runs them on the scheduler, or runs a single job once.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use newsroom::calendar::jobs::{CalendarJob, CalendarUpdatesJob};
use newsroom::calendar::JsonCalendarSource;
use newsroom::composer::{Composer, OpenAiComposer};
use newsroom::config::Config;
use newsroom::http_client::{HttpClientConfig, ResilientHttpClient};
use newsroom::metrics::start_metrics_server;
use newsroom::pipeline::{Job, JobOptions, NewsJob};
use newsroom::publisher::{Publisher, TelegramPublisher};
use newsroom::scheduler::Scheduler;
use newsroom::schemas::MetaKey;
use newsroom::sources::{RssSource, Source};
use newsroom::storage::{EventStore, MemoryStore, NewsStore, PgStore};
use newsroom::summary::SummaryJob;
use newsroom::Journalist;

/// Newsroom - market news aggregation and publishing
#[derive(Parser, Debug)]
#[command(name = "newsroom")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fetches market news, composes it and publishes it to Telegram")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every configured job on its interval until SIGINT/SIGTERM
    Run,

    /// Run one job once and print its report as JSON
    Once {
        #[arg(value_enum)]
        job: JobKind,
    },

    /// Show configured feeds, universe, store and composer
    Status,

    /// Create the Postgres schema
    InitDb,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum JobKind {
    News,
    Calendar,
    CalendarUpdates,
    Summary,
}

/// Sets up structured logging with tracing
fn setup_logging(log_level: &str, json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Waits for SIGTERM/SIGINT and broadcasts shutdown
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }

    let _ = shutdown_tx.send(());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting newsroom");

    let config = Config::load()?;
    config.validate()?;

    info!(
        market_feeds = config.market_feeds()?.len(),
        broad_feeds = config.broad_feeds()?.len(),
        publisher = config.has_publisher(),
        composer = config.has_composer(),
        database = config.has_database(),
        "Configuration loaded"
    );
    if config.sentry_dsn.is_some() {
        info!("Error reporting DSN configured");
    }

    match cli.command {
        Commands::Run => run_service(config).await,
        Commands::Once { job } => run_single(config, job).await,
        Commands::Status => show_status(&config),
        Commands::InitDb => init_db(&config).await,
    }
}

// ============================================
// WIRING
// ============================================

/// Shared collaborators every job is built from
struct Services {
    http: ResilientHttpClient,
    publisher: Arc<dyn Publisher>,
    composer: Option<Arc<dyn Composer>>,
    news_store: Arc<dyn NewsStore>,
    event_store: Arc<dyn EventStore>,
}

impl Services {
    async fn build(config: &Config) -> Result<Self> {
        let http = ResilientHttpClient::new(HttpClientConfig {
            max_concurrent_requests: config.max_concurrent_requests,
            ..Default::default()
        })?;

        let (Some(bot_token), Some(channel_id)) = (&config.telegram_bot_token, &config.telegram_channel_id)
        else {
            bail!("TELEGRAM_BOT_TOKEN and TELEGRAM_CHANNEL_ID must be set");
        };
        let publisher: Arc<dyn Publisher> = Arc::new(TelegramPublisher::new(
            http.clone(),
            &config.telegram_api_url,
            bot_token,
            channel_id.clone(),
            config.publish_rate_limit_rpm,
        ));

        let composer: Option<Arc<dyn Composer>> = config.openai_api_key.as_ref().map(|key| {
            Arc::new(OpenAiComposer::new(
                http.clone(),
                config.openai_api_url.clone(),
                key.clone(),
                config.openai_model.clone(),
            )) as Arc<dyn Composer>
        });

        let (news_store, event_store): (Arc<dyn NewsStore>, Arc<dyn EventStore>) = match &config.database_url {
            Some(url) => {
                let store = Arc::new(PgStore::connect(url).await?);
                (store.clone() as Arc<dyn NewsStore>, store as Arc<dyn EventStore>)
            }
            None => {
                warn!("DATABASE_URL not set, using in-memory store");
                let store = Arc::new(MemoryStore::new());
                (store.clone() as Arc<dyn NewsStore>, store as Arc<dyn EventStore>)
            }
        };

        Ok(Self {
            http,
            publisher,
            composer,
            news_store,
            event_store,
        })
    }

    fn rss_sources(&self, feeds: &[newsroom::config::FeedSource]) -> Vec<Arc<dyn Source>> {
        feeds
            .iter()
            .map(|feed| Arc::new(RssSource::from_feed(feed, self.http.clone())) as Arc<dyn Source>)
            .collect()
    }

    fn market_news_job(&self, config: &Config) -> Result<Option<NewsJob>> {
        let feeds = config.market_feeds()?;
        if feeds.is_empty() {
            return Ok(None);
        }

        let journalist = Journalist::new(self.rss_sources(&feeds), config.provider_timeout()?)
            .with_suspicious_keywords(config.suspicious_keywords());

        let mut options = JobOptions::builder()
            .fetch_window(config.fetch_window()?)
            .omit_suspicious()
            .save_to_db()
            .remove_clones();
        if self.composer.is_some() {
            options = options
                .compose_text()
                .omit_empty_meta_key(MetaKey::Tickers)
                .omit_unlisted_stocks();
        }

        let job = NewsJob::new(
            "market-news",
            journalist,
            self.composer.clone(),
            self.publisher.clone(),
            self.news_store.clone(),
            options.build(),
        )?
        .with_stock_universe(config.stock_universe());
        Ok(Some(job))
    }

    fn broad_news_job(&self, config: &Config) -> Result<Option<NewsJob>> {
        let feeds = config.broad_feeds()?;
        if feeds.is_empty() {
            return Ok(None);
        }

        let journalist = Journalist::new(self.rss_sources(&feeds), config.provider_timeout()?)
            .with_filter_keywords(config.broad_keywords())
            .with_suspicious_keywords(config.suspicious_keywords());

        let mut options = JobOptions::builder()
            .fetch_window(config.fetch_window()?)
            .omit_suspicious()
            .save_to_db()
            .remove_clones();
        if self.composer.is_some() {
            options = options.compose_text().omit_if_all_keys_empty();
        }

        let job = NewsJob::new(
            "broad-news",
            journalist,
            self.composer.clone(),
            self.publisher.clone(),
            self.news_store.clone(),
            options.build(),
        )?;
        Ok(Some(job))
    }

    fn calendar_source(&self, config: &Config) -> Option<Arc<JsonCalendarSource>> {
        config
            .calendar_url
            .as_ref()
            .map(|url| Arc::new(JsonCalendarSource::new(self.http.clone(), url.clone())))
    }

    fn calendar_job(&self, config: &Config) -> Option<CalendarJob> {
        self.calendar_source(config).map(|source| {
            CalendarJob::new(
                source,
                self.publisher.clone(),
                self.event_store.clone(),
                config.calendar_days,
            )
        })
    }

    fn calendar_updates_job(&self, config: &Config) -> Option<CalendarUpdatesJob> {
        self.calendar_source(config)
            .map(|source| CalendarUpdatesJob::new(source, self.publisher.clone(), self.event_store.clone()))
    }

    fn summary_job(&self, config: &Config) -> Result<Option<SummaryJob>> {
        let Some(composer) = &self.composer else {
            return Ok(None);
        };
        let job = SummaryJob::new(
            self.news_store.clone(),
            self.event_store.clone(),
            composer.clone(),
            self.publisher.clone(),
            config.summary_interval()?,
        )
        .with_min_items(config.summary_min_items)
        .with_limit(config.summary_limit)
        .with_max_tokens(config.summary_max_tokens);
        Ok(Some(job))
    }
}

// ============================================
// COMMANDS
// ============================================

/// Runs every configured job until shutdown
async fn run_service(config: Config) -> Result<()> {
    let services = Services::build(&config).await?;
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    if config.metrics_enabled {
        let metrics_addr: SocketAddr = format!("0.0.0.0:{}", config.metrics_port).parse()?;
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics_addr).await {
                error!(error = %e, "Metrics server failed");
            }
        });
        info!(port = config.metrics_port, "Metrics server started at /metrics");
    }

    let mut scheduler = Scheduler::new(config.run_timeout()?, shutdown_tx.clone());
    let news_interval = config.news_interval()?;

    let news_jobs = [services.market_news_job(&config)?, services.broad_news_job(&config)?];
    for job in news_jobs.into_iter().flatten() {
        scheduler.add(Arc::new(job), news_interval);
    }
    if let Some(job) = services.calendar_job(&config) {
        scheduler.add(Arc::new(job), config.calendar_interval()?);
    }
    if let Some(job) = services.calendar_updates_job(&config) {
        scheduler.add(Arc::new(job), config.calendar_updates_interval()?);
    }
    if let Some(job) = services.summary_job(&config)? {
        scheduler.add(Arc::new(job), config.summary_interval()?);
    }

    let jobs = scheduler.job_names();
    if jobs.is_empty() {
        bail!("No jobs configured: set MARKET_FEEDS, BROAD_FEEDS or CALENDAR_URL");
    }
    info!(jobs = ?jobs, "Newsroom initialized");

    tokio::spawn(shutdown_signal(shutdown_tx));
    scheduler.run().await;

    info!("Newsroom stopped");
    Ok(())
}

/// Runs one job once and prints the report. `news` runs every configured news job.
async fn run_single(config: Config, kind: JobKind) -> Result<()> {
    let services = Services::build(&config).await?;

    let jobs: Vec<Arc<dyn Job>> = match kind {
        JobKind::News => [services.market_news_job(&config)?, services.broad_news_job(&config)?]
            .into_iter()
            .flatten()
            .map(|job| Arc::new(job) as Arc<dyn Job>)
            .collect(),
        JobKind::Calendar => services
            .calendar_job(&config)
            .map(|job| Arc::new(job) as Arc<dyn Job>)
            .into_iter()
            .collect(),
        JobKind::CalendarUpdates => services
            .calendar_updates_job(&config)
            .map(|job| Arc::new(job) as Arc<dyn Job>)
            .into_iter()
            .collect(),
        JobKind::Summary => services
            .summary_job(&config)?
            .map(|job| Arc::new(job) as Arc<dyn Job>)
            .into_iter()
            .collect(),
    };
    if jobs.is_empty() {
        bail!("{kind:?} job is not configured");
    }

    let run_timeout = config.run_timeout()?;
    for job in jobs {
        let report = tokio::time::timeout(run_timeout, job.run())
            .await
            .with_context(|| format!("{} timed out", job.name()))??;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

/// Shows configured feeds and collaborators
fn show_status(config: &Config) -> Result<()> {
    println!("\nNewsroom Status");
    println!("===============\n");

    println!("Market feeds:");
    for feed in config.market_feeds()? {
        println!("  - {}: {}", feed.name, feed.url);
    }
    println!("Broad feeds:");
    for feed in config.broad_feeds()? {
        println!("  - {}: {}", feed.name, feed.url);
    }

    println!("\nStock universe: {} symbols", config.stock_universe().len());
    println!("Broad keywords: {}", config.broad_keywords().len());
    println!("Calendar:       {}", config.calendar_url.as_deref().unwrap_or("not configured"));
    println!("Publisher:      {}", if config.has_publisher() { "telegram" } else { "not configured" });
    println!("Composer:       {}", if config.has_composer() { config.openai_model.as_str() } else { "not configured" });
    println!("Store:          {}", if config.has_database() { "postgres" } else { "memory" });

    println!("\nIntervals:");
    println!("  news:             {}", config.news_interval);
    println!("  calendar:         {}", config.calendar_interval);
    println!("  calendar updates: {}", config.calendar_updates_interval);
    println!("  summary:          {}", config.summary_interval);
    println!("  run timeout:      {}", config.run_timeout);

    Ok(())
}

async fn init_db(config: &Config) -> Result<()> {
    let url = config.database_url.as_ref().context("DATABASE_URL is not set")?;
    let store = PgStore::connect(url).await?;
    store.init_schema().await?;
    info!("Database schema ready");
    Ok(())
}
