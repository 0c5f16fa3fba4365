use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use feed_pipeline::{
    extract_or_strip, load_feed_list, record_store, Admission, Config, DedupCache, DiscoveredItem,
    Fetcher, FeedScheduler, FsBlobStore, HttpFeedTransport, HttpPageFetcher, LogFormat,
    MemoryKeyValueStore, OllamaGenerator, Orchestrator, PgRecordStore, PgRunStore,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "feed-pipeline", version, about = "Polls feeds and summarizes new articles")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll feeds on an interval until interrupted (default)
    Run,
    /// Run a single polling cycle, wait for the admitted items and print the report
    PollOnce,
    /// Print the run checkpoint for a link as JSON
    Status { link: String },
    /// Admit a link by hand; a failed run is reopened at the stage that failed
    Resubmit {
        link: String,
        #[arg(long, default_value = "")]
        title: String,
    },
    /// Print the text the summarizer would see for a local HTML file
    Extract { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.config);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&cli.config).await,
        Command::PollOnce => poll_once(&cli.config).await,
        Command::Status { link } => status(&cli.config, &link).await,
        Command::Resubmit { link, title } => resubmit(&cli.config, link, title).await,
        Command::Extract { path } => {
            let markup = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            println!("{}", extract_or_strip(&markup));
            Ok(())
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn build_orchestrator(config: &Config, shutdown: CancellationToken) -> anyhow::Result<Orchestrator> {
    info!("Connecting to database: {}", config.redacted_database_url());
    let db = record_store::connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.redacted_database_url()))?;

    let fetcher = Fetcher::new(config.fetch_config())?;
    // Generation is bounded by the stage deadline, not the HTTP client timeout.
    let generation_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    let generator = OllamaGenerator::new(generation_client, &config.ollama_host, &config.ollama_model)?;
    info!("Using model {} at {}", generator.model(), config.ollama_host);

    let orchestrator = Orchestrator::builder()
        .documents(Arc::new(PgRecordStore::new(db.clone())))
        .runs(Arc::new(PgRunStore::new(db)))
        .blobs(Arc::new(FsBlobStore::new(&config.html_storage_dir)))
        .pages(Arc::new(HttpPageFetcher::new(fetcher)))
        .generator(Arc::new(generator))
        .policy(config.retry_policy())
        .shutdown_token(shutdown)
        .build()?;
    Ok(orchestrator)
}

async fn build_scheduler(config: &Config, orchestrator: Orchestrator, kv: Arc<MemoryKeyValueStore>) -> anyhow::Result<FeedScheduler> {
    let sources = load_feed_list(&config.source_file).await?;
    let transport = HttpFeedTransport::new(Fetcher::new(config.fetch_config())?);
    Ok(FeedScheduler::new(
        sources,
        Arc::new(transport),
        DedupCache::with_ttl(kv, config.dedup_ttl()),
        orchestrator,
        config.ticker_interval(),
    ))
}

async fn run(config: &Config) -> anyhow::Result<()> {
    info!("Starting feed pipeline");
    let shutdown = CancellationToken::new();
    let orchestrator = build_orchestrator(config, shutdown.clone()).await?;

    let resumed = orchestrator.resume_unfinished().await?;
    if resumed > 0 {
        info!("Resumed {} unfinished runs", resumed);
    }

    let kv = Arc::new(MemoryKeyValueStore::new());
    let scheduler = build_scheduler(config, orchestrator.clone(), kv.clone()).await?;

    tokio::spawn(purge_expired_links(kv, shutdown.clone()));
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    scheduler.run(shutdown).await;
    orchestrator.shutdown().await;
    info!("Feed pipeline stopped");
    Ok(())
}

async fn poll_once(config: &Config) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config, CancellationToken::new()).await?;
    let scheduler = build_scheduler(config, orchestrator.clone(), Arc::new(MemoryKeyValueStore::new())).await?;

    let report = scheduler.poll_all().await;
    orchestrator.wait_idle().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn status(config: &Config, link: &str) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config, CancellationToken::new()).await?;
    match orchestrator.status_for_link(link).await? {
        Some(run) => println!("{}", serde_json::to_string_pretty(&run)?),
        None => println!("No run for {}", link),
    }
    Ok(())
}

async fn resubmit(config: &Config, link: String, title: String) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config, CancellationToken::new()).await?;
    match orchestrator.admit(DiscoveredItem::new(link.clone(), title)).await? {
        Admission::Started { key } => {
            info!("Run {} started, waiting for it to finish", key);
            orchestrator.wait_idle().await;
        }
        Admission::Duplicate { run } => {
            error!("Run {} is {} and was not restarted", run.key, run.state.label());
        }
    }
    if let Some(run) = orchestrator.status_for_link(&link).await? {
        println!("{}", serde_json::to_string_pretty(&run)?);
    }
    Ok(())
}

async fn purge_expired_links(kv: Arc<MemoryKeyValueStore>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60 * 60));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let remaining = kv.purge_expired().await;
                tracing::debug!("Dedup cache holds {} links", remaining);
            }
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
