use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use likes_digest::config::{AppConfig, CliConfig, FileConfig, SourceKind, SourceSettings};
use likes_digest::event_source::{PostgrestConfig, DEFAULT_FETCH_LIMIT};
use likes_digest::notifications::presentation::{GroupView, DEFAULT_SNIPPET_MAX_GRAPHEMES};
use likes_digest::{
    CoordinatorHandle, CoordinatorSnapshot, EventSource, InvalidationBus, PostgrestEventSource,
    RefreshCoordinator, RefreshScope, RefreshState, SqliteEventSource, SqliteWatermarkStore,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
#[command(name = "likes-digest")]
#[command(about = "Grouped like notifications with a persisted read watermark")]
struct CliArgs {
    /// Optional TOML config file; its values override the flags below.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding likes.db and watermark.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Id of the profile whose posts are watched.
    #[clap(long)]
    pub viewer_id: Option<String>,

    /// Where like events are read from.
    #[clap(long, value_enum, default_value = "sqlite")]
    pub source: SourceKind,

    /// Base URL of the PostgREST endpoint.
    #[clap(long)]
    pub postgrest_url: Option<String>,

    /// API key sent with every PostgREST request.
    #[clap(long)]
    pub postgrest_api_key: Option<String>,

    /// Maximum likes returned by one fetch.
    #[clap(long, default_value_t = DEFAULT_FETCH_LIMIT)]
    pub fetch_limit: usize,

    /// Seconds before a fetch is abandoned.
    #[clap(long, default_value_t = 10)]
    pub fetch_timeout_sec: u64,

    /// Seconds between background refreshes. 0 disables polling.
    #[clap(long, default_value_t = 0)]
    pub poll_interval_sec: u64,

    /// Longest post snippet shown, in characters.
    #[clap(long, default_value_t = DEFAULT_SNIPPET_MAX_GRAPHEMES)]
    pub snippet_max_graphemes: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch once, print the digest as JSON and exit.
    Once {
        /// Refresh without marking the likes as read.
        #[clap(long)]
        peek: bool,
    },
    /// Keep the digest open and print it whenever it changes. SIGHUP
    /// refreshes it without marking anything read.
    Watch,
    /// Mark everything up to now as read without fetching.
    MarkRead,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            viewer_id: self.viewer_id.clone(),
            source: self.source,
            postgrest_url: self.postgrest_url.clone(),
            postgrest_api_key: self.postgrest_api_key.clone(),
            fetch_limit: self.fetch_limit,
            fetch_timeout_sec: self.fetch_timeout_sec,
            poll_interval_sec: self.poll_interval_sec,
            snippet_max_graphemes: self.snippet_max_graphemes,
        }
    }
}

#[derive(Serialize)]
struct DigestView {
    viewer_id: String,
    unread_count: usize,
    refresh_state: RefreshState,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    persistence_error: Option<String>,
    groups: Vec<GroupView>,
}

impl From<&CoordinatorSnapshot> for DigestView {
    fn from(snapshot: &CoordinatorSnapshot) -> Self {
        let now = Utc::now();
        Self {
            viewer_id: snapshot.viewer_id.clone(),
            unread_count: snapshot.unread_count,
            refresh_state: snapshot.refresh_state,
            last_error: snapshot.last_error.clone(),
            persistence_error: snapshot.persistence_error.clone(),
            groups: snapshot
                .groups
                .iter()
                .map(|group| GroupView::new(group, now))
                .collect(),
        }
    }
}

fn build_source(config: &AppConfig) -> Result<Arc<dyn EventSource>> {
    match &config.source {
        SourceSettings::Sqlite => {
            let path = config.events_db_path();
            info!("Opening SQLite likes database at {:?}...", path);
            Ok(Arc::new(SqliteEventSource::new(&path)?))
        }
        SourceSettings::Postgrest(settings) => {
            info!("Reading likes from {}", settings.url);
            Ok(Arc::new(PostgrestEventSource::new(PostgrestConfig {
                base_url: settings.url.clone(),
                api_key: settings.api_key.clone(),
                access_token: settings.access_token.clone(),
                timeout: config.coordinator.fetch_timeout,
            })?))
        }
    }
}

fn print_digest(snapshot: &CoordinatorSnapshot) -> Result<()> {
    let rendered = serde_json::to_string_pretty(&DigestView::from(snapshot))
        .context("Failed to render digest")?;
    println!("{}", rendered);
    Ok(())
}

#[cfg(unix)]
async fn hangup(signals: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match signals {
        Some(signals) => signals.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn hangup(_signals: &mut Option<()>) -> Option<()> {
    std::future::pending().await
}

#[cfg(unix)]
fn hangup_signals() -> Result<Option<tokio::signal::unix::Signal>> {
    use tokio::signal::unix::{signal, SignalKind};
    let signals = signal(SignalKind::hangup()).context("Failed to listen for SIGHUP")?;
    Ok(Some(signals))
}

#[cfg(not(unix))]
fn hangup_signals() -> Result<Option<()>> {
    Ok(None)
}

async fn watch(handle: &CoordinatorHandle, bus: &InvalidationBus) -> Result<()> {
    let mut changes = handle.changes();
    let mut hangups = hangup_signals()?;
    handle.activate().await;

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    info!("Coordinator stopped");
                    return Ok(());
                }
                let snapshot = handle.snapshot().await;
                if !snapshot.is_busy() {
                    print_digest(&snapshot)?;
                }
            }
            signal = hangup(&mut hangups) => {
                if signal.is_none() {
                    hangups = None;
                    continue;
                }
                info!("Received SIGHUP, refreshing notifications");
                bus.trigger(RefreshScope::Notifications);
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
                info!("Received ctrl-c, stopping");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    let source = build_source(&config)?;
    let watermark_path = config.watermark_db_path();
    info!("Opening watermark database at {:?}...", watermark_path);
    let store = Arc::new(SqliteWatermarkStore::new(&watermark_path)?);

    let shutdown_token = CancellationToken::new();
    let bus = InvalidationBus::new();
    let handle = RefreshCoordinator::spawn(
        config.viewer_id.clone(),
        source,
        store,
        config.coordinator.clone(),
        Some(bus.subscribe()),
        shutdown_token.clone(),
    )
    .await;

    let outcome = match cli_args.command {
        Command::Once { peek } => {
            if peek {
                handle.manual_refresh().await;
            } else {
                handle.activate().await;
            }
            handle.settled().await;
            print_digest(&handle.snapshot().await)
        }
        Command::Watch => watch(&handle, &bus).await,
        Command::MarkRead => match handle.mark_as_read(None).await {
            Ok(watermark) => {
                info!("Viewer {} read up to {}", config.viewer_id, watermark);
                Ok(())
            }
            Err(err) => {
                warn!("{}", err);
                Err(err.into())
            }
        },
    };

    shutdown_token.cancel();
    handle.dispose().await;
    outcome
}
