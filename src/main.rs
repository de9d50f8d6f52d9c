mod config;
mod ingest;
mod model;
mod notify;
mod sentiment;
mod storage;
mod telegram;
mod vk;
mod web;

#[cfg(test)]
mod testing;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use config::AppConfig;
use ingest::{Ingestor, PlatformMonitor};
use model::{ClassifiedComment, Source};
use notify::format::CommentFormatter;
use notify::Notifier;
use sentiment::SentimentWorker;
use storage::CommentStore;
use telegram::TelegramMonitor;
use vk::VkMonitor;
use web::state::AppState;

const ALERT_QUEUE_SIZE: usize = 100;

#[derive(Parser)]
#[command(name = "comment-monitor")]
#[command(about = "VK and Telegram comment monitor with sentiment labeling")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitors, the sentiment worker and the web server (default)
    Run,
    /// Print database statistics and exit
    Stats,
    /// Classify every stored comment again
    Reclassify {
        /// Comments read from the database per page
        #[arg(long, default_value_t = 50)]
        batch_size: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comment_monitor=info".into()),
        )
        .init();

    let cli = Cli::parse();

    info!("Loading configuration from {}...", cli.config.display());
    let config = AppConfig::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Stats => stats(config).await,
        Commands::Reclassify { batch_size } => reclassify(config, batch_size).await,
    }
}

async fn log_statistics(store: &CommentStore) -> Result<()> {
    let stats = store.get_statistics().await?;
    info!(
        "Database {}: {} comments (telegram {}, vk {}), {} processed, {} unprocessed, {} without sentiment",
        store.path().display(),
        stats.total,
        stats.telegram,
        stats.vk,
        stats.processed,
        stats.unprocessed,
        stats.undefined_sentiment
    );
    Ok(())
}

async fn stats(config: AppConfig) -> Result<()> {
    let store = CommentStore::open(&config.database).context("Failed to open database")?;
    let stats = store.get_statistics().await?;
    let breakdown = store.sentiment_breakdown().await?;

    println!("Database:     {}", store.path().display());
    println!("Total:        {}", stats.total);
    for source in Source::all() {
        println!("  {:<11} {}", format!("{}:", source), stats.by_source(*source));
    }
    println!("Processed:    {}", stats.processed);
    println!("Unprocessed:  {}", stats.unprocessed);
    println!("Sentiment:");
    for sentiment in model::Sentiment::all() {
        println!("  {:<11} {}", format!("{}:", sentiment), breakdown.count(*sentiment));
    }
    println!("  {:<11} {}", "undefined:", breakdown.undefined);
    Ok(())
}

async fn reclassify(config: AppConfig, batch_size: usize) -> Result<()> {
    let store = CommentStore::open(&config.database).context("Failed to open database")?;
    let classifier = sentiment::from_config(&config.sentiment)?;
    let (tx, _) = broadcast::channel::<ClassifiedComment>(1);
    let worker = SentimentWorker::new(store.clone(), classifier, tx, &config.sentiment);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        on_signal.cancel();
    });

    let report = worker.reclassify_all(batch_size, &cancel).await?;
    info!(
        "Reclassification finished: {} seen, {} classified, {} undefined, {} failed",
        report.seen, report.classified, report.undecided, report.failed
    );
    log_statistics(&store).await
}

async fn run(config: AppConfig) -> Result<()> {
    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!("  - {}", problem);
        }
        bail!("Configuration validation failed ({} problems)", problems.len());
    }

    info!("Initializing database...");
    let store = CommentStore::open(&config.database).context("Failed to open database")?;
    log_statistics(&store).await?;

    let cancel = CancellationToken::new();
    let (events_tx, _) = broadcast::channel::<ClassifiedComment>(256);
    let utc_offset = config.runtime.display_utc_offset_hours;
    let mut app_state = AppState::new(store.clone(), events_tx.clone(), &config.web).with_utc_offset(utc_offset);
    let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();
    let mut formatters: Vec<(Source, Arc<dyn CommentFormatter>)> = Vec::new();

    // Platform monitors
    if let Some(vk_config) = &config.vk {
        let monitor = VkMonitor::new(vk_config, utc_offset).context("Failed to build VK client")?;
        formatters.push((monitor.source(), monitor.formatter()));
        let ingestor = Ingestor::new(Box::new(monitor), store.clone(), vk_config.check_interval());
        app_state = app_state.with_monitor(Source::Vk, ingestor.subscribe());
        tasks.push(("VK monitor", tokio::spawn(ingestor.run(cancel.clone()))));
    } else {
        info!("VK monitor skipped (no [vk] section)");
    }

    if let Some(tg_config) = &config.telegram {
        let monitor = TelegramMonitor::new(tg_config, utc_offset);
        formatters.push((monitor.source(), monitor.formatter()));
        let ingestor = Ingestor::new(Box::new(monitor), store.clone(), tg_config.poll_interval());
        app_state = app_state.with_monitor(Source::Telegram, ingestor.subscribe());
        tasks.push(("Telegram monitor", tokio::spawn(ingestor.run(cancel.clone()))));
    } else {
        info!("Telegram monitor skipped (no [telegram] section)");
    }

    // Sentiment worker
    let classifier = sentiment::from_config(&config.sentiment)?;
    let mut worker = SentimentWorker::new(store.clone(), classifier, events_tx.clone(), &config.sentiment);
    match (&config.notify.bot_token, &config.notify.alert_chat_id) {
        (Some(token), Some(chat_id)) => {
            let mut notifier = Notifier::new(&config.notify.api_base, token, chat_id, utc_offset)
                .context("Failed to build Bot API client")?;
            for (source, formatter) in formatters {
                notifier = notifier.with_formatter(source, formatter);
            }
            let (alerts_tx, alerts_rx) = mpsc::channel(ALERT_QUEUE_SIZE);
            worker = worker.with_alerts(alerts_tx);
            tasks.push(("notifier", tokio::spawn(notifier.run(alerts_rx, cancel.clone()))));
            info!("Alerts enabled for chat {}", chat_id);
        }
        _ => info!("Alerts disabled (BOT_TOKEN not set)"),
    }
    tasks.push(("sentiment worker", tokio::spawn(worker.run(cancel.clone()))));

    // Web server
    let router = web::create_router(app_state);
    let addr = format!("{}:{}", config.web.host, config.web.port);
    info!("Starting web server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let web_cancel = cancel.clone();
    tasks.push((
        "web server",
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(web_cancel.cancelled_owned())
                .await
            {
                error!("Web server error: {:#}", e);
            }
        }),
    ));

    info!("All components started. Press Ctrl+C to stop");
    shutdown_signal().await;

    info!("Shutting down...");
    cancel.cancel();

    let timeout = config.runtime.shutdown_timeout();
    for (name, mut handle) in tasks {
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => info!("{} stopped", name),
            Ok(Err(e)) => error!("{} ended abnormally: {}", name, e),
            Err(_) => {
                warn!("{} did not stop within {:?}, aborting", name, timeout);
                handle.abort();
            }
        }
    }

    log_statistics(&store).await?;
    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_is_the_default_command() {
        let cli = Cli::try_parse_from(["comment-monitor"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("config.toml"));

        let cli = Cli::try_parse_from(["comment-monitor", "--config", "prod.toml", "stats"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Stats)));
        assert_eq!(cli.config, PathBuf::from("prod.toml"));

        let cli = Cli::try_parse_from(["comment-monitor", "reclassify", "--batch-size", "10"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Reclassify { batch_size: 10 })));
    }
}
