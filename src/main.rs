use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use notifications_push::cache::NotificationCache;
use notifications_push::config::Config;
use notifications_push::consumer::{NotificationMapper, QueueHandler, TransactionFilter};
use notifications_push::dispatch::{DelayedDispatcher, Dispatcher, History};
use notifications_push::health::ProxyHealthCheck;
use notifications_push::queue::{MessageConsumer, ProxyConsumer, QueueError};
use notifications_push::service::PushService;
use notifications_push::signals::{shutdown_channel, shutdown_requested};
use notifications_push::supervisor::Supervisor;
use notifications_push::web::{self, AppState};

const SERVICE_NAME: &str = "notifications-push";

/// Notifications push: streams content change notifications to subscribers.
///
/// Everything except the HTTP listener is configured through environment
/// variables (see .env.example).
#[derive(Parser)]
#[command(name = "notifications-push", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("notifications_push=info,tower_http=info")
            }),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::load()?;
    config.validate()?;
    let whitelist = config.whitelist()?;
    info!(
        resource = %config.resource,
        delay_secs = config.delay.as_secs(),
        heartbeat_secs = config.heartbeat_period.as_secs(),
        capacity = config.capacity,
        polling = config.polling_enabled,
        "Starting notifications push"
    );

    let history = Arc::new(History::new(config.capacity));
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(DelayedDispatcher::new(
        config.delay,
        config.heartbeat_period,
        Arc::clone(&history),
    ));
    let cache = config
        .polling_enabled
        .then(|| Arc::new(NotificationCache::new(config.capacity)));

    let mapper = NotificationMapper::new(&config.api_base_url, &config.resource)
        .context("Failed to build notification mapper")?;
    let filter = TransactionFilter::new(&config.synthetic_tid_prefix, config.suppress_carousel)
        .context("Failed to build transaction id filter")?;
    let mut handler = QueueHandler::new(whitelist, filter, mapper, Arc::clone(&dispatcher));
    if let Some(cache) = &cache {
        handler = handler.with_cache(Arc::clone(cache));
    }

    let (errors_tx, errors_rx) = mpsc::unbounded_channel();
    let consumer: Arc<dyn MessageConsumer> =
        Arc::new(ProxyConsumer::new(config.consumer_config(), errors_tx)?);
    tokio::spawn(Supervisor::new(SERVICE_NAME, errors_rx, exit_on_fatal).supervise());

    let health = Arc::new(ProxyHealthCheck::new(config.consumer_config())?);
    let shutdown = shutdown_channel();

    let state = AppState {
        dispatcher: Arc::clone(&dispatcher),
        history,
        cache,
        config: Arc::new(config),
        health,
        shutdown: shutdown.clone(),
    };
    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { web::run_server(state, cli.port, &cli.bind, shutdown_requested(shutdown)).await }
    });

    let service = PushService::new(dispatcher, consumer);
    service
        .run(Arc::new(handler), shutdown_requested(shutdown))
        .await;

    match server.await {
        Ok(result) => result?,
        Err(e) => error!(error = %e, "HTTP server task failed"),
    }
    info!("Notifications push stopped");
    Ok(())
}

fn exit_on_fatal(e: &QueueError, service_name: &str) {
    error!(service = %service_name, error = %e, "Exiting after fatal queue error");
    std::process::exit(1);
}
