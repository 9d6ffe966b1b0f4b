//! Chain Event Notifier CLI
//!
//! Entry point for the notifier binary. Provides subcommands for:
//! - `run` - Start the notifier (broker or websocket fan-out, per config)
//! - `version` - Show version information

use std::sync::Arc;

use chain_event_notifier::config::{ApiType, Settings};
use chain_event_notifier::error::{NotifierError, Result};
use chain_event_notifier::facade::Facade;
use chain_event_notifier::handler::EventsHandler;
use chain_event_notifier::interceptor::Interceptor;
use chain_event_notifier::lock::{DisabledLockService, LockService, RedisLockService};
use chain_event_notifier::publisher::driver::AmqpBrokerDriver;
use chain_event_notifier::publisher::session_bus::AmqpSessionBusSender;
use chain_event_notifier::publisher::ExchangeTable;
use chain_event_notifier::{hub, publisher};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Chain Event Notifier
#[derive(Parser, Debug)]
#[command(name = "chain-event-notifier")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Environment name, selects `config/{environment}.toml`
    #[arg(short, long, default_value = "development")]
    environment: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the notifier
    Run,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match cli.command {
        Commands::Version => {
            println!("chain-event-notifier {}", chain_event_notifier::VERSION);
        }
        Commands::Run => {
            if let Err(error) = run(&cli.environment).await {
                error!(?error, "notifier exited with an error");
                std::process::exit(1);
            }
        }
    }
}

async fn run(environment: &str) -> Result<()> {
    let settings = Settings::load(environment).map_err(NotifierError::Config)?;
    if let Err(errors) = settings.validate() {
        for error in &errors {
            error!(%error, "invalid configuration");
        }
        return Err(NotifierError::Config(chain_event_notifier::error::ConfigError::Validation(
            errors,
        )));
    }

    info!(version = chain_event_notifier::VERSION, "starting chain-event-notifier");

    chain_event_notifier::metrics::install(&settings.metrics)?;

    let cancel = CancellationToken::new();

    let lock_handle: Arc<dyn LockService> = if settings.connector_api.check_duplicates {
        Arc::new(RedisLockService::connect(&settings.redis).await?)
    } else {
        Arc::new(DisabledLockService)
    };

    match settings.api_type()? {
        ApiType::MessageQueue => run_broker(&settings, lock_handle, cancel).await,
        ApiType::Websocket => run_websocket(&settings, lock_handle, cancel).await,
    }
}

async fn run_broker(settings: &Settings, lock: Arc<dyn LockService>, cancel: CancellationToken) -> Result<()> {
    let table = ExchangeTable::from_settings(&settings.rabbitmq).map_err(NotifierError::Config)?;
    let driver = Arc::new(AmqpBrokerDriver::connect(&settings.rabbitmq.url, &table).await?);

    let session_bus = if settings.session_bus.enabled {
        Some(Arc::new(
            AmqpSessionBusSender::connect(&settings.rabbitmq.url, &settings.session_bus.topic).await?,
        ))
    } else {
        None
    };

    let (broker_publisher, broker_loop) = publisher::channel(driver, table, session_bus, cancel.clone());
    let loop_handle = tokio::spawn(broker_loop.run());

    let handler = EventsHandler::new(ArcLock(lock), broker_publisher, settings.connector_api.check_duplicates);
    let _facade = Facade::new(Interceptor::new(), handler);

    info!("broker publisher loop running");
    wait_for_shutdown(&cancel).await;
    loop_handle.await.map_err(|e| {
        NotifierError::Transport(chain_event_notifier::error::TransportError::Connectivity(e.to_string()))
    })?;
    Ok(())
}

async fn run_websocket(settings: &Settings, lock: Arc<dyn LockService>, cancel: CancellationToken) -> Result<()> {
    let (hub_handle, hub_loop) = hub::channel(cancel.clone());
    let loop_handle = tokio::spawn(hub_loop.run());

    // Dispatchers register themselves as clients connect through the
    // (out-of-scope) websocket upgrade endpoint; none are registered here.
    let handler = EventsHandler::new(ArcLock(lock), hub_handle, settings.connector_api.check_duplicates);
    let _facade = Facade::new(Interceptor::new(), handler);

    info!("websocket hub loop running");
    wait_for_shutdown(&cancel).await;
    loop_handle.await.map_err(|e| {
        NotifierError::Transport(chain_event_notifier::error::TransportError::Connectivity(e.to_string()))
    })?;
    Ok(())
}

async fn wait_for_shutdown(cancel: &CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    cancel.cancel();
}

/// Wraps a shared `Arc<dyn LockService>` so it can be used anywhere a
/// concrete `LockService` type parameter is required.
#[derive(Clone)]
struct ArcLock(Arc<dyn LockService>);

#[async_trait::async_trait]
impl LockService for ArcLock {
    async fn is_event_processed(&self, key: &str) -> Result<bool> {
        self.0.is_event_processed(key).await
    }
}
