// # connlogd - Connection Log Worker Daemon
//
// Thin integration layer: reads configuration from the environment, builds
// the stores and adapters, and runs one ingestion loop per topic until
// SIGINT or SIGTERM. All reconciliation logic lives in connlog-core.
//
// ## Configuration
//
// ### Message stream
// - `CONNLOG_NATS_URL`, `CONNLOG_STREAM_NAME`, `CONNLOG_CONSUMER_GROUP`
// - `CONNLOG_DEVICE_LOG_TOPIC`, `CONNLOG_HUB_LOG_TOPIC`
// - `CONNLOG_DEVICE_COMMAND_TOPIC`, `CONNLOG_HUB_COMMAND_TOPIC`
// - `CONNLOG_RETRY_BACKOFF_MS`: Pause after a failed event
//
// ### State store
// - `CONNLOG_STATE_STORE_TYPE`: file or memory
// - `CONNLOG_STATE_STORE_PATH`: Path to the state file (for file store)
//
// ### History
// - `CONNLOG_INFLUX_URL` (required), `CONNLOG_INFLUX_DB`
// - `CONNLOG_INFLUX_USER`, `CONNLOG_INFLUX_PASSWORD`, `CONNLOG_INFLUX_TIMEOUT_SECS`
//
// ### Notifications
// - `CONNLOG_NOTIFICATION_URL`: Unset, empty or "-" disables notifications
// - `CONNLOG_NOTIFICATION_DEDUP_SECS`
// - `CONNLOG_ROUND_TIME`: Granularity of elapsed time in messages (e.g. 1m)
// - `CONNLOG_FRESHNESS_WINDOW_SECS`: Older events skip the offline tracker
//
// ### Device repository
// - `CONNLOG_DEVICE_REPOSITORY_URL`: Unset, empty or "-" disables sync
// - `CONNLOG_DEVICE_REPOSITORY_TOKEN`
//
// ### Logging
// - `CONNLOG_LOG_LEVEL`: trace, debug, info, warn or error
//
// ## Example
//
// ```bash
// export CONNLOG_NATS_URL=nats://nats:4222
// export CONNLOG_INFLUX_URL=http://influxdb:8086
// export CONNLOG_NOTIFICATION_URL=http://notifications:8080
// export CONNLOG_STATE_STORE_PATH=/var/lib/connlog/state.json
//
// connlogd
// ```

use anyhow::{Context, Result};
use connlog_core::{
    EpisodeStore, FileStateStore, Ingestion, IngestionLoop, MemoryStateStore, Reconciler,
    StateStore, StateStoreConfig, StreamKind, WorkerConfig,
};
use connlog_http::{DeviceRegistryClient, HttpNotifier};
use connlog_influx::InfluxHistorySink;
use connlog_nats::NatsTransport;
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// How long in-flight events get to finish after a shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

const NATS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum ConnlogExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<ConnlogExitCode> for ExitCode {
    fn from(code: ConnlogExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration: the worker configuration plus the log level
#[derive(Debug)]
struct Config {
    worker: WorkerConfig,
    log_level: Level,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut worker = WorkerConfig::default();

        let ingest = &mut worker.ingest;
        set_string(&lookup, "CONNLOG_NATS_URL", &mut ingest.nats_url);
        set_string(&lookup, "CONNLOG_STREAM_NAME", &mut ingest.stream_name);
        set_string(&lookup, "CONNLOG_CONSUMER_GROUP", &mut ingest.consumer_group);
        set_string(&lookup, "CONNLOG_DEVICE_LOG_TOPIC", &mut ingest.device_log_topic);
        set_string(&lookup, "CONNLOG_HUB_LOG_TOPIC", &mut ingest.hub_log_topic);
        set_string(&lookup, "CONNLOG_DEVICE_COMMAND_TOPIC", &mut ingest.device_command_topic);
        set_string(&lookup, "CONNLOG_HUB_COMMAND_TOPIC", &mut ingest.hub_command_topic);
        set_parsed(&lookup, "CONNLOG_RETRY_BACKOFF_MS", &mut ingest.retry_backoff_ms)?;

        let store_type = lookup("CONNLOG_STATE_STORE_TYPE").unwrap_or_else(|| "file".to_string());
        worker.state_store = match store_type.as_str() {
            "file" => match lookup("CONNLOG_STATE_STORE_PATH") {
                Some(path) => StateStoreConfig::File { path },
                None => StateStoreConfig::default(),
            },
            "memory" => StateStoreConfig::Memory,
            other => anyhow::bail!(
                "CONNLOG_STATE_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                other
            ),
        };

        let history = &mut worker.history;
        history.influx_url = lookup("CONNLOG_INFLUX_URL");
        set_string(&lookup, "CONNLOG_INFLUX_DB", &mut history.database);
        history.username = lookup("CONNLOG_INFLUX_USER");
        history.password = lookup("CONNLOG_INFLUX_PASSWORD");
        set_parsed(&lookup, "CONNLOG_INFLUX_TIMEOUT_SECS", &mut history.timeout_secs)?;

        worker.notifier.url = lookup("CONNLOG_NOTIFICATION_URL");
        set_parsed(
            &lookup,
            "CONNLOG_NOTIFICATION_DEDUP_SECS",
            &mut worker.notifier.dedup_window_secs,
        )?;

        worker.registry.url = lookup("CONNLOG_DEVICE_REPOSITORY_URL");
        worker.registry.token = lookup("CONNLOG_DEVICE_REPOSITORY_TOKEN");

        set_string(&lookup, "CONNLOG_ROUND_TIME", &mut worker.reconciler.round_time);
        set_parsed(
            &lookup,
            "CONNLOG_FRESHNESS_WINDOW_SECS",
            &mut worker.reconciler.freshness_window_secs,
        )?;

        let log_level = match lookup("CONNLOG_LOG_LEVEL")
            .unwrap_or_else(|| "info".to_string())
            .to_lowercase()
            .as_str()
        {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            other => anyhow::bail!(
                "CONNLOG_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                other
            ),
        };

        Ok(Self { worker, log_level })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.worker
            .validate()
            .context("Invalid worker configuration")?;

        if let StateStoreConfig::File { path } = &self.worker.state_store
            && let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "CONNLOG_STATE_STORE_PATH parent directory does not exist: {}. \
                Create it first: sudo mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        if !self.worker.notifier.is_enabled() {
            warn!("CONNLOG_NOTIFICATION_URL not set, offline notifications are disabled");
        }

        Ok(())
    }
}

fn set_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut String) {
    if let Some(value) = lookup(key) {
        *target = value;
    }
}

fn set_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = lookup(key) {
        *target = value
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} '{}' is not valid: {}", key, value, e))?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ConnlogExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ConnlogExitCode::ConfigError.into();
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation error: {:#}", e);
        return ConnlogExitCode::ConfigError.into();
    }

    info!("Starting connlogd");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ConnlogExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        let daemon = match Daemon::build(config.worker).await {
            Ok(daemon) => daemon,
            Err(e) => {
                error!("Startup error: {:#}", e);
                return ConnlogExitCode::ConfigError;
            }
        };

        match daemon.run().await {
            Ok(()) => ConnlogExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                ConnlogExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Fully wired worker, ready to run
struct Daemon {
    reconciler: Arc<Reconciler>,
    ingestion: Ingestion,
    drain: tokio::task::JoinHandle<()>,
}

impl Daemon {
    async fn build(config: WorkerConfig) -> Result<Self> {
        let (state_store, episodes): (Arc<dyn StateStore>, Arc<dyn EpisodeStore>) =
            match &config.state_store {
                StateStoreConfig::File { path } => {
                    info!(path = %path, "Using file state store");
                    let store = Arc::new(
                        FileStateStore::new(path)
                            .await
                            .context("Failed to open state store")?,
                    );
                    (store.clone() as Arc<dyn StateStore>, store as Arc<dyn EpisodeStore>)
                }
                StateStoreConfig::Memory => {
                    warn!("Using in-memory state store, state is lost on restart");
                    let store = Arc::new(MemoryStateStore::new());
                    (store.clone() as Arc<dyn StateStore>, store as Arc<dyn EpisodeStore>)
                }
            };

        let history = InfluxHistorySink::from_config(&config.history)
            .context("Failed to configure InfluxDB history")?;
        info!(url = %history.write_url(), "Writing history to InfluxDB");

        let (mut reconciler, mut events) =
            Reconciler::new(state_store, episodes, Arc::new(history), &config.reconciler)
                .context("Failed to create reconciler")?;

        if let Some(notifier) = HttpNotifier::from_config(&config.notifier)
            .context("Failed to configure notifier")?
        {
            info!(endpoint = %notifier.endpoint(), "Offline notifications enabled");
            reconciler = reconciler.with_notifier(Arc::new(notifier));
        }

        if let Some(registry) = DeviceRegistryClient::from_config(&config.registry)
            .context("Failed to configure device repository client")?
        {
            info!("Device repository sync enabled");
            reconciler = reconciler.with_registry(Arc::new(registry));
        }

        let reconciler = Arc::new(reconciler);

        let transport = NatsTransport::connect(&config.ingest, NATS_CONNECT_TIMEOUT).await?;
        transport.ensure_stream().await?;

        let mut ingestion = Ingestion::new();
        for kind in StreamKind::ALL {
            let source = transport.source(kind).await?;
            ingestion = ingestion.with_loop(
                IngestionLoop::new(kind, Box::new(source), reconciler.clone())
                    .with_retry_backoff(config.ingest.retry_backoff()),
            );
        }

        let drain = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                debug!(?event, "Reconcile event");
            }
        });

        Ok(Self {
            reconciler,
            ingestion,
            drain,
        })
    }

    async fn run(self) -> Result<()> {
        let cancel = CancellationToken::new();
        let mut ingestion = tokio::spawn(self.ingestion.run(cancel.clone()));

        info!("Ready to process connectivity events");

        let outcome = tokio::select! {
            joined = &mut ingestion => {
                warn!("All ingestion loops exited before shutdown was requested");
                joined
            }
            signal = wait_for_shutdown() => {
                info!("Received shutdown signal: {}", signal?);
                cancel.cancel();
                tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut ingestion)
                    .await
                    .map_err(|_| anyhow::anyhow!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT))?
            }
        };

        let flushed = self.reconciler.flush().await;
        self.drain.abort();

        outcome.context("Ingestion task failed")??;
        flushed.context("Failed to flush state store")?;

        info!("Shutdown complete");
        Ok(())
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
