use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Claims store backend (memory or postgres)
    #[arg(long)]
    pub store_provider: Option<String>,

    /// Portal database URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Room registry backend (memory or redis)
    #[arg(long)]
    pub registry_backend: Option<String>,

    /// Redis URL for cross-instance fan-out
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub delivery: DeliveryConfig,
    pub bridge: BridgeConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreProvider {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub provider: StoreProvider,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// Rooms live in this process only.
    Memory,
    /// Room frames travel over Redis pub/sub so every instance sees them.
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,
    pub redis_url: Option<String>,
    pub channel: String,
    pub max_sessions_per_room: usize,
    pub max_sessions: usize,
}

/// Per-connection delivery settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// Frames buffered per session. Broadcasts skip a session whose queue
    /// is full.
    pub outbound_queue: usize,
    /// How long one socket write may block before the session is dropped.
    pub send_timeout_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl DeliveryConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// Emit JSON log lines instead of the compact format.
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    /// Layering, lowest to highest: defaults, config file, `CLAIMS_` env
    /// vars (e.g. `CLAIMS_SERVER__PORT=8000`), then CLI flags and the plain
    /// env vars clap binds to them (`PORT`, `DATABASE_URL`, `REDIS_URL`).
    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.port", 8001)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("store.provider", "memory")?
            .set_default("store.max_connections", 10)?
            .set_default("registry.backend", "memory")?
            .set_default("registry.channel", "claims:rooms")?
            .set_default("registry.max_sessions_per_room", 1024)?
            .set_default("registry.max_sessions", 100_000)?
            .set_default("delivery.outbound_queue", 64)?
            .set_default("delivery.send_timeout_ms", 2000)?
            .set_default("delivery.heartbeat_interval_secs", 30)?
            .set_default("delivery.idle_timeout_secs", 120)?
            .set_default("delivery.sweep_interval_secs", 60)?
            .set_default("bridge.queue_capacity", 1024)?
            .set_default("telemetry.json", false)?;

        // An explicit file must exist; ./config.* is optional.
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("CLAIMS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(provider) = cli.store_provider {
            builder = builder.set_override("store.provider", provider)?;
        }
        if let Some(url) = cli.database_url {
            builder = builder.set_override("store.database_url", url)?;
        }
        if let Some(backend) = cli.registry_backend {
            builder = builder.set_override("registry.backend", backend)?;
        }
        if let Some(url) = cli.redis_url {
            builder = builder.set_override("registry.redis_url", url)?;
        }

        builder.build()?.try_deserialize()
    }
}
