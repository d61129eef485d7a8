use std::sync::Arc;

use anyhow::Context;
use config::Config as CConfig;
use tokio::time::Duration;

use crate::error::ConfigError;
use crate::exchange::ExchangeOptions;
use crate::pacing::Pacing;
use crate::payload::PayloadSource;
use crate::transport::Endpoint;

pub const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "LOADGEN";

// Retrying is bounded so a dead endpoint can't stretch a session forever.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

// Each in-flight exchange holds a read buffer of `read_bound` bytes, so with
// thousands of sessions this caps the per-session memory.
pub const MAX_READ_BOUND: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Template,
    Fixtures,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub host: String,
    pub port: u32,
    pub client_count: usize,
    pub iterations_per_client: usize,
    pub pacing_min_ms: u64,
    pub pacing_max_ms: u64,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
    pub read_bound: usize,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub deadline_ms: Option<u64>,
    pub sequential: bool,
    pub payload: PayloadKind,
    pub template: String,
    pub fixtures: Vec<String>,
}

impl Config {
    /// Loads `path` if it exists, then applies `LOADGEN_*` environment overrides.
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let c = CConfig::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .with_context(|| format!("Error reading config from {}", path))?;
        let config: Self = c.try_deserialize()?;
        if std::env::var_os("RUST_LOG").is_none() {
            std::env::set_var("RUST_LOG", &config.log_level);
        }
        Ok(config)
    }

    /// Validates every field and freezes the result into a `LoadPlan`.
    pub fn plan(&self) -> Result<LoadPlan, ConfigError> {
        let endpoint = self.endpoint()?;
        if self.client_count == 0 {
            return Err(ConfigError::ZeroClients);
        }
        if self.iterations_per_client == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        let pacing = Pacing::from_millis(self.pacing_min_ms, self.pacing_max_ms)?;
        if self.read_bound == 0 {
            return Err(ConfigError::ZeroReadBound);
        }
        if self.read_bound > MAX_READ_BOUND {
            return Err(ConfigError::ReadBoundTooLarge {
                bound: self.read_bound,
                max: MAX_READ_BOUND,
            });
        }
        if self.retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::TooManyRetries {
                attempts: self.retry_attempts,
                max: MAX_RETRY_ATTEMPTS,
            });
        }
        let payload = match self.payload {
            PayloadKind::Template if self.template.is_empty() => {
                return Err(ConfigError::EmptyTemplate)
            }
            PayloadKind::Template => PayloadSource::template(&self.template),
            PayloadKind::Fixtures if self.fixtures.is_empty() => {
                return Err(ConfigError::EmptyFixtures)
            }
            PayloadKind::Fixtures => PayloadSource::fixtures(&self.fixtures),
        };

        Ok(LoadPlan {
            endpoint: Arc::new(endpoint),
            client_count: self.client_count,
            iterations_per_client: self.iterations_per_client,
            pacing,
            exchange: ExchangeOptions {
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
                io_timeout: Duration::from_millis(self.io_timeout_ms),
                read_bound: self.read_bound,
                retry_attempts: self.retry_attempts,
                retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            },
            payload: Arc::new(payload),
            deadline: self.deadline_ms.map(Duration::from_millis),
            sequential: self.sequential,
        })
    }

    fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        let host = self.host.trim();
        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidHost(self.host.clone()));
        }
        let port = u16::try_from(self.port)
            .ok()
            .filter(|port| *port != 0)
            .ok_or(ConfigError::InvalidPort(self.port))?;
        Ok(Endpoint::new(host, port))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            host: "127.0.0.1".to_string(),
            port: 6379,
            client_count: 1000,
            iterations_per_client: 100,
            pacing_min_ms: 100,
            pacing_max_ms: 500,
            connect_timeout_ms: 5_000,
            io_timeout_ms: 5_000,
            read_bound: 1024,
            retry_attempts: 0,
            retry_backoff_ms: 50,
            deadline_ms: None,
            sequential: false,
            payload: PayloadKind::Template,
            template: "Message {iteration} from client {client}\n".to_string(),
            fixtures: vec![
                "+hello\r\n".to_string(),
                "$5\r\nworld\r\n".to_string(),
                "test message\n".to_string(),
            ],
        }
    }
}

/// A validated run description. Shared parts are behind `Arc` so every
/// session can hold them without copying.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub endpoint: Arc<Endpoint>,
    pub client_count: usize,
    pub iterations_per_client: usize,
    pub pacing: Pacing,
    pub exchange: ExchangeOptions,
    pub payload: Arc<PayloadSource>,
    pub deadline: Option<Duration>,
    pub sequential: bool,
}
