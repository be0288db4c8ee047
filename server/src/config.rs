// Server configuration, read once from the environment at startup

use std::time::Duration;

use tracing::warn;

use crate::pipeline::DeliveryMode;

/// Where relay-mode audio goes and how it is framed.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub url: String,
    pub chunk_size: usize,
    /// Upper bound for one whole transaction (connect, send, close).
    pub timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8765".to_string(),
            chunk_size: 4096,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub delivery_mode: DeliveryMode,
    pub relay: RelayConfig,
    pub default_language: String,
    pub drain_grace_secs: u64,
    pub llm_timeout_secs: u64,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            delivery_mode: DeliveryMode::Direct,
            relay: RelayConfig::default(),
            default_language: "en".to_string(),
            drain_grace_secs: 5,
            llm_timeout_secs: 120,
            rate_limit_per_minute: 60,
            request_timeout_secs: 60,
            cors_allowed_origins: None,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let delivery_mode = match std::env::var("MODE") {
            Ok(raw) => raw.parse::<DeliveryMode>().unwrap_or_else(|e| {
                warn!("Ignoring MODE: {}; using {}", e, defaults.delivery_mode);
                defaults.delivery_mode
            }),
            Err(_) => defaults.delivery_mode,
        };

        let relay = RelayConfig {
            url: std::env::var("RELAY_URL").unwrap_or(defaults.relay.url.clone()),
            chunk_size: env_or("RELAY_CHUNK_SIZE", defaults.relay.chunk_size).max(1),
            timeout: Duration::from_secs(env_or("RELAY_TIMEOUT_SECS", defaults.relay.timeout.as_secs())),
        };

        let default_language = std::env::var("DEFAULT_LANGUAGE")
            .ok()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or(defaults.default_language.clone());

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty());

        Self {
            port: env_or("PORT", defaults.port),
            delivery_mode,
            relay,
            default_language,
            drain_grace_secs: env_or("DRAIN_GRACE_SECS", defaults.drain_grace_secs),
            llm_timeout_secs: env_or("LLM_TIMEOUT_SECS", defaults.llm_timeout_secs),
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            cors_allowed_origins,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }
}
