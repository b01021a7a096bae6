//! # Relay Configuration
//!
//! Built once at startup from the environment and shared read-only.
//!
//! ## Security Requirements
//!
//! - the shared secret is resolved separately (see `secret`) and never has
//!   an insecure default
//! - all timeouts and limits have sane defaults with override capability

use relay_bus::{fanout_channel, DEFAULT_CHANNEL, DEFAULT_NONCE_NAMESPACE};
use relay_gateway::WebSocketConfig;
use relay_types::{DEFAULT_MAX_SKEW_SECS, DEFAULT_NONCE_TTL_SECS};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    /// No secret source is configured.
    #[error(
        "No shared secret configured. Set HMAC_SECRET_KEY, APP_SECRET_KEY or SECRET_KEY_PATH, \
         or RELAY_AUTO_SECRET_PATH to generate one"
    )]
    MissingSecret,

    #[error("Shared secret from {source_name} is empty")]
    EmptySecret { source_name: String },

    #[error("Failed to access secret file {path}: {source}")]
    SecretFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Redis connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl RedisConfig {
    /// `redis://[:password@]host:port`
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}", password, self.host, self.port),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
        }
    }
}

/// Complete relay process configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub redis: RedisConfig,
    /// Bus channel carrying signed envelopes.
    pub channel: String,
    /// Relay-to-relay channel for envelopes that won the nonce claim.
    pub fanout_channel: String,
    /// Store key namespace, `<ns>:nonce:<nonce>`.
    pub nonce_namespace: String,
    pub max_skew_secs: u64,
    pub nonce_ttl: Duration,
    /// Replay-check round-trip timeout.
    pub store_timeout: Duration,
    pub bind_addr: SocketAddr,
    pub websocket: WebSocketConfig,
    pub store_health_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            channel: DEFAULT_CHANNEL.to_string(),
            fanout_channel: fanout_channel(DEFAULT_CHANNEL),
            nonce_namespace: DEFAULT_NONCE_NAMESPACE.to_string(),
            max_skew_secs: DEFAULT_MAX_SKEW_SECS,
            nonce_ttl: Duration::from_secs(DEFAULT_NONCE_TTL_SECS),
            store_timeout: Duration::from_millis(2000),
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000),
            websocket: WebSocketConfig::default(),
            store_health_interval: Duration::from_secs(10),
        }
    }
}

impl RelayConfig {
    /// Load from process environment variables.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] when a variable is set but unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable source. Unset or blank variables keep
    /// their defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] when a variable is set but unparsable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(host) = get("REDIS_HOST") {
            config.redis.host = host;
        }
        if let Some(port) = parse(&get, "REDIS_PORT")? {
            config.redis.port = port;
        }
        config.redis.password = get("REDIS_PASSWORD");

        if let Some(channel) = get("RELAY_CHANNEL") {
            config.channel = channel;
        }
        config.fanout_channel =
            get("RELAY_FANOUT_CHANNEL").unwrap_or_else(|| fanout_channel(&config.channel));
        if config.fanout_channel == config.channel {
            return Err(ConfigError::InvalidValue {
                var: "RELAY_FANOUT_CHANNEL",
                value: config.fanout_channel,
            });
        }
        if let Some(namespace) = get("RELAY_NONCE_NAMESPACE") {
            config.nonce_namespace = namespace;
        }
        if let Some(skew) = parse(&get, "RELAY_MAX_SKEW_SECS")? {
            config.max_skew_secs = skew;
        }
        if let Some(ttl) = parse(&get, "RELAY_NONCE_TTL_SECS")? {
            config.nonce_ttl = Duration::from_secs(ttl);
        }
        if let Some(timeout) = parse(&get, "RELAY_STORE_TIMEOUT_MS")? {
            config.store_timeout = Duration::from_millis(timeout);
        }

        let port: u16 = parse(&get, "PORT")?.unwrap_or(config.bind_addr.port());
        let ip: IpAddr = parse(&get, "RELAY_BIND_ADDR")?.unwrap_or(config.bind_addr.ip());
        config.bind_addr = SocketAddr::new(ip, port);

        if let Some(size) = parse(&get, "RELAY_MAX_MESSAGE_SIZE")? {
            config.websocket.max_message_size = size;
        }
        if let Some(rate) = parse(&get, "RELAY_CLIENT_RATE_LIMIT")? {
            config.websocket.rate_limit = rate;
        }
        if let Some(buffer) = parse::<usize, _>(&get, "RELAY_OUTBOUND_BUFFER")? {
            if buffer == 0 {
                return Err(ConfigError::InvalidValue {
                    var: "RELAY_OUTBOUND_BUFFER",
                    value: buffer.to_string(),
                });
            }
            config.websocket.outbound_buffer = buffer;
        }
        if let Some(secs) = parse(&get, "RELAY_PING_INTERVAL_SECS")? {
            config.websocket.ping_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&get, "RELAY_IDLE_TIMEOUT_SECS")? {
            config.websocket.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&get, "RELAY_STORE_HEALTH_INTERVAL_SECS")? {
            config.store_health_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn parse<T, G>(get: &G, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}
