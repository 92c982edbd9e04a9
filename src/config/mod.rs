use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required env var: {0}")]
    MissingEnv(String),
    #[error("invalid value for {field}: {value}")]
    Invalid { field: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub marketplace: MarketplaceConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream marketplace environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Server {
    Localhost,
    Test,
    Production,
}

impl Server {
    pub fn api_url(&self) -> &'static str {
        match self {
            Server::Localhost => "http://localhost:8080/v1",
            Server::Test => "https://test.api.northstake.dk/v1",
            Server::Production => "https://api.northstake.dk/v1",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Server::Production)
    }
}

impl std::str::FromStr for Server {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "localhost" => Ok(Server::Localhost),
            "test" => Ok(Server::Test),
            "production" => Ok(Server::Production),
            other => Err(ConfigError::Invalid {
                field: "server",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Server::Localhost => write!(f, "localhost"),
            Server::Test => write!(f, "test"),
            Server::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceConfig {
    #[serde(default = "default_server")]
    pub server: Server,
    /// Overrides the URL derived from `server`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// API key - loaded from env RFQ_API_KEY
    #[serde(default)]
    pub api_key: String,
    /// Signing key - loaded from env RFQ_PRIVATE_KEY
    #[serde(default)]
    pub private_key: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    /// Fixed period between document fetches.
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// How many dismissed event identities are remembered.
    #[serde(default = "default_dismissed_capacity")]
    pub dismissed_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// HTTP JSON-RPC endpoint used for submitting and tracking transactions.
    #[serde(default)]
    pub rpc_url: String,
    /// Wallet private key (hex) - loaded from env RFQ_WALLET_KEY
    #[serde(default)]
    pub wallet_key: String,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    #[serde(default = "default_receipt_poll_ms")]
    pub receipt_poll_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_server() -> Server {
    Server::Test
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    10_000
}
fn default_dismissed_capacity() -> usize {
    256
}
fn default_receipt_timeout_secs() -> u64 {
    300
}
fn default_receipt_poll_ms() -> u64 {
    2_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            base_url: None,
            api_key: String::new(),
            private_key: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            dismissed_capacity: default_dismissed_capacity(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            wallet_key: String::new(),
            receipt_timeout_secs: default_receipt_timeout_secs(),
            receipt_poll_ms: default_receipt_poll_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            marketplace: MarketplaceConfig::default(),
            poller: PollerConfig::default(),
            notifications: NotificationConfig::default(),
            chain: ChainConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl MarketplaceConfig {
    pub fn api_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.server.api_url().to_string())
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl ChainConfig {
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms)
    }

    pub fn has_wallet(&self) -> bool {
        !self.rpc_url.is_empty() && !self.wallet_key.is_empty()
    }
}

/// Keys pasted into `.env` files often carry literal `\n` sequences.
fn unescape_newlines(value: &str) -> String {
    value.replace("\\n", "\n")
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables for secrets.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults plus environment; no file needed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Secrets never live in the config file
        if let Ok(server) = std::env::var("RFQ_SERVER") {
            self.marketplace.server = server.parse()?;
        }
        if let Ok(url) = std::env::var("RFQ_API_URL") {
            self.marketplace.base_url = Some(url);
        }
        if let Ok(key) = std::env::var("RFQ_API_KEY") {
            self.marketplace.api_key = key;
        }
        if let Ok(key) = std::env::var("RFQ_PRIVATE_KEY") {
            self.marketplace.private_key = key;
        }
        if let Ok(url) = std::env::var("RFQ_RPC_URL") {
            self.chain.rpc_url = url;
        }
        if let Ok(key) = std::env::var("RFQ_WALLET_KEY") {
            self.chain.wallet_key = key;
        }
        self.marketplace.api_key = unescape_newlines(&self.marketplace.api_key);
        self.marketplace.private_key = unescape_newlines(&self.marketplace.private_key);
        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        !self.marketplace.api_key.is_empty() && !self.marketplace.private_key.is_empty()
    }

    /// Fails with the name of the first missing credential variable.
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        if self.marketplace.api_key.is_empty() {
            return Err(ConfigError::MissingEnv("RFQ_API_KEY".to_string()));
        }
        if self.marketplace.private_key.is_empty() {
            return Err(ConfigError::MissingEnv("RFQ_PRIVATE_KEY".to_string()));
        }
        Ok(())
    }
}
