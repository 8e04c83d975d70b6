//! Application configuration.
//!
//! Configuration is a YAML document loaded through the `config` crate,
//! overridden by CLI flags (see the server binary). Zero or missing values
//! fall back to the defaults below, matching the documented configuration
//! surface:
//!
//! ```yaml
//! proxy_url: https://api.node.example.com/rpc/v0
//! jwt_secret: secret
//! cache_methods:
//!   - name: Filecoin.ChainHead
//!     cache_by_params: false
//!   - name: Filecoin.StateMinerPower
//!     cache_by_params: true
//!     params_in_cache_by_id: [0]
//! ```
//!
//! Validation is fatal at startup; a config that fails [`AppConfig::validate`]
//! never produces a running proxy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_CACHE_EXPIRATION: u64 = 0;
pub const DEFAULT_CACHE_CLEANUP_INTERVAL: i64 = -1;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_JWT_ALGORITHM: &str = "HS256";
const DEFAULT_CUSTOM_CACHE_PERIOD: u64 = 600;
const DEFAULT_USER_CACHE_PERIOD: u64 = 3600;
const DEFAULT_REQUESTS_BATCH_SIZE: usize = 5;
const DEFAULT_REQUESTS_CONCURRENCY: usize = 10;
const DEFAULT_SHUTDOWN_TIMEOUT: u64 = 20;
const DEFAULT_REDIS_POOL_SIZE: u32 = 10;
const DEFAULT_REDIS_HASH_NAME: &str = "filecoin";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_FORMAT: &str = "pretty";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How a configured method originates cache entries.
///
/// `Regular` methods are cached from real client traffic only; `Custom`
/// methods are synthetic calls the refresh worker issues with fixed
/// parameters to warm the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    Regular,
    Custom,
}

impl MethodKind {
    pub fn is_custom(self) -> bool {
        self == MethodKind::Custom
    }
}

/// Cache storage backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStorage {
    #[default]
    Memory,
    Redis,
}

/// One configured key scheme for a method.
///
/// A method name may appear multiple times in `cache_methods`; each
/// occurrence adds an independent key scheme to the matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMethodConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub cache_by_params: bool,
    #[serde(default)]
    pub no_store_cache: bool,
    #[serde(default)]
    pub no_update_cache: bool,
    #[serde(default)]
    pub params_in_cache_by_id: Vec<usize>,
    #[serde(default)]
    pub params_in_cache_by_name: Vec<String>,
    #[serde(default)]
    pub kind: Option<MethodKind>,
    #[serde(default)]
    pub params_for_request: Option<Value>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    /// Entry lifetime in seconds; 0 means entries never expire.
    #[serde(default)]
    pub expiration: u64,
    /// Janitor sweep period in seconds; a negative value disables the janitor.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: i64,
}

fn default_cleanup_interval() -> i64 {
    DEFAULT_CACHE_CLEANUP_INTERVAL
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            expiration: DEFAULT_CACHE_EXPIRATION,
            cleanup_interval: DEFAULT_CACHE_CLEANUP_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisCacheConfig {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub pool_size: u32,
    /// Skip certificate verification for `rediss` URIs. Off by default.
    #[serde(default)]
    pub tls_insecure: bool,
    /// Name of the hash holding all cache entries.
    #[serde(default)]
    pub hash_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub storage: CacheStorage,
    #[serde(default)]
    pub memory: MemoryCacheConfig,
    #[serde(default)]
    pub redis: RedisCacheConfig,
}

/// Root configuration for the proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub cache_methods: Vec<CacheMethodConfig>,
    #[serde(default)]
    pub jwt_alg: String,
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default)]
    pub jwt_secret_base64: String,
    #[serde(default)]
    pub jwt_permissions: Vec<String>,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub update_custom_cache_period: u64,
    #[serde(default)]
    pub update_user_cache_period: u64,
    #[serde(default)]
    pub requests_batch_size: usize,
    #[serde(default)]
    pub requests_concurrency: usize,
    #[serde(default)]
    pub shutdown_timeout: u64,
    #[serde(default)]
    pub proxy_url: String,
    #[serde(default)]
    pub cache_settings: CacheSettings,
    #[serde(default)]
    pub log_level: String,
    #[serde(default)]
    pub log_format: String,
    /// Dump every forwarded upstream request at debug level.
    #[serde(default)]
    pub debug_http_request: bool,
    /// Dump every upstream response body at debug level.
    #[serde(default)]
    pub debug_http_response: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut cfg = Self {
            cache_methods: Vec::new(),
            jwt_alg: String::new(),
            jwt_secret: String::new(),
            jwt_secret_base64: String::new(),
            jwt_permissions: Vec::new(),
            host: String::new(),
            port: 0,
            update_custom_cache_period: 0,
            update_user_cache_period: 0,
            requests_batch_size: 0,
            requests_concurrency: 0,
            shutdown_timeout: 0,
            proxy_url: String::new(),
            cache_settings: CacheSettings::default(),
            log_level: String::new(),
            log_format: String::new(),
            debug_http_request: false,
            debug_http_response: false,
        };
        cfg.normalize();
        cfg
    }
}

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub jwt_secret: Option<String>,
    pub proxy_url: Option<String>,
    pub redis_uri: Option<String>,
}

impl AppConfig {
    /// Loads and normalizes a YAML config file; validation is left to the
    /// caller so overrides can be applied first.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Yaml))
            .build()?;
        let mut cfg: AppConfig = settings.try_deserialize()?;
        cfg.normalize();
        Ok(cfg)
    }

    /// Parses a YAML document from a string. Used by tests.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Yaml))
            .build()?;
        let mut cfg: AppConfig = settings.try_deserialize()?;
        cfg.normalize();
        Ok(cfg)
    }

    /// Loads, overrides, and validates in one step.
    pub fn load(path: &str, overrides: CliOverrides) -> Result<Self, ConfigError> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_overrides(&mut self, overrides: CliOverrides) {
        if let Some(secret) = overrides.jwt_secret {
            self.jwt_secret = secret;
        }
        if let Some(url) = overrides.proxy_url {
            self.proxy_url = url;
        }
        if let Some(uri) = overrides.redis_uri {
            self.cache_settings.redis.uri = uri;
        }
    }

    /// Replaces zero and empty values with defaults, infers method kinds,
    /// and escalates the log level when HTTP debugging is requested.
    pub fn normalize(&mut self) {
        if self.log_level.is_empty() {
            self.log_level = DEFAULT_LOG_LEVEL.to_string();
        }
        if self.log_format.is_empty() {
            self.log_format = DEFAULT_LOG_FORMAT.to_string();
        }
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.host.is_empty() {
            self.host = DEFAULT_HOST.to_string();
        }
        if self.jwt_alg.is_empty() {
            self.jwt_alg = DEFAULT_JWT_ALGORITHM.to_string();
        }
        if self.jwt_permissions.is_empty() {
            self.jwt_permissions = vec!["read".to_string()];
        }
        if self.update_custom_cache_period == 0 {
            self.update_custom_cache_period = DEFAULT_CUSTOM_CACHE_PERIOD;
        }
        if self.update_user_cache_period == 0 {
            self.update_user_cache_period = DEFAULT_USER_CACHE_PERIOD;
        }
        if self.requests_batch_size == 0 {
            self.requests_batch_size = DEFAULT_REQUESTS_BATCH_SIZE;
        }
        if self.requests_concurrency == 0 {
            self.requests_concurrency = DEFAULT_REQUESTS_CONCURRENCY;
        }
        if self.shutdown_timeout == 0 {
            self.shutdown_timeout = DEFAULT_SHUTDOWN_TIMEOUT;
        }
        if self.debug_http_request || self.debug_http_response {
            self.log_level = "debug".to_string();
        }
        if self.cache_settings.redis.pool_size == 0 {
            self.cache_settings.redis.pool_size = DEFAULT_REDIS_POOL_SIZE;
        }
        if self.cache_settings.redis.hash_name.is_empty() {
            self.cache_settings.redis.hash_name = DEFAULT_REDIS_HASH_NAME.to_string();
        }
        if self.cache_settings.memory.cleanup_interval == 0 {
            self.cache_settings.memory.cleanup_interval = DEFAULT_CACHE_CLEANUP_INTERVAL;
        }
        for method in &mut self.cache_methods {
            if method.kind.is_none() {
                method.kind = Some(if method.params_for_request.is_some() {
                    MethodKind::Custom
                } else {
                    MethodKind::Regular
                });
            }
        }
    }

    /// The JWT secret bytes: raw secret if set, otherwise the decoded
    /// base64 variant.
    pub fn jwt_secret_bytes(&self) -> Vec<u8> {
        use base64::Engine as _;

        if !self.jwt_secret.is_empty() {
            return self.jwt_secret.clone().into_bytes();
        }
        base64::engine::general_purpose::STANDARD
            .decode(&self.jwt_secret_base64)
            .unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for method in &self.cache_methods {
            let kind = method.kind.ok_or_else(|| {
                ConfigError::Invalid(format!("method {} has no kind", method.name))
            })?;
            if kind.is_custom() && method.params_for_request.is_none() {
                return Err(ConfigError::Invalid(
                    "custom method type should have been set with params_for_request".to_string(),
                ));
            }
            if !kind.is_custom() && method.params_for_request.is_some() {
                return Err(ConfigError::Invalid(
                    "regular method type should not have been set with params_for_request"
                        .to_string(),
                ));
            }
        }
        if self.proxy_url.is_empty() {
            return Err(ConfigError::Invalid(
                "proxy_url is a mandatory parameter".to_string(),
            ));
        }
        if let Err(err) = url::Url::parse(&self.proxy_url) {
            return Err(ConfigError::Invalid(format!(
                "cannot parse proxy_url: {err}"
            )));
        }
        if self.cache_settings.storage == CacheStorage::Redis {
            if self.cache_settings.redis.uri.is_empty() {
                return Err(ConfigError::Invalid(
                    "uri is a required parameter for the redis cache".to_string(),
                ));
            }
            if let Err(err) = url::Url::parse(&self.cache_settings.redis.uri) {
                return Err(ConfigError::Invalid(format!(
                    "cannot parse redis uri: {err}"
                )));
            }
        }
        if self.jwt_secret.is_empty() && self.jwt_secret_base64.is_empty() {
            return Err(ConfigError::Invalid(
                "jwt secret is a mandatory parameter".to_string(),
            ));
        }
        if self.jwt_secret.is_empty() && self.jwt_secret_bytes().is_empty() {
            return Err(ConfigError::Invalid(
                "jwt_secret_base64 is not valid base64".to_string(),
            ));
        }
        Ok(())
    }
}
