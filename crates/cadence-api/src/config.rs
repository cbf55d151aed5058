//! Service configuration.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use cadence_core::{PoolConfig, ScheduleConfig};
use cadence_hub::{ClientConfig, EngineConfig};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::middleware::auth::AdminCredentials;

const CONFIG_FILE: &str = "config.toml";

/// Complete service configuration.
///
/// Loaded in priority order, highest first:
/// 1. Environment variables (`DATABASE_URL`, `PORT`, `HUB_URL`, ...)
/// 2. `config.toml` in the working directory
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// SQLite connection URL.
    ///
    /// Environment variable: `DATABASE_URL`
    #[serde(default = "default_database_url", alias = "DATABASE_URL")]
    pub database_url: String,
    /// Maximum pooled connections.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_max_connections", alias = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,
    /// Connections kept open while idle.
    ///
    /// Environment variable: `DATABASE_MIN_CONNECTIONS`
    #[serde(default = "default_min_connections", alias = "DATABASE_MIN_CONNECTIONS")]
    pub database_min_connections: u32,
    /// Connection acquire timeout in seconds.
    ///
    /// Environment variable: `DATABASE_CONNECTION_TIMEOUT`
    #[serde(default = "default_acquire_timeout", alias = "DATABASE_CONNECTION_TIMEOUT")]
    pub database_connection_timeout: u64,

    // Server
    /// Bind address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    /// Bind port.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,
    /// Per-request timeout in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT")]
    pub request_timeout: u64,

    // Hub
    /// Hub base URL.
    ///
    /// Environment variable: `HUB_URL`
    #[serde(default = "default_hub_url", alias = "HUB_URL")]
    pub hub_url: String,
    /// Hub request timeout in seconds.
    ///
    /// Environment variable: `HUB_TIMEOUT_SECONDS`
    #[serde(default = "default_hub_timeout", alias = "HUB_TIMEOUT_SECONDS")]
    pub hub_timeout_seconds: u64,
    /// Updates per upload request.
    ///
    /// Environment variable: `HUB_BATCH_SIZE`
    #[serde(default = "default_hub_batch_size", alias = "HUB_BATCH_SIZE")]
    pub hub_batch_size: usize,
    /// Seconds between upload passes.
    ///
    /// Environment variable: `HUB_UPLOAD_INTERVAL_SECONDS`
    #[serde(default = "default_upload_interval", alias = "HUB_UPLOAD_INTERVAL_SECONDS")]
    pub hub_upload_interval_seconds: u64,

    // Scheduler
    /// Seconds between schedule passes.
    ///
    /// Environment variable: `SCHEDULE_INTERVAL_SECONDS`
    #[serde(default = "default_schedule_interval", alias = "SCHEDULE_INTERVAL_SECONDS")]
    pub schedule_interval_seconds: u64,
    /// Days before today a due message is still enqueued.
    ///
    /// Environment variable: `NOTIFIABLE_LOOKBACK_DAYS`
    #[serde(default = "default_lookback_days", alias = "NOTIFIABLE_LOOKBACK_DAYS")]
    pub notifiable_lookback_days: i64,
    /// Days after today a due message is already enqueued.
    ///
    /// Environment variable: `NOTIFIABLE_LOOKAHEAD_DAYS`
    #[serde(default = "default_lookahead_days", alias = "NOTIFIABLE_LOOKAHEAD_DAYS")]
    pub notifiable_lookahead_days: i64,
    /// Expiry for messages without their own.
    ///
    /// Environment variable: `DEFAULT_EXPIRE_DAYS`
    #[serde(default = "default_expire_days", alias = "DEFAULT_EXPIRE_DAYS")]
    pub default_expire_days: i64,
    /// Seconds to wait for the background loops on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout", alias = "SHUTDOWN_TIMEOUT_SECONDS")]
    pub shutdown_timeout_seconds: u64,

    // Admin
    /// Username for admin and hub routes.
    ///
    /// Environment variable: `ADMIN_USERNAME`
    #[serde(default = "default_admin_username", alias = "ADMIN_USERNAME")]
    pub admin_username: String,
    /// Password for admin and hub routes.
    ///
    /// Environment variable: `ADMIN_PASSWORD`
    #[serde(default, alias = "ADMIN_PASSWORD", skip_serializing)]
    pub admin_password: String,

    // Logging
    /// Log filter directives.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Loads defaults, then `config.toml`, then environment overrides.
    ///
    /// # Errors
    ///
    /// Returns error if a source cannot be parsed or the result is invalid.
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::file(CONFIG_FILE))
                .merge(Env::prefixed("")),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the service cannot run with.
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }
        if self.database_max_connections == 0 {
            anyhow::bail!("database max_connections must be greater than 0");
        }
        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database min_connections cannot exceed max_connections");
        }
        if self.hub_url.trim().is_empty() {
            anyhow::bail!("hub_url must be set");
        }
        if self.hub_batch_size == 0 {
            anyhow::bail!("hub_batch_size must be greater than 0");
        }
        if self.hub_upload_interval_seconds == 0 || self.schedule_interval_seconds == 0 {
            anyhow::bail!("hub and schedule intervals must be greater than 0");
        }
        if self.admin_username.is_empty() || self.admin_password.is_empty() {
            anyhow::bail!("admin_username and admin_password must be set");
        }
        self.to_schedule_config().validate().map_err(anyhow::Error::msg)?;
        Ok(())
    }

    /// Scheduling window and expiry.
    pub fn to_schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig {
            lookback_days: self.notifiable_lookback_days,
            lookahead_days: self.notifiable_lookahead_days,
            default_expire_days: self.default_expire_days,
        }
    }

    /// Hub client settings.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.hub_url.clone(),
            timeout: Duration::from_secs(self.hub_timeout_seconds),
            ..ClientConfig::default()
        }
    }

    /// Sync engine settings.
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            batch_size: self.hub_batch_size,
            schedule_interval: Duration::from_secs(self.schedule_interval_seconds),
            upload_interval: Duration::from_secs(self.hub_upload_interval_seconds),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
            ..EngineConfig::default()
        }
    }

    /// Database pool settings.
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            url: self.database_url.clone(),
            max_connections: self.database_max_connections,
            min_connections: self.database_min_connections,
            acquire_timeout: Duration::from_secs(self.database_connection_timeout),
        }
    }

    /// Credentials for guarded routes.
    pub fn admin_credentials(&self) -> AdminCredentials {
        AdminCredentials::new(self.admin_username.clone(), &self.admin_password)
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Socket address from host and port.
    ///
    /// # Errors
    ///
    /// Returns error if host and port do not form an address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
            database_connection_timeout: default_acquire_timeout(),
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            hub_url: default_hub_url(),
            hub_timeout_seconds: default_hub_timeout(),
            hub_batch_size: default_hub_batch_size(),
            hub_upload_interval_seconds: default_upload_interval(),
            schedule_interval_seconds: default_schedule_interval(),
            notifiable_lookback_days: default_lookback_days(),
            notifiable_lookahead_days: default_lookahead_days(),
            default_expire_days: default_expire_days(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            admin_username: default_admin_username(),
            admin_password: String::new(),
            rust_log: default_log_level(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://cadence.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_hub_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_hub_timeout() -> u64 {
    cadence_hub::DEFAULT_TIMEOUT_SECONDS
}

fn default_hub_batch_size() -> usize {
    cadence_hub::DEFAULT_BATCH_SIZE
}

fn default_upload_interval() -> u64 {
    60
}

fn default_schedule_interval() -> u64 {
    900
}

fn default_lookback_days() -> i64 {
    ScheduleConfig::default().lookback_days
}

fn default_lookahead_days() -> i64 {
    ScheduleConfig::default().lookahead_days
}

fn default_expire_days() -> i64 {
    ScheduleConfig::default().default_expire_days
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, env, sync::Mutex};

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct TestEnvGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        vars: Vec<String>,
        originals: HashMap<String, Option<String>>,
    }

    impl TestEnvGuard {
        fn new() -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Self { _lock: lock, vars: Vec::new(), originals: HashMap::new() }
        }

        fn set_var(&mut self, key: &str, value: &str) {
            if !self.vars.contains(&key.to_string()) {
                self.originals.insert(key.to_string(), env::var(key).ok());
                self.vars.push(key.to_string());
            }
            env::set_var(key, value);
        }
    }

    impl Drop for TestEnvGuard {
        fn drop(&mut self) {
            for var in &self.vars {
                match self.originals.get(var) {
                    Some(Some(value)) => env::set_var(var, value),
                    Some(None) => env::remove_var(var),
                    None => {},
                }
            }
        }
    }

    fn valid() -> Config {
        Config { admin_password: "secret".to_string(), ..Config::default() }
    }

    #[test]
    fn defaults_are_valid_once_a_password_is_set() {
        assert!(Config::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn env_overrides_defaults() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("DATABASE_URL", "sqlite::memory:");
        guard.set_var("PORT", "9090");
        guard.set_var("HUB_URL", "https://hub.example.org");
        guard.set_var("HUB_BATCH_SIZE", "25");
        guard.set_var("NOTIFIABLE_LOOKAHEAD_DAYS", "3");
        guard.set_var("ADMIN_USERNAME", "ops");
        guard.set_var("ADMIN_PASSWORD", "from-env");

        let config = Config::load().unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.port, 9090);
        assert_eq!(config.hub_batch_size, 25);
        assert_eq!(config.to_schedule_config().lookahead_days, 3);
        assert!(config.admin_credentials().verify("ops", "from-env"));
        assert_eq!(config.to_client_config().base_url, "https://hub.example.org");
    }

    #[test]
    fn conversions_carry_values() {
        let config = Config {
            hub_timeout_seconds: 12,
            hub_upload_interval_seconds: 30,
            schedule_interval_seconds: 600,
            database_max_connections: 4,
            ..valid()
        };

        assert_eq!(config.to_client_config().timeout, Duration::from_secs(12));
        let engine = config.to_engine_config();
        assert_eq!(engine.upload_interval, Duration::from_secs(30));
        assert_eq!(engine.schedule_interval, Duration::from_secs(600));
        assert_eq!(config.to_pool_config().max_connections, 4);
        assert_eq!(config.to_schedule_config(), ScheduleConfig::default());
    }

    #[test]
    fn invalid_values_fail_validation() {
        let cases = [
            Config { port: 0, ..valid() },
            Config { database_max_connections: 0, ..valid() },
            Config { database_min_connections: 20, database_max_connections: 10, ..valid() },
            Config { hub_url: " ".to_string(), ..valid() },
            Config { hub_batch_size: 0, ..valid() },
            Config { schedule_interval_seconds: 0, ..valid() },
            Config { notifiable_lookback_days: -1, ..valid() },
        ];

        for config in cases {
            assert!(config.validate().is_err(), "{config:?} should be invalid");
        }
    }

    #[test]
    fn password_is_never_serialized() {
        let value = serde_json::to_value(valid()).unwrap();
        assert!(value.get("admin_password").is_none());
    }

    #[test]
    fn socket_address_parsing() {
        let config = Config { host: "0.0.0.0".to_string(), port: 9000, ..valid() };
        let addr = config.parse_server_addr().unwrap();
        assert_eq!(addr.port(), 9000);
    }
}
