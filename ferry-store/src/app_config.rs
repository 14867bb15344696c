use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageBackend,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub reservation: ReservationConfig,
    pub payment: PaymentConfig,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// Process-local store. Single instance only; for demos and tests.
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 { 10 }
fn default_acquire_timeout() -> u64 { 3 }

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Transactional executor policy: retries, backoff and per-transaction timeout.
#[derive(Debug, Deserialize, Clone)]
pub struct ExecutorConfig {
    pub max_attempts: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub timeout_ms: u64,
    pub isolation: IsolationLevel,
    pub lock_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 50,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            timeout_ms: 10_000,
            isolation: IsolationLevel::ReadCommitted,
            lock_timeout_ms: 5_000,
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Claim-session windows and sweep cadence.
#[derive(Debug, Deserialize, Clone)]
pub struct ReservationConfig {
    pub hold_window_secs: i64,
    pub payment_window_secs: i64,
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: i64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            hold_window_secs: 13 * 60,
            payment_window_secs: 8 * 60,
            sweep_interval_secs: 30,
            sweep_batch_size: 100,
        }
    }
}

impl ReservationConfig {
    pub fn hold_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.hold_window_secs)
    }

    pub fn payment_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.payment_window_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    pub base_url: String,
    pub api_key: String,
    pub merchant_code: String,
    pub callback_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 { 10 }

#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    pub from_address: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Untracked local overrides
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `FERRY_DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("FERRY").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_defaults_match_operational_windows() {
        let r = ReservationConfig::default();
        assert_eq!(r.hold_window(), chrono::Duration::minutes(13));
        assert_eq!(r.payment_window(), chrono::Duration::minutes(8));
    }

    #[test]
    fn deserializes_layered_sources() {
        let toml = r#"
            storage = "memory"

            [server]
            port = 8080

            [database]
            url = "postgres://localhost/ferry"

            [executor]
            max_attempts = 5
            initial_delay_ms = 10
            max_delay_ms = 100
            multiplier = 1.5
            timeout_ms = 2000
            isolation = "serializable"
            lock_timeout_ms = 500

            [payment]
            base_url = "https://gateway.test"
            api_key = "key"
            merchant_code = "T0001"
            callback_url = "https://ferry.test/v1/webhooks/payments"

            [notifier]
            from_address = "noreply@ferry.test"
        "#;

        let cfg: Config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.storage, StorageBackend::Memory);
        assert_eq!(cfg.executor.isolation, IsolationLevel::Serializable);
        assert_eq!(cfg.executor.max_attempts, 5);
        assert_eq!(cfg.database.max_connections, 10);
        assert_eq!(cfg.reservation.sweep_batch_size, 100);
        assert_eq!(cfg.payment.request_timeout_secs, 10);
    }
}
