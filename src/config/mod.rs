use chrono::Duration;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub store: StoreBackend,
    pub database: DatabaseConfig,
    pub elevation: ElevationConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

/// Where requests, sessions and the audit log live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreBackend {
    Postgres,
    /// Single-process, non-durable. Development and tests only.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub enable_request_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub run_migrations: bool,
}

/// Lifecycle constants handed to the broker at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevationConfig {
    /// How long a target has to answer a request (T_approve).
    pub approval_window_secs: u64,
    /// Hard lifetime of an approved session (T_session).
    pub session_duration_secs: u64,
    pub max_reason_chars: usize,
    /// Reaper cadence for overdue requests/sessions whose timers were lost.
    pub sweep_interval_secs: u64,
    /// How often the state stream re-sends a snapshot without any event.
    pub state_refresh_secs: u64,
    pub store_retry_attempts: u32,
    pub store_retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    #[serde(skip_serializing)]
    pub jwt_secret: String,
}

/// Upper bound for the approval window and session duration.
pub const MAX_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

const DEFAULT_APPROVAL_WINDOW_SECS: u64 = 5 * 60;
const DEFAULT_SESSION_DURATION_SECS: u64 = 30 * 60;

fn window_in_range(secs: u64) -> bool {
    (1..=MAX_WINDOW_SECS).contains(&secs)
}

/// Out-of-range values fall back to `default` so window arithmetic never overflows.
fn window(secs: u64, default: u64) -> Duration {
    let secs = if window_in_range(secs) { secs } else { default };
    Duration::seconds(secs as i64)
}

impl ElevationConfig {
    pub fn approval_window(&self) -> Duration {
        window(self.approval_window_secs, DEFAULT_APPROVAL_WINDOW_SECS)
    }

    pub fn session_duration(&self) -> Duration {
        window(self.session_duration_secs, DEFAULT_SESSION_DURATION_SECS)
    }

    /// Reset windows outside `1..=MAX_WINDOW_SECS` to their defaults, with a warning.
    pub fn sanitize(&mut self) {
        if !window_in_range(self.approval_window_secs) {
            tracing::warn!(
                "Approval window of {}s is out of range, using {}s",
                self.approval_window_secs,
                DEFAULT_APPROVAL_WINDOW_SECS
            );
            self.approval_window_secs = DEFAULT_APPROVAL_WINDOW_SECS;
        }
        if !window_in_range(self.session_duration_secs) {
            tracing::warn!(
                "Session duration of {}s is out of range, using {}s",
                self.session_duration_secs,
                DEFAULT_SESSION_DURATION_SECS
            );
            self.session_duration_secs = DEFAULT_SESSION_DURATION_SECS;
        }
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn state_refresh(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.state_refresh_secs.max(1))
    }

    pub fn retry_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.store_retry_backoff_ms)
    }
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            approval_window_secs: DEFAULT_APPROVAL_WINDOW_SECS,
            session_duration_secs: DEFAULT_SESSION_DURATION_SECS,
            max_reason_chars: 500,
            sweep_interval_secs: 30,
            state_refresh_secs: 5,
            store_retry_attempts: 3,
            store_retry_backoff_ms: 50,
        }
    }
}

impl Environment {
    fn from_env() -> Self {
        match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

/// Replace `slot` with the parsed value of `key` when it is set and parses.
fn override_from<T: FromStr>(key: &str, slot: &mut T) {
    let Ok(raw) = env::var(key) else { return };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!("Ignoring unparseable {}={:?}", key, raw),
    }
}

impl AppConfig {
    /// Environment preset, then individual variables on top.
    pub fn from_env() -> Self {
        let mut config = Self::preset(Environment::from_env());
        config.apply_env();
        config.elevation.sanitize();
        config
    }

    fn apply_env(&mut self) {
        override_from("PORT", &mut self.server.port);
        override_from("BROKER_PORT", &mut self.server.port);
        override_from("SERVER_ENABLE_REQUEST_LOGGING", &mut self.server.enable_request_logging);

        match env::var("STORE_BACKEND").as_deref() {
            Ok("memory") => self.store = StoreBackend::Memory,
            Ok("postgres") => self.store = StoreBackend::Postgres,
            Ok(other) => tracing::warn!("Unknown STORE_BACKEND {:?}, keeping {:?}", other, self.store),
            Err(_) => {}
        }

        if let Ok(url) = env::var("DATABASE_URL") {
            self.database.url = Some(url);
        }
        override_from("DATABASE_MAX_CONNECTIONS", &mut self.database.max_connections);
        override_from("DATABASE_CONNECTION_TIMEOUT", &mut self.database.connection_timeout);
        override_from("DATABASE_RUN_MIGRATIONS", &mut self.database.run_migrations);

        let elevation = &mut self.elevation;
        override_from("ELEVATION_APPROVAL_WINDOW_SECS", &mut elevation.approval_window_secs);
        override_from("ELEVATION_SESSION_DURATION_SECS", &mut elevation.session_duration_secs);
        override_from("ELEVATION_MAX_REASON_CHARS", &mut elevation.max_reason_chars);
        override_from("ELEVATION_SWEEP_INTERVAL_SECS", &mut elevation.sweep_interval_secs);
        override_from("ELEVATION_STATE_REFRESH_SECS", &mut elevation.state_refresh_secs);
        override_from("ELEVATION_STORE_RETRY_ATTEMPTS", &mut elevation.store_retry_attempts);
        override_from("ELEVATION_STORE_RETRY_BACKOFF_MS", &mut elevation.store_retry_backoff_ms);

        override_from("SECURITY_ENABLE_CORS", &mut self.security.enable_cors);
        if let Ok(origins) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(secret) = env::var("JWT_SECRET") {
            self.security.jwt_secret = secret;
        }
    }

    fn preset(environment: Environment) -> Self {
        let mut config = Self {
            environment: environment.clone(),
            server: ServerConfig {
                port: 3000,
                enable_request_logging: true,
            },
            store: StoreBackend::Postgres,
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
                run_migrations: true,
            },
            elevation: ElevationConfig::default(),
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["http://localhost:5173".to_string()],
                jwt_secret: String::new(),
            },
        };

        match environment {
            Environment::Development => {}
            Environment::Staging => {
                config.database.max_connections = 20;
                config.database.connection_timeout = 10;
                config.elevation.sweep_interval_secs = 15;
                config.security.cors_origins = vec!["https://support.staging.example.com".to_string()];
            }
            Environment::Production => {
                config.server.port = 8080;
                config.server.enable_request_logging = false;
                config.database.max_connections = 50;
                config.database.connection_timeout = 5;
                // Schema changes ship through the deploy pipeline
                config.database.run_migrations = false;
                config.elevation.sweep_interval_secs = 10;
                config.elevation.store_retry_attempts = 5;
                config.security.cors_origins = vec!["https://support.example.com".to_string()];
            }
        }
        config
    }
}

/// Read once, on first access.
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[macro_export]
macro_rules! is_production {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Production)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lifecycle_windows() {
        let config = AppConfig::preset(Environment::Development);
        assert_eq!(config.elevation.approval_window(), Duration::minutes(5));
        assert_eq!(config.elevation.session_duration(), Duration::minutes(30));
        assert_eq!(config.store, StoreBackend::Postgres);
    }

    #[test]
    fn production_preset_tightens_sweep_and_retries() {
        let config = AppConfig::preset(Environment::Production);
        assert!(!config.database.run_migrations);
        assert!(!config.server.enable_request_logging);
        assert_eq!(config.elevation.approval_window_secs, 300);
        assert_eq!(config.elevation.store_retry_attempts, 5);
        assert_eq!(config.elevation.sweep_interval_secs, 10);
    }

    #[test]
    fn override_keeps_value_when_unparseable() {
        env::set_var("BROKER_TEST_OVERRIDE_BAD", "soon");
        env::set_var("BROKER_TEST_OVERRIDE_GOOD", " 42 ");
        let mut bad = 7u64;
        let mut good = 7u64;
        override_from("BROKER_TEST_OVERRIDE_BAD", &mut bad);
        override_from("BROKER_TEST_OVERRIDE_GOOD", &mut good);
        override_from("BROKER_TEST_OVERRIDE_UNSET", &mut good);
        assert_eq!(bad, 7);
        assert_eq!(good, 42);
    }

    #[test]
    fn intervals_never_zero() {
        let config = ElevationConfig { sweep_interval_secs: 0, state_refresh_secs: 0, ..Default::default() };
        assert_eq!(config.sweep_interval(), std::time::Duration::from_secs(1));
        assert_eq!(config.state_refresh(), std::time::Duration::from_secs(1));
    }

    #[test]
    fn out_of_range_windows_fall_back_to_defaults() {
        let mut config = ElevationConfig {
            approval_window_secs: u64::MAX,
            session_duration_secs: 100_000_000_000_000_000,
            ..Default::default()
        };
        assert_eq!(config.approval_window(), Duration::minutes(5));
        assert_eq!(config.session_duration(), Duration::minutes(30));

        config.sanitize();
        assert_eq!(config.approval_window_secs, 300);
        assert_eq!(config.session_duration_secs, 1800);
    }

    #[test]
    fn zero_windows_are_rejected() {
        let mut config = ElevationConfig {
            approval_window_secs: 0,
            session_duration_secs: 0,
            ..Default::default()
        };
        config.sanitize();
        assert_eq!(config.approval_window(), Duration::minutes(5));
        assert_eq!(config.session_duration(), Duration::minutes(30));

        let mut week = ElevationConfig {
            approval_window_secs: MAX_WINDOW_SECS,
            ..Default::default()
        };
        week.sanitize();
        assert_eq!(week.approval_window(), Duration::days(7));
    }
}
