use std::time::Duration;

use crate::error::AppError;

#[derive(Clone, Debug)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    /// Read idle timeout per connection; 0 disables it.
    pub idle_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub max_frame_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_host: "127.0.0.1".to_string(),
            server_port: 12345,
            database_url: "sqlite://konex.db?mode=rwc".to_string(),
            db_max_connections: 10,
            db_min_connections: 1,
            idle_timeout_secs: 300,
            write_timeout_secs: 10,
            max_frame_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let defaults = Config::default();

        Ok(Config {
            server_host: std::env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: parse_var("SERVER_PORT", defaults.server_port)?,
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            db_min_connections: parse_var("DB_MIN_CONNECTIONS", defaults.db_min_connections)?,
            idle_timeout_secs: parse_var("IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs)?,
            write_timeout_secs: parse_var("WRITE_TIMEOUT_SECS", defaults.write_timeout_secs)?,
            max_frame_bytes: parse_var("MAX_FRAME_BYTES", defaults.max_frame_bytes)?,
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs.max(1))
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}
