use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub anthropic_api_key: String,
    /// OAuth client id that ID tokens must be issued for.
    pub google_client_id: String,
    pub stripe_webhook_secret: String,
    pub port: u16,
    pub rust_log: String,
    /// Upper bound on one paid LLM call, retries included. Exceeding it refunds.
    pub operation_timeout_secs: u64,
    /// Accepted clock skew for webhook signature timestamps.
    pub webhook_tolerance_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            google_client_id: require_env("GOOGLE_CLIENT_ID")?,
            stripe_webhook_secret: require_env("STRIPE_WEBHOOK_SECRET")?,
            port: env_or("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            operation_timeout_secs: env_or("OPERATION_TIMEOUT_SECS", 180)?,
            webhook_tolerance_secs: env_or("WEBHOOK_TOLERANCE_SECS", 300)?,
        })
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("Environment variable '{key}' has invalid value '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_accepts_port() {
        assert_eq!(parse_value::<u16>("PORT", " 9000 ").unwrap(), 9000);
    }

    #[test]
    fn test_parse_value_names_the_variable_on_error() {
        let err = parse_value::<u16>("PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_operation_timeout_duration() {
        let config = Config {
            database_url: String::new(),
            anthropic_api_key: String::new(),
            google_client_id: String::new(),
            stripe_webhook_secret: String::new(),
            port: 8080,
            rust_log: "info".to_string(),
            operation_timeout_secs: 42,
            webhook_tolerance_secs: 300,
        };
        assert_eq!(config.operation_timeout(), Duration::from_secs(42));
    }
}
