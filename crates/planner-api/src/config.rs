use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where the replication store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    InMemory,
    Path(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database: DatabaseLocation,
    pub supabase_jwt_secret: String,
    pub supabase_jwt_issuer: Option<String>,
    pub supabase_jwt_audience: String,
    pub auth_clock_skew: Duration,
    pub pull_max_batch_size: usize,
    pub push_max_batch_size: usize,
    pub rate_limit_window: Duration,
    pub pull_rate_limit_per_window: u32,
    pub push_rate_limit_per_window: u32,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database", &self.database)
            .field("supabase_jwt_secret", &"[REDACTED]")
            .field("supabase_jwt_issuer", &self.supabase_jwt_issuer)
            .field("supabase_jwt_audience", &self.supabase_jwt_audience)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("pull_max_batch_size", &self.pull_max_batch_size)
            .field("push_max_batch_size", &self.push_max_batch_size)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "pull_rate_limit_per_window",
                &self.pull_rate_limit_per_window,
            )
            .field(
                "push_rate_limit_per_window",
                &self.push_rate_limit_per_window,
            )
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "PLANNER_API_BIND_ADDR", "127.0.0.1:8080");

        let database = match value_or_default(&lookup, "PLANNER_DATABASE_PATH", "planner.db") {
            path if path == ":memory:" => DatabaseLocation::InMemory,
            path => DatabaseLocation::Path(path),
        };

        let supabase_jwt_secret = required_trimmed(&lookup, "SUPABASE_JWT_SECRET")?;
        let supabase_jwt_issuer = optional_trimmed(&lookup, "SUPABASE_JWT_ISSUER");
        let supabase_jwt_audience =
            value_or_default(&lookup, "SUPABASE_JWT_AUDIENCE", "authenticated");

        let auth_clock_skew_secs =
            bounded::<u64>(&lookup, "AUTH_CLOCK_SKEW_SECS", "60", 0, 300)?;
        let pull_max_batch_size =
            bounded::<usize>(&lookup, "PULL_MAX_BATCH_SIZE", "500", 1, 5_000)?;
        let push_max_batch_size =
            bounded::<usize>(&lookup, "PUSH_MAX_BATCH_SIZE", "200", 1, 5_000)?;
        let rate_limit_window_secs =
            bounded::<u64>(&lookup, "RATE_LIMIT_WINDOW_SECS", "60", 10, 3_600)?;
        let pull_rate_limit_per_window =
            bounded::<u32>(&lookup, "PULL_RATE_LIMIT_PER_WINDOW", "600", 1, 100_000)?;
        let push_rate_limit_per_window =
            bounded::<u32>(&lookup, "PUSH_RATE_LIMIT_PER_WINDOW", "300", 1, 100_000)?;

        Ok(Self {
            bind_addr,
            database,
            supabase_jwt_secret,
            supabase_jwt_issuer,
            supabase_jwt_audience,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            pull_max_batch_size,
            push_max_batch_size,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            pull_rate_limit_per_window,
            push_rate_limit_per_window,
        })
    }
}

fn bounded<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    min: T,
    max: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + fmt::Display + Copy,
{
    let value = value_or_default(lookup, name, default)
        .parse::<T>()
        .map_err(|_| {
            ConfigError::Invalid(format!("{name} must be an integer in [{min}, {max}]"))
        })?;
    if value < min || value > max {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{min}, {max}]"
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
