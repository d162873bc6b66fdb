//! Service configuration read from the environment (and `.env`, if present).

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    Missing(&'static str),
    #[error("environment variable {name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Pool settings for one logical database.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSettings {
    pub name: String,
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
}

impl DatabaseSettings {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            max_connections: 10,
            min_connections: 1,
            max_lifetime: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub log_level: String,
    /// HS256 key the identity middleware verifies tokens with.
    pub secret: String,
    pub database: DatabaseSettings,
}

pub const MAIN_DATABASE: &str = "main";

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| lookup(name).ok_or(ConfigError::Missing(name));

        let mut database = DatabaseSettings::new(MAIN_DATABASE, required("DATABASE_URL")?);
        if let Some(value) = parse(&lookup, "DB_MAX_CONNECTIONS")? {
            database.max_connections = value;
        }
        if let Some(value) = parse(&lookup, "DB_MIN_CONNECTIONS")? {
            database.min_connections = value;
        }
        if let Some(secs) = parse(&lookup, "DB_MAX_LIFETIME_SECS")? {
            database.max_lifetime = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "DB_IDLE_TIMEOUT_SECS")? {
            database.idle_timeout = Duration::from_secs(secs);
        }
        if database.min_connections > database.max_connections {
            return Err(ConfigError::Invalid {
                name: "DB_MIN_CONNECTIONS",
                value: database.min_connections.to_string(),
            });
        }

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            log_level: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            secret: required("SECRET")?,
            database,
        })
    }
}

fn parse<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
