// ⚙️ Configuration - environment driven
//
// DATABASE_URL      SQLite path (":memory:" allowed)      default: akig.db
// JWT_SECRET        HS256 signing secret                  required by the server
// JWT_TTL_SECS      access token lifetime                 default: 900
// REFRESH_TTL_DAYS  refresh token lifetime                default: 7
// PORT              HTTP port                             default: 3000
// CORS_ORIGIN       allowed origin, "*" = permissive      default: *
// LOG_FORMAT        "compact" | "json"                    default: compact

use crate::error::{AkigError, Result};
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" | "text" | "pretty" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: Option<String>,
    pub jwt_ttl_secs: i64,
    pub refresh_ttl_days: i64,
    pub port: u16,
    pub cors_origin: String,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "akig.db".to_string(),
            jwt_secret: None,
            jwt_ttl_secs: 900,
            refresh_ttl_days: 7,
            port: 3000,
            cors_origin: "*".to_string(),
            log_format: LogFormat::Compact,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map instead of the process env)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        Ok(Config {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            jwt_secret: lookup("JWT_SECRET").filter(|s| !s.trim().is_empty()),
            jwt_ttl_secs: parse_or(&lookup, "JWT_TTL_SECS", defaults.jwt_ttl_secs)?,
            refresh_ttl_days: parse_or(&lookup, "REFRESH_TTL_DAYS", defaults.refresh_ttl_days)?,
            port: parse_or(&lookup, "PORT", defaults.port)?,
            cors_origin: lookup("CORS_ORIGIN").unwrap_or(defaults.cors_origin),
            log_format: parse_or(&lookup, "LOG_FORMAT", defaults.log_format)?,
        })
    }

    /// JWT secret, mandatory for anything that issues or verifies tokens
    pub fn require_jwt_secret(&self) -> Result<&str> {
        match self.jwt_secret.as_deref() {
            Some(secret) if secret.len() >= 16 => Ok(secret),
            Some(_) => Err(AkigError::Config(
                "JWT_SECRET must be at least 16 characters".to_string(),
            )),
            None => Err(AkigError::Config("JWT_SECRET is not set".to_string())),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            warn!("Invalid {key} value: {e}");
            AkigError::Config(format!("invalid {}: {}", key, e))
        }),
        None => {
            debug!("{key} not set, using default");
            Ok(default)
        }
    }
}
