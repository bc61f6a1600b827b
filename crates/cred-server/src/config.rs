use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

/// Ten years.
const MAX_TOKEN_TTL_HOURS: i64 = 24 * 365 * 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("CRED_JWT_SECRET is unset or still a placeholder")]
    MissingSecret,

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    /// `None` allows any origin.
    pub cors_origin: Option<String>,
    pub token_ttl_hours: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("CRED_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            return Err(ConfigError::MissingSecret);
        }

        let db_path = lookup("CRED_DB_PATH").unwrap_or_else(|| "cred.db".into()).into();
        let host = lookup("CRED_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = lookup("CRED_PORT").unwrap_or_else(|| "3000".into());

        let addr_raw = format!("{}:{}", host, port);
        let addr = addr_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "CRED_HOST/CRED_PORT",
            value: addr_raw.clone(),
        })?;

        let cors_origin = lookup("CRED_CORS_ORIGIN").filter(|o| !o.is_empty() && o != "*");

        let token_ttl_hours = match lookup("CRED_TOKEN_TTL_HOURS") {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|h| (1..=MAX_TOKEN_TTL_HOURS).contains(h))
                .ok_or(ConfigError::Invalid {
                    name: "CRED_TOKEN_TTL_HOURS",
                    value: raw,
                })?,
            None => 24 * 30,
        };

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            cors_origin,
            token_ttl_hours,
        })
    }
}
