use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::billing::BillingSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Settings read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub server_host: String,
    pub server_port: u16,

    /// HS256 secret for bearer tokens; protected routes reject everything when unset
    pub jwt_secret: Option<String>,

    pub company_name: String,
    pub payment_terms_days: i64,

    /// Seconds between overdue sweeps in the worker
    pub worker_poll_interval_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let payment_terms_days: i64 = parse_or(&lookup, "PAYMENT_TERMS_DAYS", 30)?;
        if payment_terms_days < 0 {
            return Err(ConfigError::Invalid {
                name: "PAYMENT_TERMS_DAYS",
                value: payment_terms_days.to_string(),
            });
        }

        Ok(AppConfig {
            database_url,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            server_host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: parse_or(&lookup, "SERVER_PORT", 3000)?,
            jwt_secret: lookup("JWT_SECRET").filter(|v| !v.is_empty()),
            company_name: lookup("COMPANY_NAME").unwrap_or_else(|| "LexLedger".to_string()),
            payment_terms_days,
            worker_poll_interval_seconds: parse_or(&lookup, "WORKER_POLL_INTERVAL_SECONDS", 60)?,
        })
    }

    pub fn billing_settings(&self) -> BillingSettings {
        BillingSettings {
            company_name: self.company_name.clone(),
            payment_terms_days: self.payment_terms_days,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("DATABASE_URL", "postgres://localhost/lexledger")]).unwrap();
        assert_eq!(cfg.database_max_connections, 10);
        assert_eq!(cfg.bind_address(), "0.0.0.0:3000");
        assert_eq!(cfg.company_name, "LexLedger");
        assert_eq!(cfg.payment_terms_days, 30);
        assert_eq!(cfg.worker_poll_interval_seconds, 60);
        assert!(cfg.jwt_secret.is_none());
    }

    #[test]
    fn test_database_url_is_required() {
        assert!(matches!(config(&[]), Err(ConfigError::Missing("DATABASE_URL"))));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = config(&[
            ("DATABASE_URL", "postgres://localhost/lexledger"),
            ("SERVER_PORT", "http"),
        ])
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid SERVER_PORT: http");

        assert!(config(&[
            ("DATABASE_URL", "postgres://localhost/lexledger"),
            ("PAYMENT_TERMS_DAYS", "-3"),
        ])
        .is_err());
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://db/lexledger"),
            ("SERVER_PORT", "8080"),
            ("COMPANY_NAME", "Smith & Partners"),
            ("PAYMENT_TERMS_DAYS", "14"),
            ("JWT_SECRET", "s3cret"),
        ])
        .unwrap();
        assert_eq!(cfg.server_port, 8080);
        assert_eq!(cfg.billing_settings().company_name, "Smith & Partners");
        assert_eq!(cfg.billing_settings().payment_terms_days, 14);
        assert_eq!(cfg.jwt_secret.as_deref(), Some("s3cret"));
    }
}
