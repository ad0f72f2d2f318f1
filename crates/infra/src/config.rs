//! Process configuration loaded from the environment.

use std::net::SocketAddr;

use thiserror::Error;

use almoner_observability::LogFormat;

pub const BIND_ADDR_VAR: &str = "ALMONER_BIND_ADDR";
pub const PERSISTENT_VAR: &str = "USE_PERSISTENT_STORES";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const MAX_UPLOAD_VAR: &str = "ALMONER_MAX_UPLOAD_BYTES";
pub const LOG_FORMAT_VAR: &str = "ALMONER_LOG_FORMAT";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },

    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Use Postgres-backed stores instead of the in-memory ones.
    pub persistent: bool,
    pub database_url: Option<String>,
    /// Upper bound for upload request bodies.
    pub max_upload_bytes: usize,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            persistent: false,
            database_url: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            log_format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// Unset and blank variables fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bind_addr = get(BIND_ADDR_VAR)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| invalid(BIND_ADDR_VAR, e))?;

        let persistent = match get(PERSISTENT_VAR) {
            None => false,
            Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::Invalid {
                var: PERSISTENT_VAR,
                message: format!("'{raw}' is not a boolean"),
            })?,
        };

        let database_url = get(DATABASE_URL_VAR);
        if persistent && database_url.is_none() {
            return Err(ConfigError::Missing(DATABASE_URL_VAR));
        }

        let max_upload_bytes = match get(MAX_UPLOAD_VAR) {
            None => DEFAULT_MAX_UPLOAD_BYTES,
            Some(raw) => match raw.parse::<usize>() {
                Ok(0) => return Err(invalid(MAX_UPLOAD_VAR, "must be greater than zero")),
                Ok(n) => n,
                Err(e) => return Err(invalid(MAX_UPLOAD_VAR, e)),
            },
        };

        let log_format = match get(LOG_FORMAT_VAR) {
            None => LogFormat::default(),
            Some(raw) => raw
                .parse::<LogFormat>()
                .map_err(|e| invalid(LOG_FORMAT_VAR, e))?,
        };

        Ok(Self {
            bind_addr,
            persistent,
            database_url,
            max_upload_bytes,
            log_format,
        })
    }
}

fn invalid(var: &'static str, message: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        message: message.to_string(),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(load(&[]).unwrap(), AppConfig::default());
    }

    #[test]
    fn reads_every_variable() {
        let config = load(&[
            (BIND_ADDR_VAR, "127.0.0.1:9000"),
            (PERSISTENT_VAR, "TRUE"),
            (DATABASE_URL_VAR, "postgres://localhost/almoner"),
            (MAX_UPLOAD_VAR, "2048"),
            (LOG_FORMAT_VAR, "pretty"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert!(config.persistent);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/almoner"));
        assert_eq!(config.max_upload_bytes, 2048);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn persistent_mode_requires_a_database_url() {
        assert_eq!(
            load(&[(PERSISTENT_VAR, "true")]),
            Err(ConfigError::Missing(DATABASE_URL_VAR))
        );
        assert_eq!(
            load(&[(PERSISTENT_VAR, "true"), (DATABASE_URL_VAR, "  ")]),
            Err(ConfigError::Missing(DATABASE_URL_VAR))
        );
    }

    #[test]
    fn rejects_malformed_values() {
        for (var, value) in [
            (BIND_ADDR_VAR, "localhost"),
            (PERSISTENT_VAR, "maybe"),
            (MAX_UPLOAD_VAR, "-1"),
            (MAX_UPLOAD_VAR, "0"),
            (LOG_FORMAT_VAR, "xml"),
        ] {
            let err = load(&[(var, value)]).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { var: v, .. } if v == var), "{var}={value}");
        }
    }
}
