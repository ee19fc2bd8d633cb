use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::model::RoleSet;

/// Server settings, read from `ROTA_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// Appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub roles: RoleSet,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "rota".into(),
            max_connections: 256,
            compact_threshold: 1000,
            roles: RoleSet::default(),
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys keep their defaults; set but
    /// unparsable keys are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(v) = lookup("ROTA_PORT") {
            config.port = parse("ROTA_PORT", &v)?;
        }
        if let Some(v) = lookup("ROTA_BIND") {
            config.bind = v;
        }
        if let Some(v) = lookup("ROTA_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROTA_PASSWORD") {
            config.password = v;
        }
        if let Some(v) = lookup("ROTA_MAX_CONNECTIONS") {
            config.max_connections = parse("ROTA_MAX_CONNECTIONS", &v)?;
            if config.max_connections == 0 {
                return Err(ConfigError::invalid("ROTA_MAX_CONNECTIONS", &v, "must be at least 1"));
            }
        }
        if let Some(v) = lookup("ROTA_COMPACT_THRESHOLD") {
            config.compact_threshold = parse("ROTA_COMPACT_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("ROTA_ROLES") {
            config.roles =
                RoleSet::parse(&v).map_err(|reason| ConfigError::invalid("ROTA_ROLES", &v, reason))?;
        }
        if let Some(v) = lookup("ROTA_METRICS_PORT") {
            config.metrics_port = Some(parse("ROTA_METRICS_PORT", &v)?);
        }
        config.tls_cert = lookup("ROTA_TLS_CERT").map(PathBuf::from);
        config.tls_key = lookup("ROTA_TLS_KEY").map(PathBuf::from);

        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("rota.wal")
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(var, value, e))
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl fmt::Display) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value, reason } => {
                write!(f, "invalid {var}={value:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.wal_path(), PathBuf::from("./data/rota.wal"));
        assert_eq!(config.password, "rota");
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.roles, RoleSet::default());
        assert!(config.metrics_port.is_none());
        assert!(config.tls_cert.is_none());
    }

    #[test]
    fn overrides_apply() {
        let config = from_pairs(&[
            ("ROTA_PORT", "6000"),
            ("ROTA_BIND", "127.0.0.1"),
            ("ROTA_DATA_DIR", "/var/lib/rota"),
            ("ROTA_ROLES", "Day, Night"),
            ("ROTA_METRICS_PORT", "9100"),
            ("ROTA_COMPACT_THRESHOLD", "50"),
        ])
        .unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:6000");
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/rota/rota.wal"));
        assert_eq!(config.roles.names(), ["Day".to_string(), "Night".to_string()]);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.compact_threshold, 50);
    }

    #[test]
    fn bad_values_are_errors() {
        let err = from_pairs(&[("ROTA_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("ROTA_PORT"));

        assert!(from_pairs(&[("ROTA_MAX_CONNECTIONS", "0")]).is_err());
        assert!(from_pairs(&[("ROTA_ROLES", "Primary")]).is_err());
        assert!(from_pairs(&[("ROTA_ROLES", "Primary,Primary")]).is_err());
    }
}
