use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 7071;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
///
/// Nested keys are addressed with a double underscore in the environment,
/// e.g. `CADENCE_DISPATCHER__POLL_INTERVAL_MS=250`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Deferred-signal dispatcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// How often the signal queue is polled for due entries.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum signals drained per query.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.db", home)
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Uses the explicit path when given, otherwise `~/.cadence/cadence.toml`.
    /// A missing file is not an error; every setting has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        tracing::debug!(%path, "loading configuration");
        let config: CadenceConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .map_err(|e| crate::error::CadenceError::Config(e.to_string()))?;

        if config.dispatcher.poll_interval_ms == 0 {
            return Err(crate::error::CadenceError::Config(
                "dispatcher.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = CadenceConfig::load(path.to_str()).unwrap();
        assert_eq!(config.gateway.port, DEFAULT_PORT);
        assert_eq!(config.gateway.bind, DEFAULT_BIND);
        assert_eq!(config.dispatcher.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert!(config.database.path.ends_with("cadence.db"));
    }

    #[test]
    fn toml_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[gateway]\nport = 9000\n\n[database]\npath = \"/tmp/c.db\"\n\n[dispatcher]\nbatch_size = 8"
        )
        .unwrap();

        let config = CadenceConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.bind, DEFAULT_BIND);
        assert_eq!(config.database.path, "/tmp/c.db");
        assert_eq!(config.dispatcher.batch_size, 8);
        assert_eq!(config.dispatcher.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatcher]\npoll_interval_ms = 0").unwrap();
        let err = CadenceConfig::load(file.path().to_str()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
