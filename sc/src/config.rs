//! SQL Connect configuration types and loading

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::settings::{DataSourceOptions, Setting};

/// Main SQL Connect configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Backend query endpoint
    pub backend: BackendConfig,

    /// Driver settings for the JDBC connection
    pub connection: ConnectionConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Checks that the API key variable is set and the settings are sound.
    pub fn validate(&self) -> Result<()> {
        if std::env::var(&self.backend.api_key_env).is_err() {
            return Err(eyre::eyre!(
                "Backend API key not found. Set the {} environment variable.",
                self.backend.api_key_env
            ));
        }
        if self.backend.datasource_uid.trim().is_empty() {
            return Err(eyre::eyre!("backend.datasource-uid must be set"));
        }
        self.connection.to_options().validate()
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .sqlconnect.yml
        let local_config = PathBuf::from(".sqlconnect.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/sqlconnect/sqlconnect.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("sqlconnect").join("sqlconnect.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Backend query endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the dashboard host
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// UID of the data source instance queries are sent to
    #[serde(rename = "datasource-uid")]
    pub datasource_uid: String,

    /// Environment variable containing the API token
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Retries for transient HTTP failures
    #[serde(rename = "max-retries")]
    pub max_retries: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            datasource_uid: String::new(),
            api_key_env: "SQLCONNECT_API_KEY".to_string(),
            timeout_ms: 30_000,
            max_retries: 3,
        }
    }
}

impl BackendConfig {
    /// Read the API token from the configured environment variable
    pub fn get_api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env).context(format!("Environment variable {} not set", self.api_key_env))
    }
}

/// Connection settings as written in the config file
///
/// Secure values are never written to the file; `secure-env` maps a secure
/// setting name to the environment variable holding its value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub settings: Vec<Setting>,

    #[serde(rename = "secure-env")]
    pub secure_env: BTreeMap<String, String>,
}

impl ConnectionConfig {
    /// Build data source options, resolving secure values from the environment
    pub fn to_options(&self) -> DataSourceOptions {
        let mut options = DataSourceOptions::new(self.settings.clone());
        for (name, var) in &self.secure_env {
            match std::env::var(var) {
                Ok(value) => {
                    options.secure_json_data.insert(name.clone(), value);
                    options.secure_json_fields.insert(name.clone(), true);
                }
                Err(_) => {
                    tracing::warn!(%name, %var, "secure setting variable not set");
                }
            }
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.log_level.is_none());
        assert_eq!(config.backend.base_url, "http://localhost:3000");
        assert_eq!(config.backend.api_key_env, "SQLCONNECT_API_KEY");
        assert_eq!(config.backend.max_retries, 3);
        assert!(config.connection.settings.is_empty());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug

backend:
  base-url: https://dash.example.com
  datasource-uid: jdbc-prod
  api-key-env: MY_TOKEN
  timeout-ms: 10000
  max-retries: 1

connection:
  settings:
    - name: driver
      value: org.postgresql.Driver
    - name: password
      secure: true
  secure-env:
    password: DB_PASSWORD
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.backend.base_url, "https://dash.example.com");
        assert_eq!(config.backend.datasource_uid, "jdbc-prod");
        assert_eq!(config.backend.timeout_ms, 10000);
        assert_eq!(config.connection.settings.len(), 2);
        assert!(config.connection.settings[1].secure);
        assert_eq!(config.connection.secure_env["password"], "DB_PASSWORD");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
backend:
  datasource-uid: abc
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.backend.datasource_uid, "abc");

        // Defaults for unspecified
        assert_eq!(config.backend.api_key_env, "SQLCONNECT_API_KEY");
        assert_eq!(config.backend.timeout_ms, 30_000);
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backend:\n  datasource-uid: from-file").unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.backend.datasource_uid, "from-file");
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/sqlconnect.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    #[serial]
    fn test_secure_env_resolution() {
        unsafe {
            std::env::set_var("SQLCONNECT_TEST_DB_PASSWORD", "s3cret");
        }

        let connection = ConnectionConfig {
            settings: vec![Setting::plain("user", "grafana"), Setting::secure("password")],
            secure_env: BTreeMap::from([("password".to_string(), "SQLCONNECT_TEST_DB_PASSWORD".to_string())]),
        };
        let options = connection.to_options();

        assert_eq!(options.connection_string(), "user=grafana;password=s3cret");
        assert_eq!(options.secure_json_fields["password"], true);

        unsafe {
            std::env::remove_var("SQLCONNECT_TEST_DB_PASSWORD");
        }
    }

    #[test]
    #[serial]
    fn test_validate_requires_api_key() {
        unsafe {
            std::env::remove_var("SQLCONNECT_TEST_MISSING_KEY");
        }
        let mut config = Config::default();
        config.backend.api_key_env = "SQLCONNECT_TEST_MISSING_KEY".to_string();
        config.backend.datasource_uid = "uid".to_string();
        assert!(config.validate().is_err());

        unsafe {
            std::env::set_var("SQLCONNECT_TEST_MISSING_KEY", "token");
        }
        assert!(config.validate().is_ok());
        assert_eq!(config.backend.get_api_key().unwrap(), "token");

        unsafe {
            std::env::remove_var("SQLCONNECT_TEST_MISSING_KEY");
        }
    }
}
