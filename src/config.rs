//! Configuration for the Stonegate S3 gateway

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Root directory for the filesystem backend
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base domain for virtual-host-style bucket addressing
    /// (`bucket.<host_suffix>`); empty disables the rewrite.
    #[serde(default)]
    pub host_suffix: String,

    /// Path of the user database file; defaults to `<data_dir>/iam.json`
    #[serde(default)]
    pub iam_path: Option<PathBuf>,

    /// Hard upper bound on the `max-keys` a listing may request.
    #[serde(default = "default_max_keys_ceiling")]
    pub max_keys_ceiling: usize,

    /// Whether unsigned requests are bound to the anonymous user.
    /// When off they are refused outright instead of being left to
    /// per-op ACL checks.
    #[serde(default = "default_anonymous_enabled")]
    pub anonymous_enabled: bool,
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:7480".parse().unwrap()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_keys_ceiling() -> usize {
    1000
}

fn default_anonymous_enabled() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            data_dir: default_data_dir(),
            host_suffix: String::new(),
            iam_path: None,
            max_keys_ceiling: default_max_keys_ceiling(),
            anonymous_enabled: default_anonymous_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("STONEGATE_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }
        if let Ok(dir) = std::env::var("STONEGATE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(suffix) = std::env::var("STONEGATE_HOST_SUFFIX") {
            config.host_suffix = suffix;
        }
        if let Ok(path) = std::env::var("STONEGATE_IAM_PATH") {
            config.iam_path = Some(PathBuf::from(path));
        }
        if let Ok(ceiling) = std::env::var("STONEGATE_MAX_KEYS_CEILING") {
            if let Ok(parsed) = ceiling.parse() {
                config.max_keys_ceiling = parsed;
            }
        }
        if let Ok(anon) = std::env::var("STONEGATE_ANONYMOUS_ENABLED") {
            config.anonymous_enabled = anon == "true" || anon == "1";
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("STONEGATE_CONFIG") {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        for path in &["stonegate.toml", "/etc/stonegate/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return config;
                }
            }
        }

        Self::from_env()
    }

    /// Path of the user database file.
    pub fn iam_path(&self) -> PathBuf {
        self.iam_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("iam.json"))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr.port(), 7480);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert!(config.host_suffix.is_empty());
        assert_eq!(config.iam_path(), PathBuf::from("./data/iam.json"));
        assert_eq!(config.max_keys_ceiling, 1000);
        assert!(config.anonymous_enabled);
    }

    #[test]
    fn test_config_parse() {
        let toml = r#"
            listen_addr = "0.0.0.0:8080"
            data_dir = "/var/lib/stonegate"
            host_suffix = "gw.example.com"
            max_keys_ceiling = 500
            anonymous_enabled = false
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/stonegate"));
        assert_eq!(config.host_suffix, "gw.example.com");
        assert_eq!(
            config.iam_path(),
            PathBuf::from("/var/lib/stonegate/iam.json")
        );
        assert_eq!(config.max_keys_ceiling, 500);
        assert!(!config.anonymous_enabled);
    }

    #[test]
    fn test_explicit_iam_path() {
        let toml = r#"
            iam_path = "/etc/stonegate/iam.json"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.iam_path(), PathBuf::from("/etc/stonegate/iam.json"));
    }
}
