//! Assistant Sync
//!
//! Client-side message delivery and reply synchronization for the assistant
//! chat:
//! - Durable pending queue so outbound messages survive restarts
//! - Send pipeline with optimistic echo and lazy thread creation
//! - Poll scheduler discovering replies computed out-of-band
//! - Content normalizer cleaning raw backend history
//! - Lifecycle flush controller for suspension and teardown

pub mod auth;
pub mod backend;
pub mod chat;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod normalizer;
pub mod poll;
pub mod queue;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::{Result, SyncError};

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub api: ApiYamlConfig,
    pub chat: ChatYamlConfig,
    pub storage: StorageYamlConfig,
    pub session: SessionYamlConfig,
}

/// Backend API section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiYamlConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiYamlConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".into(),
            request_timeout_secs: 30,
        }
    }
}

/// Chat section (YAML only; ChatConfig in chat/config.rs applies env overrides)
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ChatYamlConfig {
    pub assistant_type: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub max_poll_cycles: Option<u32>,
    pub poll_arm_delay_ms: Option<u64>,
    pub title_max_chars: Option<usize>,
}

/// Local storage section
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StorageYamlConfig {
    /// Directory holding the pending queue; `~` is expanded
    pub data_dir: Option<String>,
}

/// Static session section, for headless use of the CLI
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYamlConfig {
    pub access_token: Option<String>,
    pub user_id: Option<String>,
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub data_dir: PathBuf,
    pub access_token: Option<String>,
    pub user_id: Option<String>,
    pub chat: chat::ChatConfig,
}

impl Config {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. If the file doesn't
    /// exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> anyhow::Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        let data_dir = match std::env::var("SYNC_DATA_DIR").ok().or(yaml.storage.data_dir) {
            Some(dir) => expand_tilde(&dir),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("assistant-sync"),
        };

        Ok(Self {
            api_base_url: std::env::var("SYNC_API_URL").unwrap_or(yaml.api.base_url),
            request_timeout: Duration::from_secs(
                std::env::var("SYNC_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(yaml.api.request_timeout_secs),
            ),
            data_dir,
            access_token: std::env::var("SYNC_ACCESS_TOKEN")
                .ok()
                .or(yaml.session.access_token),
            user_id: std::env::var("SYNC_USER_ID").ok().or(yaml.session.user_id),
            chat: chat::ChatConfig::from_yaml_and_env(&yaml.chat),
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_yaml_config_loading() {
        let yaml = r#"
api:
  base_url: https://dashboard.example.com/api
  request_timeout_secs: 10

chat:
  assistant_type: sales
  poll_interval_ms: 2000
  max_poll_cycles: 40

storage:
  data_dir: /var/lib/assistant-sync

session:
  access_token: tok
  user_id: u-42
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.api.base_url, "https://dashboard.example.com/api");
        assert_eq!(config.api.request_timeout_secs, 10);
        assert_eq!(config.chat.assistant_type.as_deref(), Some("sales"));
        assert_eq!(config.chat.poll_interval_ms, Some(2000));
        assert_eq!(config.chat.max_poll_cycles, Some(40));
        assert_eq!(config.chat.poll_arm_delay_ms, None);
        assert_eq!(
            config.storage.data_dir.as_deref(),
            Some("/var/lib/assistant-sync")
        );
        assert_eq!(config.session.user_id.as_deref(), Some("u-42"));
    }

    #[test]
    fn test_yaml_defaults() {
        let config = YamlConfig::default();
        assert_eq!(config.api.base_url, "http://localhost:8080/api");
        assert_eq!(config.api.request_timeout_secs, 30);
        assert!(config.chat.assistant_type.is_none());
        assert!(config.storage.data_dir.is_none());
        assert!(config.session.access_token.is_none());
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let yaml = r#"
api:
  request_timeout_secs: 5
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8080/api");
        assert_eq!(config.api.request_timeout_secs, 5);
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_tilde("relative"), PathBuf::from("relative"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/data"), home.join("data"));
        }
    }

    /// Combined test for YAML file loading and env var overrides.
    /// Runs as a single test to avoid parallel env var race conditions.
    #[test]
    fn test_yaml_and_env_lifecycle() {
        fn clear_env() {
            for var in &[
                "SYNC_API_URL",
                "SYNC_REQUEST_TIMEOUT_SECS",
                "SYNC_DATA_DIR",
                "SYNC_ACCESS_TOKEN",
                "SYNC_USER_ID",
            ] {
                std::env::remove_var(var);
            }
        }

        // --- Phase 1: YAML values loaded correctly ---
        let yaml = r#"
api:
  base_url: http://yaml-host/api
  request_timeout_secs: 12
storage:
  data_dir: /tmp/yaml-data
session:
  access_token: yaml-token
  user_id: yaml-user
"#;
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        clear_env();

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.api_base_url, "http://yaml-host/api");
        assert_eq!(config.request_timeout, Duration::from_secs(12));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/yaml-data"));
        assert_eq!(config.access_token.as_deref(), Some("yaml-token"));

        // --- Phase 2: Env vars override YAML ---
        std::env::set_var("SYNC_API_URL", "http://env-host/api");
        std::env::set_var("SYNC_REQUEST_TIMEOUT_SECS", "not-a-number");
        std::env::set_var("SYNC_USER_ID", "env-user");

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.api_base_url, "http://env-host/api");
        // Invalid numeric env falls back to YAML
        assert_eq!(config.request_timeout, Duration::from_secs(12));
        assert_eq!(config.user_id.as_deref(), Some("env-user"));
        assert_eq!(config.access_token.as_deref(), Some("yaml-token"));

        clear_env();

        // --- Phase 3: No YAML file → defaults ---
        let nonexistent = Path::new("/tmp/nonexistent-sync-config-12345.yaml");
        let config = Config::from_yaml_and_env(Some(nonexistent)).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:8080/api");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.access_token.is_none());
        assert!(config.data_dir.ends_with("assistant-sync"));
    }
}
