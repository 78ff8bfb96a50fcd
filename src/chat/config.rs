//! Chat configuration

use crate::ChatYamlConfig;
use std::time::Duration;

/// Configuration for the send pipeline and poll scheduler
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Assistant persona the threads belong to (`marketing`, `sales`, ...)
    pub assistant_type: String,
    /// Delay between two poll cycles
    pub poll_interval: Duration,
    /// Poll cycles before giving up on a reply
    pub max_poll_cycles: u32,
    /// Delay between dispatch and the first poll cycle
    pub poll_arm_delay: Duration,
    /// Characters of the first message used as a new thread's title
    pub title_max_chars: usize,
}

impl ChatConfig {
    /// Create config from environment only
    pub fn from_env() -> Self {
        Self::from_yaml_and_env(&ChatYamlConfig::default())
    }

    /// Build from the YAML `chat:` section, then override with env vars.
    ///
    /// Priority: env var > YAML > default. Unparseable env values are ignored.
    pub fn from_yaml_and_env(yaml: &ChatYamlConfig) -> Self {
        let defaults = Self::default_values();

        Self {
            assistant_type: std::env::var("SYNC_ASSISTANT_TYPE")
                .ok()
                .or_else(|| yaml.assistant_type.clone())
                .unwrap_or(defaults.assistant_type),
            poll_interval: env_parse("SYNC_POLL_INTERVAL_MS")
                .or(yaml.poll_interval_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            max_poll_cycles: env_parse("SYNC_MAX_POLL_CYCLES")
                .or(yaml.max_poll_cycles)
                .unwrap_or(defaults.max_poll_cycles),
            poll_arm_delay: env_parse("SYNC_POLL_ARM_DELAY_MS")
                .or(yaml.poll_arm_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_arm_delay),
            title_max_chars: yaml.title_max_chars.unwrap_or(defaults.title_max_chars),
        }
    }

    fn default_values() -> Self {
        Self {
            assistant_type: "marketing".into(),
            poll_interval: Duration::from_millis(1500),
            max_poll_cycles: 80, // ~2 minutes at 1.5s
            poll_arm_delay: Duration::from_millis(500),
            title_max_chars: 50,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::default_values()
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChatConfig::default();
        assert_eq!(config.assistant_type, "marketing");
        assert_eq!(config.poll_interval, Duration::from_millis(1500));
        assert_eq!(config.max_poll_cycles, 80);
        assert_eq!(config.title_max_chars, 50);
    }

    /// Combined env var test to avoid parallel test race conditions.
    #[test]
    fn test_from_env_lifecycle() {
        fn clear_env() {
            std::env::remove_var("SYNC_ASSISTANT_TYPE");
            std::env::remove_var("SYNC_POLL_INTERVAL_MS");
            std::env::remove_var("SYNC_MAX_POLL_CYCLES");
            std::env::remove_var("SYNC_POLL_ARM_DELAY_MS");
        }

        // Phase 1: defaults
        clear_env();
        let config = ChatConfig::from_env();
        assert_eq!(config.assistant_type, "marketing");
        assert_eq!(config.max_poll_cycles, 80);

        // Phase 2: YAML values
        let yaml = ChatYamlConfig {
            assistant_type: Some("sales".into()),
            poll_interval_ms: Some(1000),
            max_poll_cycles: Some(10),
            poll_arm_delay_ms: None,
            title_max_chars: Some(20),
        };
        let config = ChatConfig::from_yaml_and_env(&yaml);
        assert_eq!(config.assistant_type, "sales");
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.max_poll_cycles, 10);
        assert_eq!(config.poll_arm_delay, Duration::from_millis(500));
        assert_eq!(config.title_max_chars, 20);

        // Phase 3: env overrides YAML
        std::env::set_var("SYNC_ASSISTANT_TYPE", "call-center");
        std::env::set_var("SYNC_MAX_POLL_CYCLES", "5");
        let config = ChatConfig::from_yaml_and_env(&yaml);
        assert_eq!(config.assistant_type, "call-center");
        assert_eq!(config.max_poll_cycles, 5);
        assert_eq!(config.poll_interval, Duration::from_millis(1000));

        // Phase 4: invalid value falls back
        std::env::set_var("SYNC_MAX_POLL_CYCLES", "not_a_number");
        let config = ChatConfig::from_yaml_and_env(&yaml);
        assert_eq!(config.max_poll_cycles, 10);

        clear_env();
    }
}
