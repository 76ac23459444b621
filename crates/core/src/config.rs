use std::time::Duration;

use serde::Serialize;

use crate::retry::RetryPolicy;

pub const DEFAULT_MODEL: &str = "kimi-latest";
pub const DEFAULT_BASE_URL: &str = "https://api.moonshot.cn/v1";
const DEFAULT_TEMPERATURE: f32 = 0.6;
const DEFAULT_MAX_TOKENS: u32 = 2000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

pub const ENV_API_KEY: &str = "MOONSHOT_API_KEY";
const ENV_MODEL: &str = "KIMICHAT_MODEL";
const ENV_BASE_URL: &str = "KIMICHAT_BASE_URL";

fn read_env_trim(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Immutable model configuration handed to `ChatClient` constructors.
///
/// There is no module-level mutable default; callers start from
/// `ModelConfig::default()` (or `from_env`) and merge per-request
/// overrides with [`ModelConfig::merged`].
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl ModelConfig {
    /// Defaults with deployment-level env overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(model) = read_env_trim(ENV_MODEL) {
            config.model = model;
        }
        if let Some(base_url) = read_env_trim(ENV_BASE_URL) {
            config.base_url = base_url;
        }
        config
    }

    /// Returns a copy with every `Some` field of `overrides` replacing the
    /// corresponding field here; unset fields keep their current value.
    pub fn merged(&self, overrides: &ModelOverrides) -> Self {
        let mut config = self.clone();
        if let Some(model) = &overrides.model {
            config.model = model.clone();
        }
        if let Some(base_url) = &overrides.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(temperature) = overrides.temperature {
            config.temperature = temperature;
        }
        if let Some(max_tokens) = overrides.max_tokens {
            config.max_tokens = max_tokens;
        }
        if let Some(max_retries) = overrides.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(retry_delay) = overrides.retry_delay {
            config.retry_delay = retry_delay;
        }
        config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_delay,
        }
    }
}

/// Caller-supplied partial configuration, merged over a base config.
#[derive(Debug, Clone, Default)]
pub struct ModelOverrides {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<Duration>,
}

/// Provider API key from the environment, trimmed; `None` when unset or blank.
pub fn api_key_from_env() -> Option<String> {
    read_env_trim(ENV_API_KEY)
}

/// Masks a secret down to `***` plus its last four characters.
pub fn masked_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "***".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("***{tail}")
}

/// Snapshot of the provider configuration for the config report route.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigReport {
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    #[serde(rename = "baseURL")]
    pub base_url: String,
    pub model: String,
}

/// Reports whether the provider is usable with the given key, never
/// exposing more than the masked key tail.
pub fn validate_config(config: &ModelConfig, api_key: Option<&str>) -> ConfigReport {
    ConfigReport {
        is_valid: api_key.is_some(),
        api_key: api_key.map(masked_key),
        base_url: config.base_url.clone(),
        model: config.model.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::{masked_key, validate_config, ModelConfig, ModelOverrides};
    use std::time::Duration;

    #[test]
    fn defaults_match_documented_values() {
        let config = ModelConfig::default();
        assert_eq!(config.model, "kimi-latest");
        assert_eq!(config.base_url, "https://api.moonshot.cn/v1");
        assert_eq!(config.temperature, 0.6);
        assert_eq!(config.max_tokens, 2000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1000));
    }

    #[test]
    fn merged_replaces_only_set_fields() {
        let base = ModelConfig::default();
        let merged = base.merged(&ModelOverrides {
            temperature: Some(0.7),
            max_tokens: Some(512),
            ..ModelOverrides::default()
        });

        assert_eq!(merged.temperature, 0.7);
        assert_eq!(merged.max_tokens, 512);
        assert_eq!(merged.model, base.model);
        assert_eq!(merged.base_url, base.base_url);
        assert_eq!(merged.max_retries, base.max_retries);
    }

    #[test]
    fn merged_with_empty_overrides_is_identity() {
        let base = ModelConfig::default();
        assert_eq!(base.merged(&ModelOverrides::default()), base);
    }

    #[test]
    fn masked_key_keeps_last_four_characters() {
        assert_eq!(masked_key("sk-abcdef1234"), "***1234");
        assert_eq!(masked_key("abc"), "***");
    }

    #[test]
    fn validate_config_without_key_is_invalid() {
        let report = validate_config(&ModelConfig::default(), None);
        assert!(!report.is_valid);
        assert!(report.api_key.is_none());

        let report = validate_config(&ModelConfig::default(), Some("sk-abcdef1234"));
        assert!(report.is_valid);
        assert_eq!(report.api_key.as_deref(), Some("***1234"));
    }
}
