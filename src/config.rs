//! Process-wide configuration
//!
//! Loaded once at startup from a TOML file (every field optional, missing
//! fields take defaults) and used to build the [`ProviderRegistry`] and the
//! [`OrchestratorConfig`]. API keys are never stored in the file; each
//! provider names the environment variable that holds its key list.
//!
//! [`ProviderRegistry`]: crate::llm::ProviderRegistry
//! [`OrchestratorConfig`]: crate::core::OrchestratorConfig

use crate::llm::registry::models;
use crate::llm::TokenCost;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Wire protocol spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// `/chat/completions` (OpenAI, Gemini, DeepSeek, ...)
    OpenAi,
    /// Anthropic `/messages`
    Anthropic,
}

/// One configured model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Registry key referenced by the variety table (e.g. "claude")
    pub name: String,
    pub kind: ProviderKind,
    /// Vendor model identifier
    pub model: String,
    /// Override for the vendor's default endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Env var holding one key or a comma-separated list
    pub api_key_env: String,
    /// Price override (USD per 1K tokens)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_1k: Option<TokenCost>,
    /// HTTP timeout for a single request
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    /// Completion token cap
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

fn default_provider_timeout() -> u64 {
    60
}

fn default_max_tokens() -> usize {
    2048
}

impl ProviderSettings {
    pub fn new(name: &str, kind: ProviderKind, model: &str, api_key_env: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            model: model.to_string(),
            base_url: None,
            api_key_env: api_key_env.to_string(),
            cost_per_1k: None,
            timeout_secs: default_provider_timeout(),
            max_tokens: default_max_tokens(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = Some(url.to_string());
        self
    }
}

/// Judge-model reranking settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankSettings {
    pub enabled: bool,
    /// Registry key of the judge model
    pub judge_model: String,
    pub timeout_secs: u64,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            judge_model: models::CLAUDE.to_string(),
            timeout_secs: 60,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: Vec<ProviderSettings>,
    /// Default resolution order
    pub priority: Vec<String>,
    /// Providers used by ensemble mode
    pub generation_models: Vec<String>,
    /// Upper bound on one provider attempt, retries included
    pub unit_timeout_secs: u64,
    pub max_concurrent_units: usize,
    /// Candidates requested in ensemble mode when the request does not say
    pub ensemble_total: usize,
    /// Tolerance band as a fraction of (max_chars - min_chars)
    pub length_tolerance: f64,
    /// Jaccard similarity above which a candidate is a duplicate
    pub dedupe_threshold: f64,
    pub rerank: RerankSettings,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderSettings::new(
                    models::CLAUDE,
                    ProviderKind::Anthropic,
                    "claude-sonnet-4-20250514",
                    "ANTHROPIC_API_KEY",
                ),
                ProviderSettings::new(
                    models::GPT,
                    ProviderKind::OpenAi,
                    "gpt-4o",
                    "OPENAI_API_KEY",
                ),
                ProviderSettings::new(
                    models::GEMINI,
                    ProviderKind::OpenAi,
                    "gemini-2.0-flash",
                    "GEMINI_API_KEYS",
                )
                .with_base_url(crate::llm::openai::GEMINI_OPENAI_URL),
                ProviderSettings::new(
                    models::DEEPSEEK,
                    ProviderKind::OpenAi,
                    "deepseek-chat",
                    "DEEPSEEK_API_KEY",
                )
                .with_base_url(crate::llm::openai::DEEPSEEK_URL),
            ],
            priority: models::DEFAULT_PRIORITY.iter().map(|s| s.to_string()).collect(),
            generation_models: models::DEFAULT_GENERATION
                .iter()
                .map(|s| s.to_string())
                .collect(),
            unit_timeout_secs: 45,
            max_concurrent_units: 8,
            ensemble_total: 9,
            length_tolerance: 0.2,
            dedupe_threshold: 0.85,
            rerank: RerankSettings::default(),
            cache_ttl_secs: 30,
            cache_capacity: 256,
        }
    }
}

impl Config {
    /// Read, parse and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.unit_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Collect every violation rather than stopping at the first
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let mut names = HashSet::new();

        if self.providers.is_empty() {
            errors.push("at least one provider must be defined".to_string());
        }

        for p in &self.providers {
            if p.name.trim().is_empty() {
                errors.push("provider name cannot be empty".to_string());
            } else if !names.insert(p.name.as_str()) {
                errors.push(format!("duplicate provider name '{}'", p.name));
            }
            if p.model.trim().is_empty() {
                errors.push(format!("provider '{}' has an empty model", p.name));
            }
            if p.api_key_env.trim().is_empty() {
                errors.push(format!("provider '{}' has an empty api_key_env", p.name));
            }
            if p.timeout_secs == 0 {
                errors.push(format!("provider '{}' timeout_secs must be > 0", p.name));
            }
        }

        for (list, label) in [
            (&self.priority, "priority"),
            (&self.generation_models, "generation_models"),
        ] {
            for name in list {
                if !names.contains(name.as_str()) {
                    errors.push(format!("{} references unknown provider '{}'", label, name));
                }
            }
        }

        if self.rerank.enabled && !names.contains(self.rerank.judge_model.as_str()) {
            errors.push(format!(
                "rerank.judge_model references unknown provider '{}'",
                self.rerank.judge_model
            ));
        }

        if self.unit_timeout_secs == 0 {
            errors.push("unit_timeout_secs must be > 0".to_string());
        }
        if self.max_concurrent_units == 0 {
            errors.push("max_concurrent_units must be > 0".to_string());
        }
        if self.ensemble_total == 0 {
            errors.push("ensemble_total must be >= 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.length_tolerance) {
            errors.push(format!(
                "length_tolerance ({}) must be between 0.0 and 1.0",
                self.length_tolerance
            ));
        }
        if self.dedupe_threshold <= 0.0 || self.dedupe_threshold > 1.0 {
            errors.push(format!(
                "dedupe_threshold ({}) must be in (0.0, 1.0]",
                self.dedupe_threshold
            ));
        }
        if self.cache_capacity == 0 {
            errors.push("cache_capacity must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_default_providers() {
        let config = Config::default();
        let names: Vec<_> = config.providers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["claude", "gpt", "gemini", "deepseek"]);
        assert_eq!(config.generation_models, vec!["claude", "gpt", "gemini"]);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str("unit_timeout_secs = 10\n").unwrap();
        assert_eq!(config.unit_timeout(), Duration::from_secs(10));
        assert_eq!(config.providers.len(), 4);
        assert!((config.dedupe_threshold - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_full_provider_table() {
        let text = r#"
            priority = ["local"]
            generation_models = ["local"]

            [rerank]
            enabled = false

            [[providers]]
            name = "local"
            kind = "openai"
            model = "llama3"
            base_url = "http://localhost:11434/v1"
            api_key_env = "LOCAL_KEYS"
            cost_per_1k = { input_per_1k = 0.0, output_per_1k = 0.0 }
        "#;
        let config = Config::from_toml_str(text).unwrap();
        let local = &config.providers[0];
        assert_eq!(local.kind, ProviderKind::OpenAi);
        assert_eq!(local.base_url.as_deref(), Some("http://localhost:11434/v1"));
        assert_eq!(local.timeout_secs, 60);
        assert!(!config.rerank.enabled);
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let config = Config {
            priority: vec!["ghost".to_string()],
            unit_timeout_secs: 0,
            length_tolerance: 1.5,
            dedupe_threshold: 0.0,
            ..Config::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("unknown provider 'ghost'")));
    }

    #[test]
    fn test_duplicate_provider_names_rejected() {
        let mut config = Config::default();
        config.providers.push(config.providers[0].clone());
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("duplicate provider name 'claude'")));
    }

    #[test]
    fn test_judge_must_exist_when_enabled() {
        let mut config = Config::default();
        config.rerank.judge_model = "oracle".to_string();
        assert!(config.validate().is_err());
        config.rerank.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        assert!(matches!(
            Config::from_toml_str("unit_timeout_secs = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_concurrent_units = 3").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.max_concurrent_units, 3);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
