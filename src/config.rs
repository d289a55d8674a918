use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::providers::ProviderError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevPilotConfig {
    pub default_provider: String,
    #[serde(default)]
    pub fallback_order: Vec<String>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub chains: ChainSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub provider_type: ProviderType,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ProviderType {
    OpenAI,
    Anthropic,
    OpenAICompatible,
    Ollama,
    Demo,
}

impl ProviderConfig {
    /// Check the entry has what its provider type needs to be usable.
    pub fn validate(&self) -> std::result::Result<(), ProviderError> {
        if self.model.trim().is_empty() {
            return Err(ProviderError::InvalidConfig("model is empty".to_string()));
        }
        if self.timeout_secs == Some(0) {
            return Err(ProviderError::InvalidConfig("timeout_secs must be positive".to_string()));
        }

        match self.provider_type {
            ProviderType::OpenAI | ProviderType::Anthropic => {
                if self.api_key.as_deref().map_or(true, |key| key.trim().is_empty()) {
                    return Err(ProviderError::MissingApiKey);
                }
            }
            ProviderType::OpenAICompatible | ProviderType::Ollama => {
                if self.base_url.as_deref().map_or(true, |url| url.trim().is_empty()) {
                    return Err(ProviderError::InvalidConfig("base_url is required".to_string()));
                }
            }
            ProviderType::Demo => {}
        }
        Ok(())
    }
}

/// Sampling parameters applied to every provider request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            temperature: 0.7,
            top_p: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainSettings {
    /// Buffer size of the chain event channel
    pub event_capacity: usize,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self { event_capacity: 100 }
    }
}

impl Default for DevPilotConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();

        providers.insert("ollama".to_string(), ProviderConfig {
            name: "Ollama".to_string(),
            provider_type: ProviderType::Ollama,
            base_url: Some("http://localhost:11434".to_string()),
            api_key: None,
            model: "codellama".to_string(),
            timeout_secs: Some(300),
        });

        // OpenAI needs a key before it is usable
        providers.insert("openai".to_string(), ProviderConfig {
            name: "OpenAI".to_string(),
            provider_type: ProviderType::OpenAI,
            base_url: Some("https://api.openai.com/v1".to_string()),
            api_key: None,
            model: "gpt-4".to_string(),
            timeout_secs: Some(60),
        });

        providers.insert("demo".to_string(), ProviderConfig {
            name: "Demo".to_string(),
            provider_type: ProviderType::Demo,
            base_url: None,
            api_key: None,
            model: "demo-assistant".to_string(),
            timeout_secs: None,
        });

        Self {
            default_provider: "ollama".to_string(),
            fallback_order: vec!["openai".to_string(), "demo".to_string()],
            providers,
            generation: GenerationSettings::default(),
            chains: ChainSettings::default(),
        }
    }
}

impl DevPilotConfig {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            // Create default config file
            let default_config = Self::default();
            default_config.save_to(&config_path)?;
            Ok(default_config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn config_file_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home.join(".config").join("devpilot").join("config.toml"))
    }

    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Provider names in the order they should be tried: default first,
    /// then the fallback list, without duplicates.
    pub fn provider_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for name in std::iter::once(&self.default_provider).chain(self.fallback_order.iter()) {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }
        order
    }

    /// Configured providers whose entries fail validation, by name.
    pub fn provider_problems(&self) -> Vec<(String, ProviderError)> {
        let mut problems: Vec<(String, ProviderError)> = self
            .providers
            .iter()
            .filter_map(|(name, provider)| provider.validate().err().map(|e| (name.clone(), e)))
            .collect();
        problems.sort_by(|a, b| a.0.cmp(&b.0));
        problems
    }

    pub fn set_default_provider(&mut self, provider: String) -> Result<()> {
        if self.providers.contains_key(&provider) {
            self.default_provider = provider;
            return Ok(());
        }
        Err(anyhow::anyhow!("Provider {} not found", provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_order_deduplicates() {
        let mut config = DevPilotConfig::default();
        config.fallback_order = vec![
            "openai".to_string(),
            "ollama".to_string(),
            "demo".to_string(),
        ];

        assert_eq!(config.provider_order(), vec!["ollama", "openai", "demo"]);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = DevPilotConfig::default();
        config.generation.temperature = 0.2;
        config.set_default_provider("demo".to_string()).unwrap();
        config.save_to(&path).unwrap();

        let loaded = DevPilotConfig::load_from(&path).unwrap();
        assert_eq!(loaded.default_provider, "demo");
        assert_eq!(loaded.generation.temperature, 0.2);
        assert_eq!(loaded.providers.len(), 3);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_provider = \"demo\"\n").unwrap();

        let loaded = DevPilotConfig::load_from(&path).unwrap();
        assert!(loaded.providers.is_empty());
        assert_eq!(loaded.generation, GenerationSettings::default());
        assert_eq!(loaded.chains.event_capacity, 100);
        assert_eq!(loaded.provider_order(), vec!["demo"]);
    }

    #[test]
    fn test_provider_problems_report_missing_settings() {
        let mut config = DevPilotConfig::default();

        let problems = config.provider_problems();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].0, "openai");
        assert!(matches!(problems[0].1, ProviderError::MissingApiKey));

        if let Some(openai) = config.providers.get_mut("openai") {
            openai.api_key = Some("sk-test".to_string());
        }
        if let Some(ollama) = config.providers.get_mut("ollama") {
            ollama.base_url = None;
            ollama.timeout_secs = Some(0);
        }

        let problems = config.provider_problems();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].0, "ollama");
        assert_eq!(
            problems[0].1.to_string(),
            "Invalid configuration: timeout_secs must be positive"
        );
    }

    #[test]
    fn test_unknown_default_provider_rejected() {
        let mut config = DevPilotConfig::default();
        assert!(config.set_default_provider("nope".to_string()).is_err());
        assert_eq!(config.default_provider, "ollama");
    }
}
