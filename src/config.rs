use crate::error_handling::{display_config_change, display_info, display_success, display_warning};
use crate::logging::{with_logger, LogCategory};
use crate::{log_info, log_warning};
use anyhow::{anyhow, Result};
use colored::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const MIN_TIMEOUT_SECS: u64 = 5;
pub const MAX_TIMEOUT_SECS: u64 = 300;
pub const MAX_RETRIES_LIMIT: u32 = 10;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Ollama,
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Ollama => "llama3.1:8b",
            Self::OpenAi => "gpt-4",
            Self::Anthropic => "claude-3-5-sonnet-20241022",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Ollama => "http://localhost:11434/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com",
        }
    }

    pub fn requires_api_key(self) -> bool {
        !matches!(self, Self::Ollama)
    }

    /// Short model hint shown after switching providers
    pub fn suggestions(self) -> &'static str {
        match self {
            Self::Ollama => "llama3.1:8b (good balance), llama3.1:70b (best quality), qwen2.5:7b (fast), deepseek-r1:8b (reasoning)",
            Self::OpenAi => "gpt-4, gpt-4-turbo, gpt-3.5-turbo. API key required, costs apply per request.",
            Self::Anthropic => "claude-3-5-sonnet-20241022, claude-3-5-haiku-20241022. API key required, costs apply per request.",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(anyhow!(
                "Unknown provider '{}'. Expected one of: ollama, openai, anthropic",
                other
            )),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default)]
    pub provider: Provider,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Forwarded to the native chat endpoint so the model stays loaded
    #[serde(default)]
    pub keep_alive: Option<String>,

    /// Exchanges replayed from history into each request
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Consent to write prompts and replies to the log, applied at startup
    #[serde(default)]
    pub debug_logging: bool,

    #[serde(skip)]
    path: Option<PathBuf>,
}

fn default_model() -> String {
    Provider::Ollama.default_model().to_string()
}

fn default_base_url() -> String {
    Provider::Ollama.default_base_url().to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_temperature() -> f64 {
    0.1
}

fn default_history_turns() -> usize {
    2
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            model: default_model(),
            api_key: None,
            base_url: default_base_url(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            temperature: default_temperature(),
            keep_alive: None,
            history_turns: default_history_turns(),
            debug_logging: false,
            path: None,
        }
    }
}

impl AgentConfig {
    /// Load from the per-user settings file, falling back to defaults
    pub fn load() -> Self {
        match Self::get_config_path() {
            Some(path) => Self::load_from(path),
            None => Self::default(),
        }
    }

    /// Load from `path`. A missing, unreadable or invalid file yields the
    /// defaults, which are written back when no file existed.
    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str::<AgentConfig>(&content) {
                    Ok(mut config) => {
                        config.path = Some(path);
                        if let Err(e) = config.validate() {
                            eprintln!(
                                "{} Invalid settings detected: {}. Using defaults.",
                                "Warning:".yellow(),
                                e
                            );
                            log_warning!(LogCategory::Configuration, format!("Invalid settings: {}", e));
                            return Self::create_default_config(config.path);
                        }
                        return config;
                    }
                    Err(e) => {
                        eprintln!(
                            "{} Failed to parse settings: {}. Using defaults.",
                            "Warning:".yellow(),
                            e
                        );
                        log_warning!(LogCategory::Configuration, "Failed to parse settings file");
                    }
                },
                Err(e) => {
                    eprintln!("{} Could not read settings: {}", "Warning:".yellow(), e);
                }
            }
            let mut config = Self::default();
            config.path = Some(path);
            return config;
        }

        Self::create_default_config(Some(path))
    }

    fn create_default_config(path: Option<PathBuf>) -> Self {
        let config = Self {
            path: path.clone(),
            ..Self::default()
        };

        if let Some(path) = path {
            if !path.exists() {
                if let Some(parent) = path.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                let _ = fs::write(&path, serde_json::to_string_pretty(&config).unwrap_or_default());
            }
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout < MIN_TIMEOUT_SECS || self.timeout > MAX_TIMEOUT_SECS {
            return Err(anyhow!(
                "timeout must be between {} and {} seconds",
                MIN_TIMEOUT_SECS,
                MAX_TIMEOUT_SECS
            ));
        }

        if self.max_retries == 0 || self.max_retries > MAX_RETRIES_LIMIT {
            return Err(anyhow!("max_retries must be between 1 and {}", MAX_RETRIES_LIMIT));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(anyhow!("temperature must be between 0.0 and 2.0"));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(anyhow!("base_url must be a valid HTTP/HTTPS URL"));
        }

        if self.model.trim().is_empty() {
            return Err(anyhow!("model name cannot be empty"));
        }

        if self.provider.requires_api_key() && self.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(anyhow!("{} requires an api_key", self.provider));
        }

        if self.history_turns > crate::history::HISTORY_CAPACITY {
            return Err(anyhow!(
                "history_turns cannot exceed {}",
                crate::history::HISTORY_CAPACITY
            ));
        }

        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn save(&self) -> Result<()> {
        self.validate()?;

        let path = self
            .path
            .clone()
            .or_else(Self::get_config_path)
            .ok_or_else(|| anyhow!("Could not find config directory"))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;

        log_info!(LogCategory::Configuration, "Settings saved successfully");
        Ok(())
    }

    /// Apply a validated change, log it and persist. On failure the old
    /// value is restored.
    fn update<F>(&mut self, setting: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Self),
    {
        let previous = self.clone();
        apply(self);

        if let Err(e) = self.save() {
            *self = previous;
            return Err(e);
        }

        let old_value = previous.setting_value(setting);
        let new_value = self.setting_value(setting);
        with_logger(|l| l.log_config_change(setting, &old_value, &new_value));
        display_config_change(setting, &old_value, &new_value);
        Ok(())
    }

    fn setting_value(&self, setting: &str) -> String {
        match setting {
            "provider" => self.provider.to_string(),
            "model" => self.model.clone(),
            "base_url" => self.base_url.clone(),
            "timeout" => format!("{}s", self.timeout),
            "max_retries" => self.max_retries.to_string(),
            "temperature" => self.temperature.to_string(),
            "keep_alive" => self.keep_alive.clone().unwrap_or_else(|| "none".to_string()),
            "api_key" => self.masked_api_key(),
            "debug_logging" => if self.debug_logging { "on" } else { "off" }.to_string(),
            _ => String::new(),
        }
    }

    /// Switch provider and apply its model and URL presets
    pub fn set_provider(&mut self, provider: Provider, api_key: Option<String>) -> Result<()> {
        self.update("provider", |c| {
            c.provider = provider;
            c.model = provider.default_model().to_string();
            c.base_url = provider.default_base_url().to_string();
            if !provider.requires_api_key() {
                c.api_key = None;
            } else if api_key.is_some() {
                c.api_key = api_key;
            }
        })?;
        display_info(&format!("Suggested models: {}", provider.suggestions()));
        Ok(())
    }

    pub fn set_model(&mut self, model: &str) -> Result<()> {
        let model = model.trim().to_string();
        self.update("model", |c| c.model = model)
    }

    pub fn set_base_url(&mut self, url: &str) -> Result<()> {
        let url = url.trim().trim_end_matches('/').to_string();
        self.update("base_url", |c| c.base_url = url)
    }

    pub fn set_timeout(&mut self, seconds: u64) -> Result<()> {
        self.update("timeout", |c| c.timeout = seconds)?;
        if seconds < 30 {
            display_warning("Short timeouts can cut off larger models mid-answer.");
        }
        Ok(())
    }

    pub fn set_max_retries(&mut self, retries: u32) -> Result<()> {
        self.update("max_retries", |c| c.max_retries = retries)
    }

    pub fn set_temperature(&mut self, temperature: f64) -> Result<()> {
        self.update("temperature", |c| c.temperature = temperature)
    }

    pub fn set_keep_alive(&mut self, keep_alive: Option<String>) -> Result<()> {
        self.update("keep_alive", |c| c.keep_alive = keep_alive)
    }

    pub fn set_debug_logging(&mut self, enabled: bool) -> Result<()> {
        self.update("debug_logging", |c| c.debug_logging = enabled)
    }

    /// Restore every setting to its default and save
    pub fn reset(&mut self) -> Result<()> {
        let path = self.path.clone();
        *self = Self {
            path,
            ..Self::default()
        };
        self.save()?;
        with_logger(|l| l.log_config_change("all", "custom", "defaults"));
        display_success("Settings reset to defaults");
        Ok(())
    }

    pub fn masked_api_key(&self) -> String {
        match self.api_key.as_deref() {
            Some(key) if key.len() > 8 => format!("{}...{}", &key[..4], &key[key.len() - 4..]),
            Some(_) => "********".to_string(),
            None => "none".to_string(),
        }
    }

    pub fn display(&self) {
        println!("{}", "🛠️  VibeCAD AI Settings:".bold());
        println!("Provider: {}", self.provider.to_string().cyan());
        println!("Model: {}", self.model.cyan());
        println!("Base URL: {}", self.base_url);
        println!("API key: {}", self.masked_api_key());
        println!();
        println!("Timeout: {}s", self.timeout);
        println!("Max retries: {}", self.max_retries);
        println!("Temperature: {}", self.temperature);
        println!("Keep alive: {}", self.keep_alive.as_deref().unwrap_or("none"));
        println!("History turns: {}", self.history_turns);
        println!("Debug logging: {}", if self.debug_logging { "on" } else { "off" });
        if let Some(path) = &self.path {
            println!("{}", format!("Settings file: {}", path.display()).dimmed());
        }
    }

    fn get_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("vibecad");
            path.push("ai_settings.json");
            path
        })
    }
}
