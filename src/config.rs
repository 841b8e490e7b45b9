use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = ".redgreen.toml";

/// redgreen configuration loaded from `.redgreen.toml` and environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub files: FilesConfig,
    pub commands: CommandsConfig,
    pub provider: ProviderConfig,
    #[serde(rename = "loop")]
    pub looping: LoopConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub implementation: String,
    pub test: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub test: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Empty means the provider's own default model.
    pub model: String,
    pub max_tokens: u32,
    pub base_url: Option<String>,
    /// Whole-request timeout in seconds. 0 = none.
    pub timeout_secs: u64,
    pub stream: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// 0 = unlimited
    pub max_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[value(name = "openai")]
    #[serde(rename = "openai")]
    OpenAi,
    #[default]
    Anthropic,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "anthropic" => Some(ProviderKind::Anthropic),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            implementation: "main.go".to_string(),
            test: "main_test.go".to_string(),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            test: "go test".to_string(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            model: String::new(),
            max_tokens: 4096,
            base_url: None,
            timeout_secs: 0,
            stream: true,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 200 }
    }
}

impl Config {
    /// Load configuration from `<dir>/.redgreen.toml` and environment variables.
    /// Environment variables take precedence over config file values.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides (env vars take precedence)
    fn apply_env_overrides(&mut self) {
        // Files
        if let Ok(val) = env::var("REDGREEN_IMPL_FILE") {
            self.files.implementation = val;
        }
        if let Ok(val) = env::var("REDGREEN_TEST_FILE") {
            self.files.test = val;
        }

        // Commands
        if let Ok(val) = env::var("REDGREEN_TEST_CMD") {
            self.commands.test = val;
        }

        // Provider
        if let Ok(val) = env::var("REDGREEN_PROVIDER") {
            if let Some(kind) = ProviderKind::parse(&val) {
                self.provider.kind = kind;
            }
        }
        if let Ok(val) = env::var("REDGREEN_MODEL") {
            self.provider.model = val;
        }
        if let Ok(val) = env::var("REDGREEN_MAX_TOKENS") {
            if let Ok(n) = val.parse() {
                self.provider.max_tokens = n;
            }
        }
        if let Ok(val) = env::var("REDGREEN_BASE_URL") {
            self.provider.base_url = Some(val);
        }
        if let Ok(val) = env::var("REDGREEN_STREAM") {
            self.provider.stream = val.to_lowercase() == "true";
        }

        // Loop
        if let Ok(val) = env::var("REDGREEN_MAX_ITERATIONS") {
            if let Ok(n) = val.parse() {
                self.looping.max_iterations = n;
            }
        }
    }

    pub fn implementation_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.files.implementation)
    }

    pub fn test_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.files.test)
    }

    /// Generate a `.redgreen.toml` content string
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config to TOML")
    }
}
