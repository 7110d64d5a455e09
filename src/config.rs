//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::Result;
use crate::error::Error;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// LLM provider to use ("openai", "openai-compat" or "gemini")
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,

    /// API key; falls back to the environment when empty
    #[serde(default)]
    pub api_key: String,

    /// Override for the provider endpoint
    #[serde(default)]
    pub base_url: Option<String>,

    /// Maximum model calls per query
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Run resource-modifying tools without asking
    #[serde(default)]
    pub skip_permissions: bool,

    /// Root directory for persisted sessions
    #[serde(default = "default_session_root")]
    pub session_root: PathBuf,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub pricing: PricingConfig,

    /// Raw HTTP journal (JSON lines); disabled when unset
    #[serde(default)]
    pub journal_path: Option<PathBuf>,

    /// Working directory for tool invocations
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Kubeconfig passed to kubectl
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Extra instructions appended to the system prompt
    #[serde(default)]
    pub extra_prompt_path: Option<PathBuf>,
}

/// Retry policy for opening a model turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Prices in USD per million tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default)]
    pub input_per_mtok: f64,

    #[serde(default)]
    pub output_per_mtok: f64,
}

impl PricingConfig {
    /// Cost of one turn in USD.
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 * self.input_per_mtok
            + completion_tokens as f64 * self.output_per_mtok)
            / 1_000_000.0
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4.1".to_string()
}

fn default_max_iterations() -> usize {
    20
}

fn default_session_root() -> PathBuf {
    config_dir().join("sessions")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: String::new(),
            base_url: None,
            max_iterations: default_max_iterations(),
            skip_permissions: false,
            session_root: default_session_root(),
            retry: RetryConfig::default(),
            pricing: PricingConfig::default(),
            journal_path: None,
            work_dir: None,
            kubeconfig: None,
            extra_prompt_path: None,
        }
    }
}

impl Config {
    /// API key from the config file, else from the environment.
    pub fn resolve_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        let provider_var = match self.provider.as_str() {
            "gemini" => "GEMINI_API_KEY",
            _ => "OPENAI_API_KEY",
        };
        ["STEWARD_API_KEY", provider_var]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
            .unwrap_or_default()
    }
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".steward")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from file, falling back to defaults when missing
pub fn load(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("invalid config at {:?}: {}", path, e)))?;
    Ok(config)
}

/// Save configuration to file
pub fn save(config: &Config, path: &Path) -> Result<()> {
    // Create parent directory
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Interactive setup that writes the config file
pub fn onboard(path: &Path) -> Result<()> {
    use crate::ui;
    use inquire::{Confirm, Select, Text};

    ui::print_header("Setup");
    println!("  I'll ask a few questions and write {:?}.\n", path);

    let mut config = load(path)?;

    // 1. Select Provider
    let providers = vec![
        "OpenAI (Responses API)",
        "OpenAI-compatible endpoint",
        "Gemini",
    ];
    let provider_choice = Select::new("Choose your model provider:", providers)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    config.provider = match provider_choice {
        "Gemini" => "gemini",
        "OpenAI-compatible endpoint" => "openai-compat",
        _ => "openai",
    }
    .to_string();

    if config.provider == "openai-compat" {
        let url = Text::new("Endpoint base URL:")
            .with_default("http://localhost:8080/v1")
            .prompt()
            .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;
        config.base_url = Some(url);
    }

    let default_model = match config.provider.as_str() {
        "gemini" => "gemini-2.5-flash",
        _ => "gpt-4.1",
    };
    config.model = Text::new("Model:")
        .with_default(default_model)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    // 2. API key (optional when set in the environment)
    let key = Text::new("API key (leave empty to read it from the environment):")
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;
    config.api_key = key.trim().to_string();

    // 3. Permissions
    config.skip_permissions = Confirm::new("Run cluster-modifying commands without asking?")
        .with_default(false)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    // 4. Save Config
    ui::print_step("Saving configuration");
    std::fs::create_dir_all(&config.session_root)?;
    save(&config, path)?;

    println!();
    ui::print_success("Setup complete! Run 'steward' to start.");
    Ok(())
}
