//! Configuration loading from TOML files.
//!
//! Lookup order:
//! 1. `--config` flag
//! 2. `$CPEVAL_CONFIG` environment variable
//! 3. `~/.config/cpeval/config.toml`
//! 4. Built-in defaults (everything is optional)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use cpeval_core::{ChatTemplate, EnvironmentCatalogue, PromptStyle};
use cpeval_gen::{GeneratorConfig, ProviderKind, RetryPolicy};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderSection,
    pub generation: GenerationSection,
    pub retry: RetrySection,
    pub tokenizer: TokenizerSection,
}

/// Model endpoint settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    /// `openai` (any OpenAI-compatible server) or `gemini`.
    pub kind: String,
    /// Defaults to the public endpoint of `kind`.
    pub endpoint: Option<String>,
    pub model: String,
    /// Environment variable holding the API key. Default depends on `kind`.
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
    /// Context window used for the prompt-length warning.
    pub max_context_tokens: Option<usize>,
}

/// Sampling and prompt settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GenerationSection {
    pub temperature: f64,
    pub candidate_num: usize,
    pub max_output_tokens: usize,
    pub cooldown_secs: f64,
    pub prompt_style: String,
    pub chat_template: String,
    /// `codeforces` (all clusters) or `python`.
    pub catalogue: String,
}

/// Backoff for transient provider failures.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub min_delay_secs: f64,
    pub max_delay_secs: f64,
    pub jitter: bool,
}

/// Token counting for budgets.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TokenizerSection {
    /// HuggingFace `tokenizer.json`; needs the `hf-tokenizer` feature.
    pub path: Option<String>,
    /// Used by the length estimate when no tokenizer file is set.
    pub bytes_per_token: usize,
}

// --- Defaults ---

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            kind: "openai".into(),
            endpoint: None,
            model: "gpt-4o-mini".into(),
            api_key_env: None,
            timeout_secs: 120,
            max_context_tokens: None,
        }
    }
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            candidate_num: 1,
            max_output_tokens: 2048,
            cooldown_secs: 5.0,
            prompt_style: "zero-shot".into(),
            chat_template: "raw".into(),
            catalogue: "codeforces".into(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            min_delay_secs: 1.0,
            max_delay_secs: 60.0,
            jitter: true,
        }
    }
}

impl Default for TokenizerSection {
    fn default() -> Self {
        Self {
            path: None,
            bytes_per_token: 4,
        }
    }
}

// --- Conversions into component configs ---

impl ProviderSection {
    pub fn kind(&self) -> Result<ProviderKind> {
        Ok(self.kind.parse()?)
    }

    pub fn endpoint(&self, kind: ProviderKind) -> String {
        self.endpoint.clone().unwrap_or_else(|| match kind {
            ProviderKind::OpenAi => "https://api.openai.com/v1/chat/completions".into(),
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta".into(),
        })
    }

    pub fn api_key_env(&self, kind: ProviderKind) -> String {
        self.api_key_env.clone().unwrap_or_else(|| match kind {
            ProviderKind::OpenAi => "OPENAI_API_KEY".into(),
            ProviderKind::Gemini => "GEMINI_API_KEY".into(),
        })
    }
}

impl GenerationSection {
    pub fn prompt_style(&self) -> Result<PromptStyle> {
        Ok(self.prompt_style.parse()?)
    }

    pub fn chat_template(&self) -> Result<ChatTemplate> {
        Ok(self.chat_template.parse()?)
    }

    pub fn catalogue(&self) -> Result<EnvironmentCatalogue> {
        match self.catalogue.to_lowercase().as_str() {
            "codeforces" | "all" => Ok(EnvironmentCatalogue::codeforces()),
            "python" => Ok(EnvironmentCatalogue::python_only()),
            other => anyhow::bail!("unknown catalogue: {other}"),
        }
    }

    pub fn generator_config(&self) -> Result<GeneratorConfig> {
        Ok(GeneratorConfig {
            cooldown: Duration::try_from_secs_f64(self.cooldown_secs)
                .context("generation.cooldown_secs")?,
            template: self.chat_template()?,
        })
    }
}

impl RetrySection {
    pub fn policy(&self) -> Result<RetryPolicy> {
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            min_delay: Duration::try_from_secs_f64(self.min_delay_secs)
                .context("retry.min_delay_secs")?,
            max_delay: Duration::try_from_secs_f64(self.max_delay_secs)
                .context("retry.max_delay_secs")?,
            jitter: self.jitter,
        })
    }
}

/// Load config from disk. Returns defaults if no config file exists.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = explicit.map(Path::to_path_buf).or_else(config_path);

    if let Some(p) = &path {
        if p.exists() {
            let content =
                std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("parsing {}", p.display()))?;
            return Ok(config);
        }
        if explicit.is_some() {
            anyhow::bail!("config file not found: {}", p.display());
        }
    }

    Ok(Config::default())
}

/// Resolve the config file path.
fn config_path() -> Option<PathBuf> {
    // 1. Environment variable
    if let Ok(p) = std::env::var("CPEVAL_CONFIG") {
        return Some(PathBuf::from(p));
    }

    // 2. ~/.config/cpeval/config.toml
    directories::BaseDirs::new().map(|dirs| {
        dirs.home_dir()
            .join(".config")
            .join("cpeval")
            .join("config.toml")
    })
}

/// Show the active config path (for `cpeval config`).
pub fn show_config_path(explicit: Option<&Path>) -> String {
    match explicit.map(Path::to_path_buf).or_else(config_path) {
        Some(p) if p.exists() => format!("{} (loaded)", p.display()),
        Some(p) => format!("{} (not found, using defaults)", p.display()),
        None => "no config path resolved (using defaults)".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.generation.temperature, 0.5);
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.generation.cooldown_secs, 5.0);
        let policy = config.retry.policy().unwrap();
        assert_eq!(policy.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[generation]
candidate_num = 5
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.generation.candidate_num, 5);
        // Other fields should be defaults
        assert_eq!(config.provider.kind, "openai");
        assert!(config.retry.jitter);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[provider]
kind = "gemini"
model = "gemini-2.0-flash"
api_key_env = "MY_KEY"
timeout_secs = 30
max_context_tokens = 1048576

[generation]
temperature = 0.2
candidate_num = 2
max_output_tokens = 1024
cooldown_secs = 0.5
prompt_style = "one-shot"
chat_template = "raw"
catalogue = "python"

[retry]
max_attempts = 3
min_delay_secs = 0.5
max_delay_secs = 10
jitter = false

[tokenizer]
path = "/models/llama/tokenizer.json"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let kind = config.provider.kind().unwrap();
        assert_eq!(kind, ProviderKind::Gemini);
        assert_eq!(
            config.provider.endpoint(kind),
            "https://generativelanguage.googleapis.com/v1beta"
        );
        assert_eq!(config.provider.api_key_env(kind), "MY_KEY");
        assert_eq!(config.generation.prompt_style().unwrap(), PromptStyle::OneShot);
        assert_eq!(
            config.generation.generator_config().unwrap().cooldown,
            Duration::from_millis(500)
        );
        assert!(config.generation.catalogue().unwrap().lookup("c++").is_err());
        let policy = config.retry.policy().unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.max_delay, Duration::from_secs(10));
        assert!(!policy.jitter);
        assert_eq!(config.tokenizer.path.as_deref(), Some("/models/llama/tokenizer.json"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config: Config = toml::from_str("[generation]\ncooldown_secs = -1.0\n").unwrap();
        assert!(config.generation.generator_config().is_err());
        let config: Config = toml::from_str("[provider]\nkind = \"bard\"\n").unwrap();
        assert!(config.provider.kind().is_err());
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config(Some(&missing)).is_err());

        let present = dir.path().join("cpeval.toml");
        std::fs::write(&present, "[retry]\nmax_attempts = 2\n").unwrap();
        assert_eq!(load_config(Some(&present)).unwrap().retry.max_attempts, 2);
    }
}
