//! HTTP generation providers.
//!
//! Both providers request all candidates in a single call. Transport errors
//! and retryable HTTP statuses surface as transient `CpError`s so the retry
//! policy can act on them.

use std::io;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use cpeval_core::{CpError, CpResult, SamplingParams, TextGenerator};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProviderKind {
    /// OpenAI-compatible `/v1/chat/completions` (vLLM, llama.cpp server, OpenAI, ...)
    #[default]
    OpenAi,
    /// Google `models/{model}:generateContent`
    Gemini,
}

impl FromStr for ProviderKind {
    type Err = CpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "openai-compatible" => Ok(Self::OpenAi),
            "gemini" | "google" => Ok(Self::Gemini),
            _ => Err(CpError::Config(format!("unknown provider kind: {s}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Full URL for OpenAI-compatible servers, API base for Gemini.
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_context_tokens: Option<usize>,
}

impl ProviderConfig {
    pub fn build(self) -> Box<dyn TextGenerator> {
        match self.kind {
            ProviderKind::OpenAi => Box::new(OpenAiProvider::new(self)),
            ProviderKind::Gemini => Box::new(GeminiProvider::new(self)),
        }
    }
}

fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

const ERROR_BODY_CHARS: usize = 500;

/// Keep at most `max` characters, cutting on a char boundary.
fn truncate_chars(mut text: String, max: usize) -> String {
    if let Some((cut, _)) = text.char_indices().nth(max) {
        text.truncate(cut);
    }
    text
}

fn map_ureq_error(err: ureq::Error) -> CpError {
    match err {
        ureq::Error::Status(status, response) => {
            let message = response.into_string().unwrap_or_default();
            CpError::Provider {
                status,
                message: truncate_chars(message, ERROR_BODY_CHARS),
            }
        }
        ureq::Error::Transport(t) => CpError::Transient(t.to_string()),
    }
}

/// A body that arrived but cannot be decoded is the provider's fault, not
/// the network's; only interrupted reads are retried.
fn map_body_error(err: io::Error) -> CpError {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => CpError::Provider {
            status: 200,
            message: format!("malformed response body: {err}"),
        },
        _ => CpError::Transient(format!("reading response body: {err}")),
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completions
// ---------------------------------------------------------------------------

pub struct OpenAiProvider {
    agent: ureq::Agent,
    config: ProviderConfig,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    #[serde(default)]
    index: usize,
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            agent: agent(config.timeout),
            config,
        }
    }
}

impl TextGenerator for OpenAiProvider {
    fn generate(&self, prompt: &str, params: &SamplingParams) -> CpResult<Vec<String>> {
        let body = json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": params.temperature,
            "n": params.candidate_count,
            "max_tokens": params.max_output_tokens,
        });

        let mut request = self.agent.post(&self.config.endpoint);
        if let Some(key) = &self.config.api_key {
            request = request.set("Authorization", &format!("Bearer {key}"));
        }
        let response = request.send_json(body).map_err(map_ureq_error)?;
        let mut completion: ChatCompletion = response.into_json().map_err(map_body_error)?;

        completion.choices.sort_by_key(|c| c.index);
        Ok(completion
            .choices
            .into_iter()
            .map(|c| c.message.content.unwrap_or_default())
            .collect())
    }

    fn max_context_tokens(&self) -> Option<usize> {
        self.config.max_context_tokens
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// ---------------------------------------------------------------------------
// Gemini generateContent
// ---------------------------------------------------------------------------

pub struct GeminiProvider {
    agent: ureq::Agent,
    config: ProviderConfig,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            agent: agent(config.timeout),
            config,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }
}

impl TextGenerator for GeminiProvider {
    fn generate(&self, prompt: &str, params: &SamplingParams) -> CpResult<Vec<String>> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": params.temperature,
                "candidateCount": params.candidate_count,
                "maxOutputTokens": params.max_output_tokens,
            },
        });

        let mut request = self.agent.post(&self.url());
        if let Some(key) = &self.config.api_key {
            request = request.set("x-goog-api-key", key);
        }
        let response = request.send_json(body).map_err(map_ureq_error)?;
        let parsed: GeminiResponse = response.into_json().map_err(map_body_error)?;

        Ok(parsed
            .candidates
            .into_iter()
            .map(|c| {
                c.content
                    .map(|content| {
                        content
                            .parts
                            .into_iter()
                            .filter_map(|p| p.text)
                            .collect::<String>()
                    })
                    .unwrap_or_default()
            })
            .collect())
    }

    fn max_context_tokens(&self) -> Option<usize> {
        self.config.max_context_tokens
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
