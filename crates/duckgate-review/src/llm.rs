use std::time::Duration;

use async_trait::async_trait;
use duckgate_core::{BackendConfig, Category, DuckgateError, ReviewResult, ReviewUnit};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{BackendError, ReviewBackend};
use crate::prompt::{build_review_prompt, build_system_prompt, parse_review_response, split_findings};

/// Defaults for a known chat-completions provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPreset {
    /// Value of `provider` in `[[backends]]`.
    pub id: &'static str,
    /// OpenAI-compatible base URL; requests go to `{base_url}/chat/completions`.
    pub base_url: &'static str,
    pub model: &'static str,
    /// Environment variable consulted for the API key; `None` for keyless
    /// local providers.
    pub api_key_env: Option<&'static str>,
}

/// Every provider duckgate knows how to reach.
pub const PROVIDERS: &[ProviderPreset] = &[
    ProviderPreset {
        id: "openai",
        base_url: "https://api.openai.com/v1",
        model: "gpt-4o",
        api_key_env: Some("OPENAI_API_KEY"),
    },
    ProviderPreset {
        id: "anthropic",
        base_url: "https://api.anthropic.com/v1",
        model: "claude-sonnet-4-20250514",
        api_key_env: Some("ANTHROPIC_API_KEY"),
    },
    ProviderPreset {
        id: "xai",
        base_url: "https://api.x.ai/v1",
        model: "grok-3",
        api_key_env: Some("XAI_API_KEY"),
    },
    ProviderPreset {
        id: "gemini",
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
        model: "gemini-2.0-flash",
        api_key_env: Some("GEMINI_API_KEY"),
    },
    ProviderPreset {
        id: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        model: "deepseek-chat",
        api_key_env: Some("DEEPSEEK_API_KEY"),
    },
    ProviderPreset {
        id: "mistral",
        base_url: "https://api.mistral.ai/v1",
        model: "mistral-large-latest",
        api_key_env: Some("MISTRAL_API_KEY"),
    },
    ProviderPreset {
        id: "copilot",
        base_url: "https://models.inference.ai.azure.com",
        model: "gpt-4o",
        api_key_env: Some("GITHUB_TOKEN"),
    },
    ProviderPreset {
        id: "ollama",
        base_url: "http://localhost:11434/v1",
        model: "llama3.1",
        api_key_env: None,
    },
];

/// Look up a provider preset by id (case-insensitive).
///
/// # Examples
///
/// ```
/// use duckgate_review::llm::preset;
///
/// assert_eq!(preset("Anthropic").unwrap().api_key_env, Some("ANTHROPIC_API_KEY"));
/// assert!(preset("ollama").unwrap().api_key_env.is_none());
/// assert!(preset("nope").is_none());
/// ```
pub fn preset(provider: &str) -> Option<&'static ProviderPreset> {
    PROVIDERS
        .iter()
        .find(|p| p.id.eq_ignore_ascii_case(provider))
}

/// A message in a chat conversation with the LLM.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Role in the chat conversation.
///
/// # Examples
///
/// ```
/// use duckgate_review::llm::Role;
///
/// assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// OpenAI-compatible chat completions client.
///
/// Failures are classified for the orchestrator: 429 becomes
/// [`BackendError::RateLimited`], timeouts, connection errors, 408 and 5xx
/// become [`BackendError::Transient`], and every other error status is
/// [`BackendError::Fatal`].
///
/// # Examples
///
/// ```
/// use duckgate_core::BackendConfig;
/// use duckgate_review::llm::LlmClient;
///
/// let config = BackendConfig {
///     provider: "deepseek".into(),
///     api_key: Some("test-key".into()),
///     ..BackendConfig::default()
/// };
/// let client = LlmClient::new(&config).unwrap();
/// assert_eq!(client.model(), "deepseek-chat");
/// assert_eq!(client.base_url(), "https://api.deepseek.com/v1");
/// ```
#[derive(Debug, Clone)]
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmClient {
    /// Create a client from one `[[backends]]` entry.
    ///
    /// The API key is taken from `api_key`, then the `api_key_env` variable,
    /// then the preset's variable. Providers not in [`PROVIDERS`] need an
    /// explicit `base_url` and `model`.
    ///
    /// # Errors
    ///
    /// Returns [`DuckgateError::Config`] for an unknown provider without a
    /// base URL and model, or a keyed provider without a key, and
    /// [`DuckgateError::Backend`] if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self, DuckgateError> {
        let preset = preset(&config.provider);

        let base_url = match (&config.base_url, preset) {
            (Some(url), _) => url.clone(),
            (None, Some(p)) => p.base_url.to_string(),
            (None, None) => {
                return Err(DuckgateError::Config(format!(
                    "unknown provider '{}': set base_url for a custom OpenAI-compatible endpoint",
                    config.provider
                )))
            }
        };
        let model = match (&config.model, preset) {
            (Some(model), _) => model.clone(),
            (None, Some(p)) => p.model.to_string(),
            (None, None) => {
                return Err(DuckgateError::Config(format!(
                    "provider '{}' has no default model: set model",
                    config.provider
                )))
            }
        };

        let api_key = config
            .api_key
            .clone()
            .or_else(|| config.api_key_env.as_deref().and_then(read_env))
            .or_else(|| preset.and_then(|p| p.api_key_env).and_then(read_env));
        if api_key.is_none() {
            if let Some(var) = preset.and_then(|p| p.api_key_env) {
                return Err(DuckgateError::Config(format!(
                    "no API key for backend '{}': set {var} or api_key_env",
                    config.display_name()
                )));
            }
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| DuckgateError::Backend(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a chat completion request and return the text response.
    ///
    /// # Errors
    ///
    /// Returns a classified [`BackendError`].
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.1,
        });

        let mut request = self.client.post(&url);
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }
        request = request.header("Content-Type", "application/json");

        let response = request.json(&body).send().await.map_err(|e| {
            if e.is_builder() {
                BackendError::Fatal(format!("invalid request: {e}"))
            } else {
                BackendError::transient(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body_text));
        }

        let response_body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::transient(format!("failed to read response: {e}")))?;

        let content = response_body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                BackendError::Fatal(format!("unexpected response structure: {response_body}"))
            })?;

        Ok(content.to_string())
    }
}

fn read_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> BackendError {
    let snippet: String = body.chars().take(300).collect();
    if status == StatusCode::TOO_MANY_REQUESTS {
        BackendError::RateLimited { retry_after }
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        BackendError::Transient {
            message: format!("API error {status}: {snippet}"),
            retry_after,
        }
    } else {
        BackendError::Fatal(format!("API error {status}: {snippet}"))
    }
}

/// [`ReviewBackend`] over an OpenAI-compatible chat endpoint.
///
/// One request per batch: every unit becomes a `=== path (hunk) ===` section
/// of the user prompt and the findings are split back per unit.
#[derive(Debug, Clone)]
pub struct LlmBackend {
    name: String,
    client: LlmClient,
    system_prompt: String,
}

impl LlmBackend {
    /// # Errors
    ///
    /// See [`LlmClient::new`].
    pub fn new(config: &BackendConfig, categories: &[Category]) -> Result<Self, DuckgateError> {
        let client = LlmClient::new(config)?;
        Ok(Self::with_client(config.display_name(), client, categories))
    }

    pub fn with_client(name: impl Into<String>, client: LlmClient, categories: &[Category]) -> Self {
        Self {
            name: name.into(),
            client,
            system_prompt: build_system_prompt(categories),
        }
    }

    pub fn client(&self) -> &LlmClient {
        &self.client
    }
}

#[async_trait]
impl ReviewBackend for LlmBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, units: &[ReviewUnit]) -> Result<Vec<ReviewResult>, BackendError> {
        if units.is_empty() {
            return Ok(Vec::new());
        }
        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: self.system_prompt.clone(),
            },
            ChatMessage {
                role: Role::User,
                content: build_review_prompt(units),
            },
        ];

        debug!(backend = %self.name, model = %self.client.model(), units = units.len(), "calling reviewer");
        let raw = self.client.chat(messages).await?;
        let findings = parse_review_response(&raw);
        debug!(backend = %self.name, findings = findings.len(), "reviewer responded");
        Ok(split_findings(units, findings))
    }
}
