//! Chat-model seam and the Ollama-backed client.
//!
//! Every LLM call in the pipeline goes through `ChatModel::chat` with a
//! bounded deadline; a timeout or transport failure surfaces as an
//! error at this boundary and is handled by the caller (empty answer,
//! heuristic fallback), never propagated past the orchestrator.

use std::sync::LazyLock;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

static CODE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```json\s*|\s*```").expect("code fence regex is valid"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Per-call generation options. `format` carries a JSON schema when
/// the caller needs structured output.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub format: Option<serde_json::Value>,
}

impl ChatOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature,
            top_p: None,
            format: None,
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String>;
}

/// Strip markdown code fences the model wraps JSON in.
pub fn strip_code_fences(content: &str) -> String {
    CODE_FENCE_RE.replace_all(content, "").trim().to_string()
}

/// Chat client for the native Ollama `/api/chat` endpoint.
pub struct OllamaChat {
    client: reqwest::Client,
    host: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

impl ModelTag {
    fn id(&self) -> &str {
        self.model.as_deref().or(self.name.as_deref()).unwrap_or("")
    }
}

impl OllamaChat {
    pub fn new(host: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to build LLM http client")?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Pull the configured model if it is not installed yet. Called
    /// once at startup; pulling can take a while on first run.
    pub async fn ensure_model(&self) -> Result<()> {
        let tags: TagsResponse = self
            .client
            .get(format!("{}/api/tags", self.host))
            .send()
            .await
            .context("Failed to list installed models")?
            .json()
            .await
            .context("Failed to parse model list")?;

        if tags.models.iter().any(|m| m.id().starts_with(&self.model)) {
            return Ok(());
        }

        tracing::info!(model = %self.model, "Model not installed, pulling");
        let response = self
            .client
            .post(format!("{}/api/pull", self.host))
            .json(&json!({ "model": self.model, "stream": false }))
            .send()
            .await
            .context("Model pull request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Model pull failed ({}): {}", status, body));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String> {
        let endpoint = format!("{}/api/chat", self.host);

        let mut request = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": { "temperature": options.temperature },
        });
        if let Some(top_p) = options.top_p {
            request["options"]["top_p"] = json!(top_p);
        }
        if let Some(format) = &options.format {
            request["format"] = format.clone();
        }

        let response = self
            .client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("LLM request to {} timed out", endpoint)
                } else {
                    anyhow!("LLM request to {} failed: {}", endpoint, e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("LLM error ({}): {}", status, body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat response")?;
        Ok(parsed.message.content)
    }
}
