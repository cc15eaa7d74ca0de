//! OpenAI-compatible chat-completions generation step.

use crate::config::LlmSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use sim_coordination::{ContextBundle, GenerationError, Generator};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Calls `POST {url}/chat/completions` with the bundle's role instruction as
/// the system message and the rendered bundle as the user message.
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    top_p: f32,
}

impl ChatCompletionsGenerator {
    pub fn from_settings(settings: &LlmSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.url.trim_end_matches('/')),
            model: settings.model.clone(),
            api_key: settings.api_key.clone().filter(|k| !k.trim().is_empty()),
            temperature: settings.temperature,
            top_p: settings.top_p,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn request_body(&self, bundle: &ContextBundle) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": bundle.system},
                {"role": "user", "content": bundle.render()}
            ],
            "temperature": self.temperature,
            "top_p": self.top_p
        })
    }

    // The hosted endpoint always needs a key; self-hosted servers usually do not.
    fn requires_key(&self) -> bool {
        self.endpoint.contains("api.openai.com")
    }
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    async fn generate(&self, bundle: &ContextBundle) -> Result<String, GenerationError> {
        if self.api_key.is_none() && self.requires_key() {
            return Err(GenerationError::MissingApiKey);
        }

        let started = Instant::now();
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&self.request_body(bundle));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| GenerationError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Parse(e.to_string()))?;
        let content = completion_text(&body)?;

        info!(
            model = %self.model,
            attempt = bundle.attempt,
            chars = content.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Completion received"
        );
        Ok(content)
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response.
pub fn completion_text(body: &Value) -> Result<String, GenerationError> {
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| {
            GenerationError::Parse(format!(
                "response has no choices[0].message.content: {}",
                truncate(&body.to_string(), 200)
            ))
        })?;
    if content.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(content.to_string())
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Check if an inference endpoint is reachable (GET {url}/models).
pub async fn check_endpoint(settings: &LlmSettings) -> bool {
    let models_url = format!("{}/models", settings.url.trim_end_matches('/'));
    let mut request = reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5));
    if let Some(key) = &settings.api_key {
        request = request.header("Authorization", format!("Bearer {}", key));
    }
    match request.send().await {
        Ok(resp) => {
            debug!(url = %models_url, status = %resp.status(), "Endpoint responded");
            resp.status().is_success()
        }
        Err(_) => false,
    }
}
