//! Generative Backend Client
//!
//! The engine talks to the backend through the [`TextGenerator`] trait so the
//! orchestration logic can be exercised against a mock. Two model tiers are
//! exposed: the engine uses the fast one for free-form dialogue and the
//! accurate one for practice-question generation.

use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Which model variant to route a request to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// The faster default model.
    Fast,
    /// The higher-accuracy model.
    Accurate,
}

/// A capability that turns a prompt into generated text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, tier: ModelTier) -> Result<String>;
}

/// A `TextGenerator` backed by the Gemini `generateContent` REST endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    fast_model: String,
    accurate_model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, fast_model: String, accurate_model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            fast_model,
            accurate_model,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.gemini_api_key.clone(),
            config.fast_model.clone(),
            config.accurate_model.clone(),
        )
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast_model,
            ModelTier::Accurate => &self.accurate_model,
        }
    }

    /// Concatenates the text parts of the first candidate.
    fn extract_text(payload: &Value) -> Option<String> {
        let parts = payload.pointer("/candidates/0/content/parts")?.as_array()?;
        let text: String = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect();
        if text.is_empty() { None } else { Some(text) }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str, tier: ModelTier) -> Result<String> {
        let model = self.model_for(tier);
        debug!(%model, prompt_len = prompt.len(), "sending generation request");

        let url = format!("{GEMINI_API_BASE}/{model}:generateContent");
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .context("generation request failed")?
            .error_for_status()
            .context("generation backend returned an error status")?;

        let payload: Value = response
            .json()
            .await
            .context("failed to decode generation response")?;

        Self::extract_text(&payload).context("generation response contained no text")
    }
}
