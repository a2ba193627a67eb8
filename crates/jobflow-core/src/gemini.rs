//! Gemini REST client.
//!
//! The form engine and handlers consume the model through the [`TextModel`]
//! trait, so tests substitute scripted fakes and the daemon wires this
//! client. Quota admission happens *before* calls reach this module; the
//! client itself is deliberately thin.
//!
//! API key: `GOOGLE_API_KEY` in `.env`. Default model: `gemini-2.0-flash`.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Text-generation seam consumed by the form engine and handlers.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Free-form completion.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Completion constrained to JSON output. Implementations should request
    /// a JSON response mode from the provider; the default parses the plain
    /// completion.
    async fn generate_json(&self, prompt: &str) -> Result<serde_json::Value> {
        let text = self.generate(prompt).await?;
        serde_json::from_str(strip_code_fences(&text))
            .map_err(|e| CoreError::Llm(format!("model returned non-JSON output: {}", e)))
    }
}

/// Models occasionally wrap JSON in markdown fences even when asked not to.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Reqwest-backed Gemini client.
pub struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a client using `GOOGLE_API_KEY`. Returns `None` if unset.
    pub fn from_env() -> Option<Self> {
        let key = std::env::var("GOOGLE_API_KEY").ok()?.trim().to_string();
        if key.is_empty() {
            return None;
        }
        Some(Self::new(key))
    }

    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key: api_key.trim().to_string(),
            model: DEFAULT_MODEL.to_string(),
            client,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    async fn call(&self, prompt: &str, json_mode: bool) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", API_BASE, self.model);
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: Some(GenerationConfig {
                response_mime_type: json_mode.then(|| "application/json".to_string()),
                temperature: Some(0.3),
            }),
        };

        let res = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CoreError::Llm(format!("Gemini API error {}: {}", status, body)));
        }

        let parsed: GenerateResponse = res.json().await?;
        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(CoreError::Llm("Gemini returned an empty response".into()));
        }
        Ok(text)
    }
}

#[async_trait]
impl TextModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.call(prompt, false).await
    }

    async fn generate_json(&self, prompt: &str) -> Result<serde_json::Value> {
        let text = self.call(prompt, true).await?;
        serde_json::from_str(strip_code_fences(&text))
            .map_err(|e| CoreError::Llm(format!("Gemini returned non-JSON output: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    }
}
