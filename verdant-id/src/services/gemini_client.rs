//! Generative AI client (`generateContent` endpoint)
//!
//! Prompts ask for JSON only (`responseMimeType: application/json`); the text
//! of the first candidate part is parsed and handed back unvalidated.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use std::time::Duration;

use crate::services::analyzer::{extract_json, AnalysisError, PlantAnalyzer};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const REQUEST_TIMEOUT_SECS: u64 = 60;

const RECORD_SHAPE: &str = r#"{
  "commonName": string,
  "scientificName": string,
  "description": string,
  "care": {"water": string, "light": string, "soil": string, "temperature": string, "humidity": string, "fertilizer": string},
  "health": {"isHealthy": boolean, "diagnosis": string, "symptoms": [string], "treatment": [string]},
  "toxicity": {"isToxic": boolean, "details": string},
  "medicinal": {"isMedicinal": boolean, "uses": [string]},
  "wateringIntervalDays": integer
}"#;

fn image_prompt(language: &str) -> String {
    format!(
        "Identify the plant in this photo and assess its health. \
         Answer in language '{language}'. Respond with JSON only, using exactly this shape:\n{RECORD_SHAPE}\n\
         If the photo does not show a plant, respond with {{\"isPlant\": false}}."
    )
}

fn name_prompt(name: &str, language: &str) -> String {
    format!(
        "Give a complete profile of the plant \"{name}\" assuming a healthy specimen. \
         Answer in language '{language}'. Respond with JSON only, using exactly this shape:\n{RECORD_SHAPE}\n\
         If no plant with this name exists, respond with {{\"notFound\": true}}."
    )
}

fn match_prompt(query: &str, language: &str) -> String {
    format!(
        "List up to 5 plants whose common or scientific name matches \"{query}\". \
         Use language '{language}' for common names. Respond with JSON only: \
         {{\"candidates\": [{{\"commonName\": string, \"scientificName\": string}}]}}. \
         Use an empty list when nothing matches."
    )
}

/// `PlantAnalyzer` backed by the Gemini REST API
pub struct GeminiClient {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, AnalysisError> {
        Self::with_endpoint(api_key, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL)
    }

    pub fn with_endpoint(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, AnalysisError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    async fn generate(&self, operation: &str, parts: Vec<Value>) -> Result<Value, AnalysisError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "contents": [{"role": "user", "parts": parts}],
            "generationConfig": {"responseMimeType": "application/json"}
        });

        tracing::debug!(operation, model = %self.model, "Calling generative model");

        let response = self
            .http_client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        let status = response.status();

        if status.as_u16() == 429 {
            tracing::warn!(operation, "Generative model rate limit hit");
            return Err(AnalysisError::RateLimited);
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(operation, status = status.as_u16(), "Generative model call failed");
            return Err(AnalysisError::Api(status.as_u16(), error_text));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AnalysisError::Malformed(e.to_string()))?;

        let text = payload
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .ok_or(AnalysisError::EmptyResponse)?;

        extract_json(text)
    }
}

#[async_trait]
impl PlantAnalyzer for GeminiClient {
    async fn analyze_image(
        &self,
        bytes: &[u8],
        mime: &str,
        language: &str,
    ) -> Result<Value, AnalysisError> {
        let parts = vec![
            json!({"inline_data": {"mime_type": mime, "data": BASE64.encode(bytes)}}),
            json!({"text": image_prompt(language)}),
        ];
        self.generate("analyze_image", parts).await
    }

    async fn analyze_name(&self, name: &str, language: &str) -> Result<Value, AnalysisError> {
        let parts = vec![json!({"text": name_prompt(name, language)})];
        self.generate("analyze_name", parts).await
    }

    async fn match_candidates(&self, query: &str, language: &str) -> Result<Value, AnalysisError> {
        let parts = vec![json!({"text": match_prompt(query, language)})];
        self.generate("match_candidates", parts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation_trims_base_url() {
        let client = GeminiClient::with_endpoint("key", "http://localhost:1/v1/", "m").unwrap();
        assert_eq!(client.base_url, "http://localhost:1/v1");
    }

    #[test]
    fn test_prompts_carry_language_and_input() {
        assert!(image_prompt("de").contains("'de'"));
        assert!(name_prompt("Rosa canina", "en").contains("\"Rosa canina\""));
        assert!(match_prompt("rose", "en").contains("candidates"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let client = GeminiClient::with_endpoint("key", "http://127.0.0.1:9", "m").unwrap();
        let err = client.analyze_name("rose", "en").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Network(_)));
    }
}
