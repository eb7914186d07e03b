//! AI analysis collaborator
//!
//! The analyzer returns raw JSON. Interpretation into a `PlantRecord` or a
//! candidate list happens here, with every response checked against the
//! expected shape before use.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::{validate_plant_record, Candidate, ErrorKind, PlantRecord, SchemaViolation};

/// Analyzer failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("No plant found for the request")]
    NotFound,

    #[error("Image does not show a plant")]
    NotAPlant,
}

impl AnalysisError {
    /// User-facing classification
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::Network(_) => ErrorKind::Network,
            AnalysisError::RateLimited
            | AnalysisError::Api(..)
            | AnalysisError::EmptyResponse
            | AnalysisError::NotAPlant => ErrorKind::AnalysisFailed,
            AnalysisError::Malformed(_) => ErrorKind::MalformedResponse,
            AnalysisError::NotFound => ErrorKind::NotFound,
        }
    }
}

impl From<SchemaViolation> for AnalysisError {
    fn from(violation: SchemaViolation) -> Self {
        AnalysisError::Malformed(violation.to_string())
    }
}

/// Generative model that identifies plants
#[async_trait]
pub trait PlantAnalyzer: Send + Sync {
    /// Identify the plant in a photo
    async fn analyze_image(
        &self,
        bytes: &[u8],
        mime: &str,
        language: &str,
    ) -> Result<Value, AnalysisError>;

    /// Full record for a plant known by name
    async fn analyze_name(&self, name: &str, language: &str) -> Result<Value, AnalysisError>;

    /// Plants whose names match a free-text query
    async fn match_candidates(&self, query: &str, language: &str) -> Result<Value, AnalysisError>;
}

/// Turn an identification response into a validated record
///
/// `{"notFound": true}` and `{"isPlant": false}` are the model's explicit
/// negative answers; anything else must be a complete record.
pub fn interpret_identification(value: &Value) -> Result<PlantRecord, AnalysisError> {
    if value.get("notFound").and_then(Value::as_bool) == Some(true) {
        return Err(AnalysisError::NotFound);
    }
    if value.get("isPlant").and_then(Value::as_bool) == Some(false) {
        return Err(AnalysisError::NotAPlant);
    }

    Ok(validate_plant_record(value)?)
}

/// Parse a candidate-matching response
///
/// Accepts `{"candidates": [...]}` or a bare array. Entries without a
/// scientific name are dropped; a wrong outer shape is an error.
pub fn parse_candidates(value: &Value) -> Result<Vec<Candidate>, AnalysisError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("candidates") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => return Ok(Vec::new()),
            Some(_) => {
                return Err(AnalysisError::Malformed(
                    "candidates: expected array".to_string(),
                ))
            }
        },
        _ => {
            return Err(AnalysisError::Malformed(
                "expected object or array of candidates".to_string(),
            ))
        }
    };

    let candidates = items
        .iter()
        .filter_map(|item| {
            let scientific = item.get("scientificName")?.as_str()?.trim();
            if scientific.is_empty() {
                return None;
            }
            let common = item
                .get("commonName")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim();
            Some(Candidate {
                common_name: common.to_string(),
                scientific_name: scientific.to_string(),
                image_url: None,
            })
        })
        .collect();

    Ok(candidates)
}

/// Extract the JSON document from model text output
///
/// Models sometimes wrap JSON in a Markdown code fence even when asked not to.
pub fn extract_json(text: &str) -> Result<Value, AnalysisError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AnalysisError::EmptyResponse);
    }

    let body = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    };

    serde_json::from_str(body).map_err(|e| AnalysisError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plant_record::fixtures::plant_json;
    use serde_json::json;

    #[test]
    fn test_negative_answers() {
        assert_eq!(
            interpret_identification(&json!({"notFound": true})),
            Err(AnalysisError::NotFound)
        );
        assert_eq!(
            interpret_identification(&json!({"isPlant": false})),
            Err(AnalysisError::NotAPlant)
        );
    }

    #[test]
    fn test_incomplete_record_is_malformed_not_coerced() {
        let mut value = plant_json("Rose", "Rosa");
        value["wateringIntervalDays"] = json!("weekly");
        let err = interpret_identification(&value).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[test]
    fn test_valid_record() {
        let record = interpret_identification(&plant_json("Rose", "Rosa rubiginosa")).unwrap();
        assert_eq!(record.scientific_name, "Rosa rubiginosa");
    }

    #[test]
    fn test_parse_candidates_shapes() {
        let wrapped = json!({"candidates": [
            {"commonName": "Rose", "scientificName": "Rosa"},
            {"commonName": "Nameless"},
            {"scientificName": "Rosa canina"}
        ]});
        let parsed = parse_candidates(&wrapped).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].common_name, "");

        assert!(parse_candidates(&json!([])).unwrap().is_empty());
        assert!(parse_candidates(&json!({})).unwrap().is_empty());
        assert!(parse_candidates(&json!("rose")).is_err());
    }

    #[test]
    fn test_extract_json_strips_fence() {
        let fenced = "```json\n{\"notFound\": true}\n```";
        assert_eq!(extract_json(fenced).unwrap(), json!({"notFound": true}));
        assert_eq!(extract_json("  "), Err(AnalysisError::EmptyResponse));
        assert!(matches!(extract_json("not json"), Err(AnalysisError::Malformed(_))));
    }

    #[test]
    fn test_rate_limit_maps_to_analysis_failed() {
        assert_eq!(AnalysisError::RateLimited.kind(), ErrorKind::AnalysisFailed);
        assert_eq!(AnalysisError::Network("x".into()).kind(), ErrorKind::Network);
    }
}
