//! Plant identification records and their structural contract
//!
//! AI responses are loose JSON. Nothing downstream trusts them until
//! `validate_plant_record` has checked every required field and primitive
//! type; a mismatch is rejected, never coerced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Resolved identification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantRecord {
    /// Collection id, set once saved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub common_name: String,
    pub scientific_name: String,
    pub description: String,
    pub care: CareGuide,
    pub health: HealthAssessment,
    pub toxicity: Toxicity,
    pub medicinal: MedicinalInfo,
    /// Days between waterings
    pub watering_interval_days: u32,
    /// Preview image (remote URL or `data:` URL of the submitted photo)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Set once saved to the collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CareGuide {
    pub water: String,
    pub light: String,
    pub soil: String,
    pub temperature: String,
    pub humidity: String,
    pub fertilizer: String,
}

/// Health diagnosis
///
/// `symptoms` and `treatment` are only meaningful when `is_healthy` is false;
/// display layers hide them for a healthy plant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthAssessment {
    pub is_healthy: bool,
    pub diagnosis: String,
    pub symptoms: Vec<String>,
    pub treatment: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toxicity {
    pub is_toxic: bool,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicinalInfo {
    pub is_medicinal: bool,
    pub uses: Vec<String>,
}

impl PlantRecord {
    /// Identification fields only (drops collection id, timestamp and image)
    ///
    /// Two records describe the same identification iff their identities match.
    pub fn identity(&self) -> PlantRecord {
        PlantRecord {
            id: None,
            saved_at: None,
            image_url: None,
            ..self.clone()
        }
    }
}

/// Disambiguation option for an ambiguous text query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub common_name: String,
    pub scientific_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl Candidate {
    /// Name sent to the AI collaborator when this candidate is picked
    pub fn lookup_name(&self) -> String {
        if self.common_name.is_empty() {
            self.scientific_name.clone()
        } else {
            format!("{} ({})", self.common_name, self.scientific_name)
        }
    }
}

/// Structural contract violation in an AI response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field `{path}`: expected {expected}")]
pub struct SchemaViolation {
    pub path: String,
    pub expected: &'static str,
}

impl SchemaViolation {
    fn new(path: impl Into<String>, expected: &'static str) -> Self {
        Self {
            path: path.into(),
            expected,
        }
    }
}

const CARE_FIELDS: [&str; 6] = ["water", "light", "soil", "temperature", "humidity", "fertilizer"];

/// Validate a PlantRecord-shaped JSON value and convert it
///
/// Checks presence and primitive type of every required field, that array
/// fields are arrays of strings, and that the watering interval is a
/// non-negative integer (a float or numeric string is rejected).
pub fn validate_plant_record(value: &Value) -> Result<PlantRecord, SchemaViolation> {
    let root = value
        .as_object()
        .ok_or_else(|| SchemaViolation::new("$", "object"))?;

    require_name(root.get("commonName"), "commonName")?;
    require_name(root.get("scientificName"), "scientificName")?;
    require_string(root.get("description"), "description")?;

    let care = require_object(root.get("care"), "care")?;
    for field in CARE_FIELDS {
        require_string(care.get(field), &format!("care.{}", field))?;
    }

    let health = require_object(root.get("health"), "health")?;
    require_bool(health.get("isHealthy"), "health.isHealthy")?;
    require_string(health.get("diagnosis"), "health.diagnosis")?;
    require_string_array(health.get("symptoms"), "health.symptoms")?;
    require_string_array(health.get("treatment"), "health.treatment")?;

    let toxicity = require_object(root.get("toxicity"), "toxicity")?;
    require_bool(toxicity.get("isToxic"), "toxicity.isToxic")?;
    require_string(toxicity.get("details"), "toxicity.details")?;

    let medicinal = require_object(root.get("medicinal"), "medicinal")?;
    require_bool(medicinal.get("isMedicinal"), "medicinal.isMedicinal")?;
    require_string_array(medicinal.get("uses"), "medicinal.uses")?;

    match root.get("wateringIntervalDays").and_then(Value::as_u64) {
        Some(days) if days <= u32::MAX as u64 => {}
        _ => {
            return Err(SchemaViolation::new(
                "wateringIntervalDays",
                "non-negative integer",
            ))
        }
    }

    // Optional fields are type checked when present
    if let Some(url) = root.get("imageUrl") {
        if !url.is_null() && !url.is_string() {
            return Err(SchemaViolation::new("imageUrl", "string or null"));
        }
    }

    // Collection metadata is never taken from the AI
    let mut fields = root.clone();
    fields.remove("id");
    fields.remove("savedAt");

    serde_json::from_value(Value::Object(fields))
        .map_err(|_| SchemaViolation::new("$", "PlantRecord"))
}

fn require_object<'a>(
    value: Option<&'a Value>,
    path: &str,
) -> Result<&'a serde_json::Map<String, Value>, SchemaViolation> {
    value
        .and_then(Value::as_object)
        .ok_or_else(|| SchemaViolation::new(path, "object"))
}

fn require_string(value: Option<&Value>, path: &str) -> Result<(), SchemaViolation> {
    match value {
        Some(Value::String(_)) => Ok(()),
        _ => Err(SchemaViolation::new(path, "string")),
    }
}

fn require_name(value: Option<&Value>, path: &str) -> Result<(), SchemaViolation> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(()),
        _ => Err(SchemaViolation::new(path, "non-empty string")),
    }
}

fn require_bool(value: Option<&Value>, path: &str) -> Result<(), SchemaViolation> {
    match value {
        Some(Value::Bool(_)) => Ok(()),
        _ => Err(SchemaViolation::new(path, "boolean")),
    }
}

fn require_string_array(value: Option<&Value>, path: &str) -> Result<(), SchemaViolation> {
    match value {
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => Ok(()),
        _ => Err(SchemaViolation::new(path, "array of strings")),
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::plant_json;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_response_converts() {
        let record = validate_plant_record(&plant_json("Rose", "Rosa gallica")).unwrap();
        assert_eq!(record.common_name, "Rose");
        assert_eq!(record.watering_interval_days, 3);
        assert!(!record.health.is_healthy);
        assert_eq!(record.health.treatment.len(), 2);
        assert!(record.id.is_none());
    }

    #[test]
    fn test_missing_nested_field_rejected() {
        let mut value = plant_json("Rose", "Rosa gallica");
        value["care"].as_object_mut().unwrap().remove("soil");

        let err = validate_plant_record(&value).unwrap_err();
        assert_eq!(err.path, "care.soil");
    }

    #[test]
    fn test_string_boolean_not_coerced() {
        let mut value = plant_json("Rose", "Rosa gallica");
        value["health"]["isHealthy"] = json!("false");

        let err = validate_plant_record(&value).unwrap_err();
        assert_eq!(err.path, "health.isHealthy");
        assert_eq!(err.expected, "boolean");
    }

    #[test]
    fn test_array_field_must_be_array() {
        let mut value = plant_json("Rose", "Rosa gallica");
        value["health"]["symptoms"] = json!("Dark leaf spots");

        let err = validate_plant_record(&value).unwrap_err();
        assert_eq!(err.path, "health.symptoms");
    }

    #[test]
    fn test_watering_interval_rejects_float_and_string() {
        for bad in [json!(3.5), json!("3"), json!(-1)] {
            let mut value = plant_json("Rose", "Rosa gallica");
            value["wateringIntervalDays"] = bad;
            let err = validate_plant_record(&value).unwrap_err();
            assert_eq!(err.path, "wateringIntervalDays");
        }
    }

    #[test]
    fn test_blank_name_rejected() {
        let value = plant_json("  ", "Rosa gallica");
        let err = validate_plant_record(&value).unwrap_err();
        assert_eq!(err.path, "commonName");
    }

    #[test]
    fn test_ai_supplied_id_is_discarded() {
        let mut value = plant_json("Rose", "Rosa gallica");
        value["id"] = json!("not-a-uuid");
        value["savedAt"] = json!(12);
        let record = validate_plant_record(&value).unwrap();
        assert!(record.id.is_none());
    }

    #[test]
    fn test_candidate_lookup_name() {
        let candidate = Candidate {
            common_name: "Dog rose".to_string(),
            scientific_name: "Rosa canina".to_string(),
            image_url: None,
        };
        assert_eq!(candidate.lookup_name(), "Dog rose (Rosa canina)");
    }
}
