//! Judgment-response validation.
//!
//! Providers produce a structured judgment; nothing they return is trusted
//! until it has passed, in order:
//!
//! 1. JSON extraction (bare object or a fenced ```json block)
//! 2. Response-schema validation ([`ResponseSchema`])
//! 3. Status resolution against the evaluation's [`StatusScale`]
//! 4. Citation resolution against the retrieved passages
//!
//! Steps 1-3 are hard failures (the caller retries, then degrades). Step 4
//! never fails: bad citations are stripped and flagged.

mod citations;
mod schema;

pub use citations::{CitationResolver, ResolvedCitations};
pub use schema::{default_schema_value, ResponseSchema, SchemaError, REQUIRED_FIELDS};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::scoring::StatusScale;
use crate::types::{Citation, CriterionStatus, Passage, ResultFlag, ScoringMode};

lazy_static! {
    static ref FENCED_JSON: Regex = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("Invalid regex");
}

/// Status values that mean "does not apply".
const NOT_APPLICABLE: [&str; 4] = ["not_applicable", "not applicable", "n/a", "na"];

/// Errors from judgment validation. All of them are retryable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JudgmentError {
    #[error("Response contains no JSON object")]
    NoJson,

    #[error("Malformed JSON: {0}")]
    MalformedJson(String),

    #[error("Schema violations: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("Unknown status '{0}'")]
    UnknownStatus(String),

    #[error("Numeric scoring requires a score")]
    MissingScore,

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// A claim the provider makes about one passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationClaim {
    pub passage_id: String,
    pub claim: String,
    #[serde(default)]
    pub quote: Option<String>,
}

/// The fields the pipeline reads from a judgment response. Custom schemas
/// may add more; they are kept in the raw payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgmentPayload {
    pub narrative: String,
    pub status: String,
    #[serde(default)]
    pub score: Option<f64>,
    pub confidence: f64,
    #[serde(default)]
    pub citations: Vec<CitationClaim>,
}

/// A judgment that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedJudgment {
    pub narrative: String,
    pub status: CriterionStatus,
    pub score: Option<f64>,
    pub confidence: f64,
    pub citations: Vec<Citation>,
    pub flags: Vec<ResultFlag>,
    pub payload: JsonValue,
}

/// Validates raw provider output for one evaluation.
#[derive(Debug)]
pub struct JudgmentValidator {
    scale: StatusScale,
    schema: ResponseSchema,
}

impl JudgmentValidator {
    pub fn new(scale: StatusScale, custom_schema: Option<&JsonValue>) -> Result<Self, SchemaError> {
        Ok(Self {
            scale,
            schema: ResponseSchema::from_config(custom_schema)?,
        })
    }

    pub fn scale(&self) -> &StatusScale {
        &self.scale
    }

    pub fn schema(&self) -> &ResponseSchema {
        &self.schema
    }

    /// Validate a provider response against the passages it was given.
    pub fn validate(&self, content: &str, passages: &[Passage]) -> Result<ValidatedJudgment, JudgmentError> {
        let payload_value = extract_json(content)?;
        self.schema
            .validate(&payload_value)
            .map_err(JudgmentError::SchemaViolation)?;

        let payload: JudgmentPayload = serde_json::from_value(payload_value.clone())
            .map_err(|e| JudgmentError::MalformedJson(e.to_string()))?;

        let (status, score) = self.resolve_status(&payload)?;
        let resolved = CitationResolver::new(passages).resolve(&payload.citations);

        Ok(ValidatedJudgment {
            narrative: payload.narrative.trim().to_string(),
            status,
            score,
            confidence: payload.confidence.clamp(0.0, 1.0),
            citations: resolved.citations,
            flags: resolved.flags,
            payload: payload_value,
        })
    }

    /// Numeric mode maps the score onto the scale; boolean and graded modes
    /// take the selected option and score it at its threshold.
    fn resolve_status(&self, payload: &JudgmentPayload) -> Result<(CriterionStatus, Option<f64>), JudgmentError> {
        let selection = payload.status.trim();
        if NOT_APPLICABLE.iter().any(|na| na.eq_ignore_ascii_case(selection)) {
            return Ok((CriterionStatus::NotApplicable, None));
        }

        match self.scale.mode() {
            ScoringMode::Numeric => {
                let score = payload
                    .score
                    .filter(|s| s.is_finite())
                    .ok_or(JudgmentError::MissingScore)?
                    .clamp(0.0, 100.0);
                let option = self.scale.status_for_score(score).clone();
                Ok((CriterionStatus::Rated { option }, Some(score)))
            }
            ScoringMode::Boolean | ScoringMode::Graded => {
                let option = self
                    .scale
                    .find(selection)
                    .ok_or_else(|| JudgmentError::UnknownStatus(selection.to_string()))?
                    .clone();
                let score = option.min_score;
                Ok((CriterionStatus::Rated { option }, Some(score)))
            }
        }
    }
}

/// Pull the JSON object out of a provider response.
pub fn extract_json(content: &str) -> Result<JsonValue, JudgmentError> {
    let trimmed = content.trim();
    let candidate = if trimmed.starts_with('{') {
        trimmed
    } else if let Some(caps) = FENCED_JSON.captures(trimmed) {
        caps.get(1).map(|m| m.as_str()).ok_or(JudgmentError::NoJson)?
    } else {
        match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if start < end => &trimmed[start..=end],
            _ => return Err(JudgmentError::NoJson),
        }
    };

    let value: JsonValue =
        serde_json::from_str(candidate).map_err(|e| JudgmentError::MalformedJson(e.to_string()))?;
    if !value.is_object() {
        return Err(JudgmentError::NoJson);
    }
    Ok(value)
}
