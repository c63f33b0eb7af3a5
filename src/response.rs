use crate::config::AttributeModel;
use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized provider score, always within [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
}

impl ScoreResult {
    /// Parse a provider body, falling back to a zero score on any defect.
    pub fn from_response(body: &str, model: AttributeModel) -> Self {
        match extract_score(body, model) {
            Ok(result) => result,
            Err(e) => {
                log::debug!("Unusable analysis response, defaulting score to 0.0: {e}");
                ScoreResult::default()
            }
        }
    }
}

/// Reads `attributeScores.<attribute>.summaryScore.value`. When the requested
/// attribute is absent the first reported attribute is used instead.
pub fn extract_score(body: &str, model: AttributeModel) -> Result<ScoreResult, ParseError> {
    let response: Value = serde_json::from_str(body).map_err(|_| ParseError::MalformedBody)?;

    let attributes = response
        .get("attributeScores")
        .and_then(Value::as_object)
        .ok_or(ParseError::MissingAttributeScores)?;

    let attribute = model.attribute_name();
    let entry = attributes
        .get(attribute)
        .or_else(|| attributes.values().next())
        .ok_or(ParseError::MissingAttributeScores)?;

    let score = entry
        .pointer("/summaryScore/value")
        .and_then(Value::as_f64)
        .ok_or_else(|| ParseError::MissingSummaryScore(attribute.to_string()))?;

    if !(0.0..=1.0).contains(&score) {
        return Err(ParseError::OutOfRange(score));
    }

    Ok(ScoreResult { score })
}
