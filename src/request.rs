use crate::config::{AttributeModel, ProviderConfig};
use serde::Serialize;
use std::collections::BTreeMap;

const ANONYMOUS: &str = "anonymous";

/// Body of a `comments:analyze` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub comment: Comment,
    pub requested_attributes: BTreeMap<&'static str, RequestedAttribute>,
    pub do_not_store: bool,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedAttribute {
    pub score_type: &'static str,
}

/// Builds provider payloads for one deployment.
#[derive(Debug, Clone)]
pub struct AnalyzeComment {
    session_base: String,
    max_text_bytes: usize,
    model: AttributeModel,
}

impl AnalyzeComment {
    pub fn new(session_base: impl Into<String>, max_text_bytes: usize, model: AttributeModel) -> Self {
        Self {
            session_base: session_base.into(),
            max_text_bytes,
            model,
        }
    }

    pub fn from_config(config: &ProviderConfig, model: AttributeModel) -> Self {
        Self::new(config.session_base.clone(), config.max_text_bytes, model)
    }

    pub fn build(&self, raw: &str, user_id: Option<i64>) -> ScoreRequest {
        let requester = user_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| ANONYMOUS.to_string());

        let mut requested_attributes = BTreeMap::new();
        requested_attributes.insert(
            self.model.attribute_name(),
            RequestedAttribute {
                score_type: "PROBABILITY",
            },
        );

        ScoreRequest {
            comment: Comment {
                text: truncate_to_bytes(raw, self.max_text_bytes).to_string(),
            },
            requested_attributes,
            do_not_store: true,
            session_id: format!("{}_{}", self.session_base, requester),
        }
    }
}

/// Longest prefix of `text` that fits in `max_bytes` without splitting a
/// UTF-8 sequence.
pub fn truncate_to_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
