/// Failure delivering a request to the scoring provider.
#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("Network error talking to the scoring provider: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Failed to encode analysis request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Provider returned something other than a usable score. Always recovered
/// as a zero score by the caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Response body is not well-formed JSON")]
    MalformedBody,
    #[error("Response has no attributeScores object")]
    MissingAttributeScores,
    #[error("No summaryScore.value for attribute {0}")]
    MissingSummaryScore(String),
    #[error("Score {0} is outside [0, 1]")]
    OutOfRange(f64),
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Invalid parameters: missing {0}")]
    InvalidParameters(&'static str),
    #[error(transparent)]
    Score(#[from] ScoreError),
    #[error("Host store error: {0}")]
    Host(#[from] anyhow::Error),
}

/// The check endpoint's own limiter rejected the caller. Raised before any
/// provider call is made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Rate limit exceeded for {key}: {max} per {window_secs}s, retry in {retry_after_secs}s")]
pub struct RateLimitExceeded {
    pub key: String,
    pub max: u32,
    pub window_secs: u64,
    pub retry_after_secs: u64,
}
