use crate::capture::CapturedImage;

/// Phrases that mark a failure as quota / rate-limit exhaustion.
/// Matched case-insensitively anywhere in the error text.
pub const QUOTA_INDICATORS: &[&str] = &[
    "quota",
    "rate limit",
    "resource exhausted",
    "429",
    "too many requests",
    "exceeded",
];

/// Error type for AI operations
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("Connection failed: {0}")]
    ConnectionError(String),
    #[error("Authentication failed: {0}")]
    AuthError(String),
    #[error("Rate limited (HTTP 429): {0}")]
    RateLimited(String),
    #[error("HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Model error: {0}")]
    ModelError(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl AiError {
    pub fn is_quota(&self) -> bool {
        is_quota_error(&self.to_string())
    }
}

pub fn is_quota_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    QUOTA_INDICATORS.iter().any(|needle| lower.contains(needle))
}

/// Everything the remote model needs for one call.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub model: String,
    pub prompt: String,
    pub images: Vec<CapturedImage>,
}

/// Result of one logical analyze request. Failures carry user-facing text
/// so the delivery path can still hand something back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceOutcome {
    Answer(String),
    Failed(String),
}

impl InferenceOutcome {
    pub fn text(&self) -> &str {
        match self {
            Self::Answer(text) | Self::Failed(text) => text,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Answer(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_phrases_are_case_insensitive() {
        assert!(is_quota_error("You exceeded your current QUOTA"));
        assert!(is_quota_error("Rate Limit reached"));
        assert!(is_quota_error("Resource Exhausted"));
        assert!(is_quota_error("HTTP 429"));
        assert!(is_quota_error("Too Many Requests"));
    }

    #[test]
    fn other_errors_are_not_quota() {
        assert!(!is_quota_error("invalid argument"));
        assert!(!is_quota_error("API key not valid"));
        assert!(!is_quota_error(""));
    }

    #[test]
    fn rate_limited_variant_classifies_as_quota() {
        assert!(AiError::RateLimited("slow down".into()).is_quota());
        assert!(!AiError::AuthError("bad key".into()).is_quota());
        assert!(AiError::Api {
            status: 400,
            body: "Quota exceeded for metric".into()
        }
        .is_quota());
    }
}
