use async_trait::async_trait;

pub mod client;
pub mod gemini;
pub mod types;
pub use client::InferenceClient;
pub use gemini::GeminiModel;
pub use types::*;

/// The remote inference boundary: one call with one API key.
///
/// Implementations report failures as `AiError`; the quota classification
/// and key rotation live in [`InferenceClient`], not here.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn generate(&self, api_key: &str, request: &InferenceRequest) -> Result<String, AiError>;

    /// Provider name for logging/display
    fn name(&self) -> &str;
}
