// client.rs — One logical "analyze these screenshots" request with
// automatic API-key rotation on quota errors.
//
// Attempts are bounded by the number of configured keys and a key is never
// retried within the same request, so a full rotation cycle terminates.

use std::sync::Arc;

use super::{InferenceOutcome, InferenceRequest, VisionModel};
use crate::capture::CapturedImage;
use crate::credentials::CredentialRotator;
use crate::settings::ConfigStore;

pub const NOT_CONFIGURED: &str = "No Gemini API key configured. Add one in Settings.";

pub struct InferenceClient {
    model: Arc<dyn VisionModel>,
    rotator: Arc<CredentialRotator>,
    config: Arc<ConfigStore>,
}

impl InferenceClient {
    pub fn new(
        model: Arc<dyn VisionModel>,
        rotator: Arc<CredentialRotator>,
        config: Arc<ConfigStore>,
    ) -> Self {
        Self {
            model,
            rotator,
            config,
        }
    }

    /// Send `images` with the configured prompt. Never fails: errors come
    /// back as `InferenceOutcome::Failed` with text for the user.
    pub async fn analyze(&self, images: Vec<CapturedImage>) -> InferenceOutcome {
        let settings = self.config.snapshot().gemini;
        let request = InferenceRequest {
            model: settings.model,
            prompt: settings.system_prompt,
            images,
        };

        let Some(mut api_key) = self.rotator.current() else {
            log::error!("{}", NOT_CONFIGURED);
            return InferenceOutcome::Failed(NOT_CONFIGURED.to_string());
        };
        let total_keys = self.rotator.len();
        let mut tried: Vec<String> = Vec::with_capacity(total_keys);

        loop {
            tried.push(api_key.clone());
            log::info!(
                "Sending {} screenshot(s) to {} (model {}, attempt {}/{})",
                request.images.len(),
                self.model.name(),
                request.model,
                tried.len(),
                total_keys
            );

            let err = match self.model.generate(&api_key, &request).await {
                Ok(text) => return InferenceOutcome::Answer(text),
                Err(err) => err,
            };

            if !err.is_quota() {
                return fail(&err);
            }
            log::warn!("Quota error detected: {}", truncate(&err.to_string(), 100));

            if tried.len() >= total_keys {
                log::warn!("All {} API key(s) hit their quota", total_keys);
                return fail(&err);
            }
            if !self.config.snapshot().gemini.auto_rotate_on_quota_error {
                log::info!("Auto-rotation disabled, not rotating key");
                return fail(&err);
            }

            match self.rotator.rotate() {
                Some(next) if !tried.contains(&next) => {
                    log::info!("Retrying with rotated API key...");
                    api_key = next;
                }
                _ => {
                    log::warn!("Rotated back to an already tried key (single key or full cycle)");
                    return fail(&err);
                }
            }
        }
    }

    /// One text-only request with `api_key`, no rotation. Used by the
    /// settings panel to check a key before saving it.
    pub async fn test_credential(&self, api_key: &str) -> Result<(), String> {
        let request = InferenceRequest {
            model: self.config.snapshot().gemini.model,
            prompt: "Hello".into(),
            images: Vec::new(),
        };
        self.model
            .generate(api_key, &request)
            .await
            .map(|_| ())
            .map_err(|e| {
                log::error!("Connection test failed: {}", e);
                e.to_string()
            })
    }
}

fn fail(err: &super::AiError) -> InferenceOutcome {
    let message = format!("Error analyzing screenshot: {}", err);
    log::error!("{}", message);
    InferenceOutcome::Failed(message)
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
