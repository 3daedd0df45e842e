/// The `capture` module owns everything screenshot related: grabbing the
/// screen, encoding the frame, and holding frames until the next analyze.
pub mod queue;
pub mod screen;

pub use queue::{CaptureQueue, EnqueueOutcome, OverflowPolicy};
pub use screen::ScreenCapture;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// One encoded screenshot, ready to be attached to an inference request.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    /// ISO-8601 UTC timestamp of the grab.
    pub captured_at: String,
}

impl CapturedImage {
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no monitors found")]
    NoMonitor,
    #[error("screen grab failed: {0}")]
    Grab(String),
    #[error("image encoding failed: {0}")]
    Encode(String),
    #[error("could not save screenshot: {0}")]
    Save(String),
    #[error("capture worker failed: {0}")]
    Worker(String),
}

/// Source of full-screen captures. The real implementation is
/// [`ScreenCapture`]; tests substitute their own.
pub trait ScreenSource: Send + Sync {
    fn capture_full_screen(&self) -> Result<CapturedImage, CaptureError>;
}
