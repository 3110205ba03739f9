//! Screen capture seam.

use async_trait::async_trait;

/// One encoded desktop image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    /// File extension without the dot, e.g. `png`.
    pub extension: String,
}

impl CapturedImage {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            extension: "png".to_string(),
        }
    }
}

/// Why capture is skipped on this host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SamplerUnavailable {
    #[error("continuous-integration environment detected")]
    ContinuousIntegration,

    #[error("no interactive desktop session")]
    NoDesktop,

    #[error("capture tool '{0}' not found")]
    MissingTool(String),
}

impl SamplerUnavailable {
    /// Short machine-readable reason, used in metrics.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SamplerUnavailable::ContinuousIntegration => "ci-environment",
            SamplerUnavailable::NoDesktop => "no-desktop",
            SamplerUnavailable::MissingTool(_) => "capture-tool-missing",
        }
    }
}

/// A single capture attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture command failed: {0}")]
    Command(String),

    #[error("capture produced no image")]
    Empty,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Grabs one image of the desktop.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Checks whether this host can capture at all.
    fn check_available(&self) -> Result<(), SamplerUnavailable>;

    /// Captures the desktop once.
    async fn capture(&self) -> Result<CapturedImage, CaptureError>;
}
