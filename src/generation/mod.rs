//! Image generation capability.
//!
//! The worker only sees the `ImageGenerator` trait. Any error is treated as a
//! terminal job failure.

pub mod openai;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::GenerationError;

pub use openai::OpenAiImageGenerator;

/// Output of a successful generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedImage {
    /// Raw image bytes (PNG).
    Bytes(Vec<u8>),
    /// Image hosted by the provider.
    Url(String),
}

/// Produces an image for a prompt.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Generate one image. Must return `GenerationError::Cancelled` promptly
    /// once `cancel` fires.
    async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<GeneratedImage, GenerationError>;
}

/// Stand-in used when no API key is configured: every call fails.
pub struct UnconfiguredGenerator {
    reason: String,
}

impl UnconfiguredGenerator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ImageGenerator for UnconfiguredGenerator {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _cancel: &CancellationToken,
    ) -> Result<GeneratedImage, GenerationError> {
        Err(GenerationError::NotConfigured(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_always_fails() {
        let generator = UnconfiguredGenerator::new("OPENAI_API_KEY not set");
        let err = generator
            .generate("anything", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::NotConfigured(ref r) if r == "OPENAI_API_KEY not set"));
        assert_eq!(generator.name(), "unconfigured");
    }
}
