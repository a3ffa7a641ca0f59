//! OCR engine abstraction
//!
//! An engine instance is a short-lived, comparatively expensive resource: it is
//! created, configured, used for exactly one recognition and then terminated.
//! [`EngineLease`] ties the terminate step to scope exit.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::{PageSegMode, Region};

/// Errors from OCR engines
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine not available: {0}")]
    Unavailable(String),

    #[error("Invalid engine parameters: {0}")]
    InvalidParameters(String),

    #[error("OCR failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parameters applied to an engine instance before recognition
#[derive(Debug, Clone, PartialEq)]
pub struct EngineParameters {
    /// Admissible characters; `None` admits everything
    pub whitelist: Option<String>,
    /// Page segmentation mode
    pub segmentation: PageSegMode,
    /// Keep runs of spaces between words
    pub preserve_interword_spaces: bool,
}

/// Unfiltered output of one engine run
#[derive(Debug, Clone, Default)]
pub struct RawRecognition {
    /// Whole-image transcription
    pub text: String,
    /// Recognized blocks with geometry and confidence
    pub regions: Vec<Region>,
}

/// One OCR engine instance
#[async_trait]
pub trait OcrEngine: Send {
    /// Apply parameters; must be called before `recognize`
    async fn configure(&mut self, params: &EngineParameters) -> Result<(), EngineError>;

    /// Run recognition on an encoded image
    async fn recognize(&mut self, image: &[u8]) -> Result<RawRecognition, EngineError>;

    /// Release the instance's resources; later calls are no-ops
    fn terminate(&mut self);
}

/// Creates fresh engine instances
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &str;

    /// Create and initialize an instance for the given language
    async fn create(&self, language: &str) -> Result<Box<dyn OcrEngine>, EngineError>;
}

/// Owns one engine instance and terminates it when dropped
pub struct EngineLease {
    engine: Option<Box<dyn OcrEngine>>,
    name: String,
}

impl EngineLease {
    /// Create a fresh instance from the factory
    pub async fn acquire(factory: &dyn EngineFactory, language: &str) -> Result<Self, EngineError> {
        let engine = factory.create(language).await?;
        debug!("Acquired {} engine instance ({})", factory.name(), language);
        Ok(Self {
            engine: Some(engine),
            name: factory.name().to_string(),
        })
    }

    fn engine(&mut self) -> Result<&mut Box<dyn OcrEngine>, EngineError> {
        self.engine
            .as_mut()
            .ok_or_else(|| EngineError::Failed("engine instance already released".to_string()))
    }

    pub async fn configure(&mut self, params: &EngineParameters) -> Result<(), EngineError> {
        self.engine()?.configure(params).await
    }

    pub async fn recognize(&mut self, image: &[u8]) -> Result<RawRecognition, EngineError> {
        self.engine()?.recognize(image).await
    }

    /// Terminate the instance now instead of at scope exit
    pub fn release(mut self) {
        self.terminate();
    }

    fn terminate(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.terminate();
            debug!("Released {} engine instance", self.name);
        }
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        self.terminate();
    }
}
