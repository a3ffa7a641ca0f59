//! Vision/OCR Layer
//!
//! Turns a captured image into text plus block geometry. Every recognition call
//! runs the full engine lifecycle (create, configure, recognize, terminate) on a
//! fresh instance; instances are never shared between pages.

pub mod engine;
pub mod filter;
pub mod tesseract;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use crate::capture::ImageData;

pub use engine::{EngineError, EngineFactory, EngineLease, EngineParameters, OcrEngine, RawRecognition};
pub use filter::filter_regions;
pub use tesseract::{missing_languages, TesseractFactory};

/// Default minimum confidence for keeping a region
pub const DEFAULT_MIN_CONFIDENCE: f32 = 5.0;

/// Page segmentation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSegMode {
    /// Fully automatic layout analysis
    Auto,
    /// A single column of text of variable sizes
    SingleColumn,
    /// A single uniform block of text
    #[default]
    SingleBlock,
    /// As much text as possible in no particular order
    SparseText,
}

impl PageSegMode {
    /// Tesseract `--psm` value
    pub fn tesseract_psm(&self) -> u8 {
        match self {
            PageSegMode::Auto => 3,
            PageSegMode::SingleColumn => 4,
            PageSegMode::SingleBlock => 6,
            PageSegMode::SparseText => 11,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" | "3" => Some(PageSegMode::Auto),
            "single_column" | "column" | "4" => Some(PageSegMode::SingleColumn),
            "single_block" | "block" | "6" => Some(PageSegMode::SingleBlock),
            "sparse_text" | "sparse" | "11" => Some(PageSegMode::SparseText),
            _ => None,
        }
    }
}

/// Axis-aligned bounding box in image pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl BoundingBox {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

/// A recognized block of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Block geometry
    pub bbox: BoundingBox,
    /// Confidence score (0 - 100)
    pub confidence: f32,
    /// Text recognized inside the block
    pub text: String,
}

/// Parameters for one recognition call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Tesseract language(s), e.g. "eng" or "deu+eng"
    pub language: String,
    /// Admissible characters; unset admits everything
    pub whitelist: Option<String>,
    /// Page segmentation mode
    pub segmentation: PageSegMode,
    /// Keep runs of spaces between words
    pub preserve_interword_spaces: bool,
    /// Regions at or below this confidence are dropped
    pub min_confidence: f32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            whitelist: None,
            segmentation: PageSegMode::SingleBlock,
            preserve_interword_spaces: true,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

impl RecognitionConfig {
    /// Engine-facing subset of the configuration
    pub fn engine_parameters(&self) -> EngineParameters {
        EngineParameters {
            whitelist: self.whitelist.clone(),
            segmentation: self.segmentation,
            preserve_interword_spaces: self.preserve_interword_spaces,
        }
    }
}

/// Result of recognizing one image (regions are unfiltered)
#[derive(Debug, Clone)]
pub struct RecognitionResult {
    /// Whole-image transcription
    pub text: String,
    /// Recognized blocks
    pub regions: Vec<Region>,
    /// Processing time in milliseconds
    pub processing_time_ms: u64,
}

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("recognition failed: {0}")]
    Failed(#[from] EngineError),
}

/// Runs recognitions, each on a fresh engine instance
#[derive(Clone)]
pub struct Recognizer {
    factory: Arc<dyn EngineFactory>,
}

impl Recognizer {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self { factory }
    }

    pub fn engine_name(&self) -> &str {
        self.factory.name()
    }

    /// Recognize an encoded image.
    ///
    /// The engine instance is released on every exit path, including errors and
    /// cancellation of the returned future. Failures are not retried here.
    pub async fn recognize(
        &self,
        image: &ImageData,
        config: &RecognitionConfig,
    ) -> Result<RecognitionResult, RecognitionError> {
        if image.is_empty() {
            return Err(EngineError::Failed("empty image".to_string()).into());
        }

        let start = Instant::now();
        let mut lease = EngineLease::acquire(self.factory.as_ref(), &config.language).await?;
        lease.configure(&config.engine_parameters()).await?;
        let raw = lease.recognize(image.bytes()).await?;
        lease.release();

        let processing_time = start.elapsed();
        debug!(
            "Recognition ({}, {:?}) complete in {:?}: {} region(s)",
            self.factory.name(),
            config.segmentation,
            processing_time,
            raw.regions.len()
        );
        info!(
            "Recognized {} characters from {} byte image",
            raw.text.chars().count(),
            image.len()
        );

        Ok(RecognitionResult {
            text: raw.text,
            regions: raw.regions,
            processing_time_ms: processing_time.as_millis() as u64,
        })
    }
}
