//! Frame data structures for captured camera content

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io::Cursor;
use std::sync::Arc;

use super::CaptureError;

/// Encoded raster image (PNG, JPEG, ...) shared without copying
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    bytes: Arc<[u8]>,
    mime_type: String,
}

impl ImageData {
    /// Wrap encoded image bytes, sniffing the MIME type from the content
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        let mime_type = image::guess_format(&bytes)
            .map(|format| format.to_mime_type().to_string())
            .unwrap_or_else(|_| "application/octet-stream".to_string());
        Self { bytes, mime_type }
    }

    /// Parse a `data:<mime>;base64,<payload>` URI
    pub fn from_data_uri(uri: &str) -> Result<Self, CaptureError> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| CaptureError::Decode("not a data URI".to_string()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| CaptureError::Decode("data URI has no payload".to_string()))?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| CaptureError::Decode("only base64 data URIs are supported".to_string()))?;

        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| CaptureError::Decode(format!("invalid base64 payload: {}", e)))?;

        Ok(Self {
            bytes: bytes.into(),
            mime_type: mime_type.to_string(),
        })
    }

    /// Encode as a base64 data URI
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.bytes))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// File extension of the encoded format, used when handing bytes to external tools
    pub fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
        image::guess_format(bytes)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Read pixel dimensions from the encoded header without decoding the raster
    pub fn dimensions(&self) -> Result<(u32, u32), CaptureError> {
        image::ImageReader::new(Cursor::new(self.bytes()))
            .with_guessed_format()
            .map_err(|e| CaptureError::Decode(e.to_string()))?
            .into_dimensions()
            .map_err(|e| CaptureError::Decode(e.to_string()))
    }
}

/// A still frame captured from the camera
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Encoded image data
    pub image: ImageData,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
}

impl CapturedFrame {
    /// Create a new captured frame
    pub fn new(image: ImageData, width: u32, height: u32) -> Self {
        Self {
            image,
            width,
            height,
        }
    }

    /// Build a frame from encoded bytes, reading dimensions from the image header
    pub fn from_encoded(bytes: Vec<u8>) -> Result<Self, CaptureError> {
        let image = ImageData::from_bytes(bytes);
        let (width, height) = image.dimensions()?;
        Ok(Self::new(image, width, height))
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
