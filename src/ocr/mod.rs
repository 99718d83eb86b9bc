//! OCR (Optical Character Recognition) through a remote service.

mod mistral;

pub use mistral::MistralOcrClient;

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::latex;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Failed to read image {path}: {source}")]
    ReadImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unsupported image format: {0}")]
    UnsupportedImage(String),
    #[error("Image is {bytes} bytes, over the {limit} byte upload limit; capture a smaller region")]
    ImageTooLarge { bytes: u64, limit: u64 },
    #[error("OCR service rejected the API key: {0}")]
    Unauthorized(String),
    #[error("OCR service rate limit reached: {0}")]
    RateLimited(String),
    #[error("OCR service rejected the image: {0}")]
    InvalidInput(String),
    #[error("OCR service error (HTTP {status}): {message}")]
    Server { status: u16, message: String },
    #[error("OCR request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Could not reach the OCR service: {0}")]
    Network(String),
    #[error("Malformed OCR response: {0}")]
    MalformedResponse(String),
    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

/// Text extracted from one image. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrResult {
    pub raw_text: String,
    pub pages: usize,
    pub model: Option<String>,
    pub doc_size_bytes: Option<u64>,
    pub contains_math: bool,
}

impl OcrResult {
    /// Builds a result, trimming surrounding whitespace and deriving `contains_math`.
    pub fn new(raw_text: &str, pages: usize, model: Option<String>, doc_size_bytes: Option<u64>) -> Self {
        let raw_text = raw_text.trim().to_string();
        let contains_math = latex::classify(&raw_text);
        Self {
            raw_text,
            pages,
            model,
            doc_size_bytes,
            contains_math,
        }
    }

    /// Text-only result, used when no service metadata is available.
    pub fn from_text(raw_text: &str) -> Self {
        Self::new(raw_text, 1, None, None)
    }

    pub fn is_empty(&self) -> bool {
        self.raw_text.is_empty()
    }
}

/// Turns an image file into text. Blocks until the service answers.
pub trait Recognize {
    fn recognize(&self, image_path: &Path) -> Result<OcrResult, OcrError>;
}
