//! Pluggable OCR backend for the `image` extraction family (§4.1).
//!
//! Mirrors the embedder's pluggable-provider pattern: a trait, a disabled
//! default that reports `backend-unavailable`, and an optional compiled-in
//! implementation selected via a Cargo feature and config, exactly the way
//! the local embedding backends are feature-gated.

use async_trait::async_trait;
use std::fmt;

#[derive(Debug)]
pub struct OcrError(pub String);

impl fmt::Display for OcrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for OcrError {}

#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Runs OCR over image bytes, producing a single text blob. An image
    /// with no recognizable text returns `Ok(String::new())`; the caller
    /// (the extractor) turns that into the `empty` outcome, not a failure
    /// of OCR itself.
    async fn recognize(&self, bytes: &[u8]) -> Result<String, OcrError>;
}

/// Default provider when `ocr.provider = "disabled"`. Declares
/// `backend-unavailable` for every image rather than silently skipping OCR.
pub struct DisabledOcrProvider;

#[async_trait]
impl OcrProvider for DisabledOcrProvider {
    async fn recognize(&self, _bytes: &[u8]) -> Result<String, OcrError> {
        Err(OcrError("OCR is disabled; no provider configured".to_string()))
    }
}

/// Tesseract-backed OCR via the `leptess` bindings. Compiled in only under
/// the `ocr-tesseract` feature since it links the system libtesseract /
/// libleptonica libraries.
#[cfg(feature = "ocr-tesseract")]
pub struct TesseractOcrProvider {
    lang: String,
}

#[cfg(feature = "ocr-tesseract")]
impl TesseractOcrProvider {
    pub fn new(lang: impl Into<String>) -> Self {
        Self { lang: lang.into() }
    }
}

#[cfg(feature = "ocr-tesseract")]
#[async_trait]
impl OcrProvider for TesseractOcrProvider {
    async fn recognize(&self, bytes: &[u8]) -> Result<String, OcrError> {
        let bytes = bytes.to_vec();
        let lang = self.lang.clone();
        tokio::task::spawn_blocking(move || {
            let mut lt = leptess::LepTess::new(None, &lang)
                .map_err(|e| OcrError(format!("failed to initialize tesseract: {e}")))?;
            lt.set_image_from_mem(&bytes)
                .map_err(|e| OcrError(format!("failed to load image: {e}")))?;
            lt.get_utf8_text().map_err(|e| OcrError(format!("OCR recognition failed: {e}")))
        })
        .await
        .map_err(|e| OcrError(format!("OCR task panicked: {e}")))?
    }
}

/// Builds the configured OCR provider. Unknown/disabled selections, or a
/// `tesseract` selection compiled without the `ocr-tesseract` feature, fall
/// back to [`DisabledOcrProvider`].
pub fn build_provider(provider: &str) -> Box<dyn OcrProvider> {
    match provider {
        #[cfg(feature = "ocr-tesseract")]
        "tesseract" => Box::new(TesseractOcrProvider::new("eng")),
        _ => Box::new(DisabledOcrProvider),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_provider_reports_backend_unavailable() {
        let err = DisabledOcrProvider.recognize(b"\x89PNG").await.unwrap_err();
        assert!(err.0.contains("disabled"));
    }
}
