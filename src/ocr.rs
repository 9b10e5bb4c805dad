//! # OCR Module
//!
//! Text extraction from downloaded images using Tesseract, with format
//! sniffing up front so obviously unusable payloads never reach the engine.

use std::io::Write;

use leptess::LepTess;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Tesseract language packs used for extraction
pub const OCR_LANGUAGES: &str = "eng";
/// Minimum bytes needed to sniff an image format
pub const MIN_FORMAT_BYTES: usize = 8;
/// Upper bound on accepted image payloads (10MB)
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Custom error types for OCR operations
#[derive(Debug, Clone)]
pub enum OcrError {
    /// Payload validation errors (size, format)
    Validation(String),
    /// OCR engine initialization errors
    Initialization(String),
    /// Image loading errors
    ImageLoad(String),
    /// Text extraction errors
    Extraction(String),
}

impl std::fmt::Display for OcrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OcrError::Validation(msg) => write!(f, "Validation error: {msg}"),
            OcrError::Initialization(msg) => write!(f, "Initialization error: {msg}"),
            OcrError::ImageLoad(msg) => write!(f, "Image load error: {msg}"),
            OcrError::Extraction(msg) => write!(f, "Extraction error: {msg}"),
        }
    }
}

impl std::error::Error for OcrError {}

/// Check whether the payload looks like an image format Tesseract accepts
/// (PNG, JPEG, BMP, TIFF), based on magic bytes only.
pub fn is_supported_image_format(bytes: &[u8]) -> bool {
    if bytes.len() < MIN_FORMAT_BYTES {
        debug!(
            bytes_available = bytes.len(),
            "Not enough bytes to determine image format"
        );
        return false;
    }

    match image::guess_format(bytes) {
        Ok(format) => {
            let supported = matches!(
                format,
                image::ImageFormat::Png
                    | image::ImageFormat::Jpeg
                    | image::ImageFormat::Bmp
                    | image::ImageFormat::Tiff
            );
            debug!(format = ?format, supported, "Detected image format");
            supported
        }
        Err(e) => {
            debug!(error = %e, "Could not determine image format");
            false
        }
    }
}

/// Collapse raw OCR output into trimmed, non-empty lines
pub fn clean_text(raw: &str) -> String {
    raw.trim()
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<&str>>()
        .join("\n")
}

/// Extract text from image bytes using Tesseract OCR.
///
/// The bytes are validated, written to a temporary file for the engine, and
/// the extracted text is cleaned of blank lines and edge whitespace. An empty
/// result string means the image contained no recognizable text.
pub async fn extract_text(bytes: &[u8]) -> Result<String, OcrError> {
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(OcrError::Validation(format!(
            "Image too large: {} bytes (limit {})",
            bytes.len(),
            MAX_IMAGE_BYTES
        )));
    }

    if !is_supported_image_format(bytes) {
        return Err(OcrError::Validation(
            "Unsupported or unrecognized image format".to_string(),
        ));
    }

    let mut temp_file = NamedTempFile::new()
        .map_err(|e| OcrError::ImageLoad(format!("Failed to create temporary file: {e}")))?;
    temp_file
        .as_file_mut()
        .write_all(bytes)
        .map_err(|e| OcrError::ImageLoad(format!("Failed to write temporary file: {e}")))?;
    let temp_path = temp_file.path().to_string_lossy().to_string();

    info!(temp_path = %temp_path, bytes = bytes.len(), "Starting OCR text extraction");

    let mut tess = LepTess::new(None, OCR_LANGUAGES)
        .map_err(|e| OcrError::Initialization(format!("Failed to initialize Tesseract: {e}")))?;

    tess.set_image(&temp_path)
        .map_err(|e| OcrError::ImageLoad(format!("Failed to load image for OCR: {e}")))?;

    let extracted = tess
        .get_utf8_text()
        .map_err(|e| OcrError::Extraction(format!("Failed to extract text: {e}")))?;

    let cleaned = clean_text(&extracted);
    info!(
        chars_extracted = cleaned.len(),
        "OCR extraction completed"
    );

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_strips_blank_lines_and_whitespace() {
        let raw = "  first line  \n\n   \n  second line\n";
        assert_eq!(clean_text(raw), "first line\nsecond line");
    }

    #[test]
    fn test_clean_text_empty_input() {
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text("   \n \n  "), "");
    }

    #[test]
    fn test_format_detection_rejects_short_buffers() {
        assert!(!is_supported_image_format(&[]));
        assert!(!is_supported_image_format(&[0x89, 0x50]));
    }

    #[test]
    fn test_format_detection_rejects_garbage() {
        let garbage = vec![0xAB; 64];
        assert!(!is_supported_image_format(&garbage));
    }

    #[test]
    fn test_format_detection_accepts_png_magic() {
        // PNG signature followed by padding is enough for format sniffing
        let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&[0; 24]);
        assert!(is_supported_image_format(&bytes));
    }

    #[tokio::test]
    async fn test_extract_text_rejects_oversized_payload() {
        let bytes = vec![0u8; MAX_IMAGE_BYTES + 1];
        let err = extract_text(&bytes).await.unwrap_err();
        assert!(matches!(err, OcrError::Validation(_)));
    }

    #[tokio::test]
    async fn test_extract_text_rejects_non_image_payload() {
        let err = extract_text(b"definitely not an image").await.unwrap_err();
        assert!(matches!(err, OcrError::Validation(_)));
    }

    #[test]
    fn test_error_display() {
        let err = OcrError::Validation("too big".to_string());
        assert_eq!(format!("{err}"), "Validation error: too big");

        let err = OcrError::Extraction("engine failed".to_string());
        assert!(format!("{err}").contains("Extraction error"));
    }
}
