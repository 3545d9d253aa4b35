//! Attachment text extraction seam.
//!
//! OCR proper is an external collaborator; the pipeline only needs "bytes
//! plus mime type in, text out". [`PlainTextExtractor`] handles textual
//! payloads directly and yields empty text for binary formats, so a real
//! OCR engine can be plugged in behind the same trait.

use async_trait::async_trait;
use tracing::warn;

/// Narrow interface to the text-extraction engine.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract text from an attachment. Extraction failures degrade to an
    /// empty string; attachments are supplementary context, never fatal.
    async fn extract_text(&self, file_bytes: &[u8], mime_type: &str) -> String;
}

/// Extractor for textual payloads; binary formats yield empty text.
#[derive(Debug, Default, Clone)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract_text(&self, file_bytes: &[u8], mime_type: &str) -> String {
        let textual = mime_type.starts_with("text/")
            || mime_type.contains("json")
            || mime_type.contains("csv")
            || mime_type.contains("xml");
        if textual {
            String::from_utf8_lossy(file_bytes).into_owned()
        } else {
            warn!(
                mime_type,
                "no text extractor for attachment type, skipping content"
            );
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_text_passes_through() {
        let extractor = PlainTextExtractor;
        let text = extractor
            .extract_text(b"invoice 4711 attached", "text/plain")
            .await;
        assert_eq!(text, "invoice 4711 attached");
    }

    #[tokio::test]
    async fn binary_formats_yield_empty_text() {
        let extractor = PlainTextExtractor;
        let text = extractor.extract_text(&[0xFF, 0xD8, 0xFF], "image/jpeg").await;
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn invalid_utf8_is_lossy_not_fatal() {
        let extractor = PlainTextExtractor;
        let text = extractor.extract_text(&[0x68, 0x69, 0xFF], "text/plain").await;
        assert!(text.starts_with("hi"));
    }
}
