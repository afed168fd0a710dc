//! Text sources that turn an uploaded file into raw text for the pipeline.
//!
//! Defines the [`TextSource`] trait. [`DocumentReader`] dispatches by file
//! extension: plain text is read directly, PDFs use their text layer and fall
//! back to OCR on embedded page images, images go straight to Tesseract.

pub mod tesseract;

use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::pdf::{self, PdfError};
use tesseract::TesseractOcr;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pdf(#[from] PdfError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Tesseract failed ({status}): {stderr}")]
    Tesseract { status: String, stderr: String },

    #[error("Unsupported file type: {0:?}")]
    Unsupported(String),
}

/// Anything that can produce raw text for a file on disk.
pub trait TextSource: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, path: &Path) -> Result<String, OcrError>;
}

/// Input categories recognised by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    PlainText,
    Pdf,
    Image,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "text" | "md" => Some(Self::PlainText),
            "pdf" => Some(Self::Pdf),
            "png" | "jpg" | "jpeg" | "tif" | "tiff" | "bmp" | "gif" | "webp" => Some(Self::Image),
            _ => None,
        }
    }
}

/// Extension-dispatching text source used by the HTTP boundary.
pub struct DocumentReader {
    ocr: TesseractOcr,
}

impl DocumentReader {
    pub fn new(ocr: TesseractOcr) -> Self {
        Self { ocr }
    }

    fn read_pdf(&self, path: &Path) -> Result<String, OcrError> {
        let doc = pdf::load(path)?;
        let text = pdf::extract_text(&doc);
        if !text.trim().is_empty() {
            return Ok(text.trim().to_string());
        }

        info!("No text layer in {:?}, running OCR on page images", path);
        let mut pages = Vec::new();
        for (index, page_id) in pdf::page_ids(&doc).into_iter().enumerate() {
            let Some(image) = pdf::page_image(&doc, page_id) else {
                debug!("Page {} has no embedded image, skipping", index + 1);
                continue;
            };
            pages.push(self.ocr.recognize_image(&image)?);
        }

        Ok(pages.join("\n").trim().to_string())
    }
}

impl TextSource for DocumentReader {
    fn name(&self) -> &str {
        "document"
    }

    fn extract(&self, path: &Path) -> Result<String, OcrError> {
        let text = match SourceKind::from_path(path) {
            Some(SourceKind::PlainText) => {
                String::from_utf8_lossy(&fs::read(path)?).trim().to_string()
            }
            Some(SourceKind::Pdf) => self.read_pdf(path)?,
            Some(SourceKind::Image) => self.ocr.extract(path)?,
            None => {
                return Err(OcrError::Unsupported(
                    path.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                ))
            }
        };

        debug!("Read {} chars from {:?}", text.len(), path);
        Ok(text)
    }
}
