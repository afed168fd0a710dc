//! Tesseract CLI OCR provider.

use image::{DynamicImage, ImageFormat};
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{OcrError, TextSource};
use crate::config::TesseractConfig;

pub struct TesseractOcr {
    config: TesseractConfig,
}

impl TesseractOcr {
    pub fn new(config: TesseractConfig) -> Self {
        Self { config }
    }

    /// True when the configured binary runs.
    pub fn is_available(&self) -> bool {
        Command::new(&self.config.command)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// OCR an image file, returning the recognised text.
    pub fn recognize_file(&self, path: &Path) -> Result<String, OcrError> {
        debug!(
            "Running {:?} on {:?} (lang={})",
            self.config.command, path, self.config.language
        );

        let output = Command::new(&self.config.command)
            .arg(path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.config.language)
            .output()?;

        if !output.status.success() {
            return Err(OcrError::Tesseract {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// OCR an in-memory image by staging it as a temporary PNG.
    pub fn recognize_image(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let path = std::env::temp_dir().join(format!("docsense_ocr_{}.png", Uuid::new_v4().simple()));
        image.save_with_format(&path, ImageFormat::Png)?;

        let result = self.recognize_file(&path);

        if let Err(e) = fs::remove_file(&path) {
            warn!("Failed to remove OCR temp file {:?}: {}", path, e);
        }
        result
    }
}

impl TextSource for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn extract(&self, path: &Path) -> Result<String, OcrError> {
        self.recognize_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn missing_binary() -> TesseractOcr {
        TesseractOcr::new(TesseractConfig {
            command: PathBuf::from("/nonexistent/tesseract"),
            language: "eng".to_string(),
        })
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        assert!(!missing_binary().is_available());
    }

    #[test]
    fn test_missing_binary_is_io_error() {
        let result = missing_binary().recognize_file(Path::new("scan.png"));
        assert!(matches!(result, Err(OcrError::Io(_))));
    }
}
