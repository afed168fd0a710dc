//! First-page rasters for the explainability overlay.
//!
//! Pages are rendered with PDFium at [`pdf::RENDER_DPI`]. The PDFium library
//! is loaded per call because the upstream `Pdfium` handle is `!Send`; the
//! OS caches the `dlopen`, so repeat loads are cheap. When the library cannot
//! be loaded the lopdf fallback in [`crate::pdf`] is used instead.

use image::RgbImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::pdf::{self, PdfError};

#[derive(Debug, Clone, Default)]
pub struct PageRasterizer {
    /// Explicit PDFium library file; `None` searches the system paths.
    library: Option<PathBuf>,
}

impl PageRasterizer {
    pub fn new(library: Option<PathBuf>) -> Self {
        Self { library }
    }

    pub fn is_available(&self) -> bool {
        load_pdfium(self.library.as_deref()).is_ok()
    }

    /// Page one of the PDF at `path` as an RGB raster.
    pub fn first_page(&self, path: &Path) -> Result<RgbImage, PdfError> {
        match load_pdfium(self.library.as_deref()) {
            Ok(pdfium) => match render_first_page(&pdfium, path) {
                Ok(page) => return Ok(page),
                Err(e) => warn!("PDFium could not render {:?}, using fallback: {}", path, e),
            },
            Err(e) => debug!("{}, using embedded page images", e),
        }

        let doc = pdf::load(path)?;
        pdf::render_first_page(&doc)
    }
}

fn load_pdfium(library: Option<&Path>) -> Result<Pdfium, PdfError> {
    let bindings = match library {
        Some(path) => {
            let path = path.to_string_lossy().into_owned();
            Pdfium::bind_to_library(&path)
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| PdfError::Render(format!("PDFium library not loadable: {e}")))?;

    Ok(Pdfium::new(bindings))
}

fn render_first_page(pdfium: &Pdfium, path: &Path) -> Result<RgbImage, PdfError> {
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| PdfError::Render(format!("Failed to load PDF: {e}")))?;

    let pages = document.pages();
    let page = pages.get(0).map_err(|_| PdfError::NoPages)?;

    let (width, height) = pdf::fit_dimensions(page.width().value, page.height().value);
    let config = PdfRenderConfig::new()
        .set_target_width(width as i32)
        .set_maximum_height(height as i32);

    let bitmap = page
        .render_with_config(&config)
        .map_err(|e| PdfError::Render(format!("Rendering failed: {e}")))?;

    debug!("Rendered first page of {:?} at {}x{}", path, width, height);
    Ok(bitmap.as_image().to_rgb8())
}
