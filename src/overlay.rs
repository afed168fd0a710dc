//! Explainability overlay.
//!
//! Draws a schematic legend of the extracted fields (one colored box and
//! label per field, stacked from the top) over the first page of the source
//! document and saves it as a PNG artifact. Positions are fixed; they do not
//! locate the field on the page. Artifacts older than the retention window
//! are removed by [`Overlay::prune`].

use ab_glyph::{FontVec, PxScale};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::pdf::PdfError;
use crate::raster::PageRasterizer;
use crate::schema::FieldSet;

const TOP_MARGIN: i32 = 30;
const ROW_PITCH: i32 = 70;
const BOX_LEFT: i32 = 20;
const BOX_RIGHT: i32 = 500;
const BOX_HEIGHT: i32 = 50;
const BORDER_WIDTH: i32 = 3;
const LABEL_X: i32 = 30;
const LABEL_DY: i32 = 15;
const LABEL_SCALE: f32 = 20.0;
const LABEL_MAX_CHARS: usize = 48;

const ARTIFACT_SUFFIX: &str = "_highlighted.png";
const PUBLIC_PREFIX: &str = "/outputs";

pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const GREEN: Rgb<u8> = Rgb([0, 128, 0]);
pub const PURPLE: Rgb<u8> = Rgb([128, 0, 128]);
pub const ORANGE: Rgb<u8> = Rgb([255, 165, 0]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);
pub const GRAY: Rgb<u8> = Rgb([128, 128, 128]);

/// Tried in order when no font is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("Source not found: {0:?}")]
    SourceMissing(PathBuf),

    #[error("Source has no file name: {0:?}")]
    NoFileName(PathBuf),

    #[error(transparent)]
    Pdf(#[from] PdfError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Palette color for a field; unrecognised fields are gray.
pub fn field_color(field: &str) -> Rgb<u8> {
    match field {
        "name" => BLUE,
        "email" => GREEN,
        "phone" => PURPLE,
        "invoice_no" => ORANGE,
        "total_amount" => RED,
        "date" => YELLOW,
        _ => GRAY,
    }
}

/// Renders overlays into `output_dir` and hands back references under
/// `/outputs` (the path the artifact directory is served from).
pub struct Overlay {
    output_dir: PathBuf,
    font: Option<FontVec>,
    rasterizer: PageRasterizer,
}

impl Overlay {
    pub fn new(output_dir: impl Into<PathBuf>, font_path: Option<&Path>) -> Self {
        Self {
            output_dir: output_dir.into(),
            font: load_font(font_path),
            rasterizer: PageRasterizer::default(),
        }
    }

    pub fn with_rasterizer(mut self, rasterizer: PageRasterizer) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    /// Render the overlay for `source`. Failures are logged and yield `None`.
    pub fn render(&self, source: &Path, fields: &FieldSet) -> Option<String> {
        match self.try_render(source, fields) {
            Ok(reference) => {
                info!("Explainability image saved at: {}", reference);
                Some(reference)
            }
            Err(e) => {
                warn!("Explainability generation failed for {:?}: {}", source, e);
                None
            }
        }
    }

    fn try_render(&self, source: &Path, fields: &FieldSet) -> Result<String, OverlayError> {
        if !source.is_file() {
            return Err(OverlayError::SourceMissing(source.to_path_buf()));
        }

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| OverlayError::NoFileName(source.to_path_buf()))?;

        let mut page = self.load_first_page(source)?;
        self.draw_fields(&mut page, fields);

        fs::create_dir_all(&self.output_dir)?;
        let file_name = format!("{}{}", stem, ARTIFACT_SUFFIX);
        page.save_with_format(self.output_dir.join(&file_name), ImageFormat::Png)?;

        Ok(format!("{}/{}", PUBLIC_PREFIX, file_name))
    }

    /// First page of a PDF, or the (first frame of the) image itself.
    fn load_first_page(&self, source: &Path) -> Result<RgbImage, OverlayError> {
        let is_pdf = source
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);

        if is_pdf {
            return Ok(self.rasterizer.first_page(source)?);
        }

        Ok(image::open(source)?.to_rgb8())
    }

    /// Delete artifacts last modified more than `max_age` ago. Returns how
    /// many were removed.
    pub fn prune(&self, max_age: Duration) -> Result<usize, OverlayError> {
        let entries = match fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let is_artifact = entry
                .file_name()
                .to_str()
                .map(|name| name.ends_with(ARTIFACT_SUFFIX))
                .unwrap_or(false);
            if !is_artifact {
                continue;
            }

            // a modification time in the future counts as fresh
            let expired = entry
                .metadata()?
                .modified()?
                .elapsed()
                .map(|age| age > max_age)
                .unwrap_or(false);
            if expired {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Pruned {} expired explainability images", removed);
        }
        Ok(removed)
    }

    fn draw_fields(&self, page: &mut RgbImage, fields: &FieldSet) {
        let mut y = TOP_MARGIN;

        for (field, value) in fields.iter() {
            let color = field_color(field);

            for inset in 0..BORDER_WIDTH {
                let width = (BOX_RIGHT - BOX_LEFT + 1 - 2 * inset) as u32;
                let height = (BOX_HEIGHT + 1 - 2 * inset) as u32;
                let rect = Rect::at(BOX_LEFT + inset, y + inset).of_size(width, height);
                draw_hollow_rect_mut(page, rect, color);
            }

            if let Some(font) = &self.font {
                let label = truncate_label(&format!("{}: {}", field, value));
                draw_text_mut(
                    page,
                    color,
                    LABEL_X,
                    y + LABEL_DY,
                    PxScale::from(LABEL_SCALE),
                    font,
                    &label,
                );
            }

            y += ROW_PITCH;
        }
    }
}

fn truncate_label(label: &str) -> String {
    if label.chars().count() <= LABEL_MAX_CHARS {
        return label.to_string();
    }
    let mut short: String = label.chars().take(LABEL_MAX_CHARS - 3).collect();
    short.push_str("...");
    short
}

fn load_font(configured: Option<&Path>) -> Option<FontVec> {
    if let Some(path) = configured {
        match read_font(path) {
            Some(font) => return Some(font),
            None => warn!("Configured overlay font {:?} is unusable", path),
        }
    }

    let font = SYSTEM_FONTS
        .iter()
        .map(Path::new)
        .filter(|p| p.is_file())
        .find_map(read_font);

    if font.is_none() {
        warn!("No overlay font available, field labels will not be drawn");
    }
    font
}

fn read_font(path: &Path) -> Option<FontVec> {
    let bytes = fs::read(path).ok()?;
    match FontVec::try_from_vec(bytes) {
        Ok(font) => {
            debug!("Loaded overlay font {:?}", path);
            Some(font)
        }
        Err(e) => {
            warn!("Invalid font {:?}: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldValue;

    fn invoice_fields() -> FieldSet {
        let mut fields = FieldSet::new();
        fields.insert("invoice_no", FieldValue::text("INV-102"));
        fields.insert("total_amount", FieldValue::text("4500"));
        fields.insert("date", FieldValue::Missing);
        fields.insert("vendor", FieldValue::text("Acme Ltd"));
        fields
    }

    fn blank_png(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(600, 400, Rgb([255, 255, 255]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_field_palette() {
        assert_eq!(field_color("email"), GREEN);
        assert_eq!(field_color("total_amount"), RED);
        assert_eq!(field_color("skills"), GRAY);
    }

    #[test]
    fn test_render_image_source() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let source = blank_png(input.path(), "scan.png");

        let overlay = Overlay::new(output.path(), None);
        let reference = overlay.render(&source, &invoice_fields());
        assert_eq!(reference.as_deref(), Some("/outputs/scan_highlighted.png"));

        let rendered = image::open(output.path().join("scan_highlighted.png"))
            .unwrap()
            .to_rgb8();
        assert_eq!(rendered.dimensions(), (600, 400));
        // rows stack at a fixed pitch: invoice_no, total_amount, date, vendor
        assert_eq!(rendered.get_pixel(20, 30), &ORANGE);
        assert_eq!(rendered.get_pixel(22, 32), &ORANGE);
        assert_eq!(rendered.get_pixel(23, 33), &Rgb([255, 255, 255]));
        assert_eq!(rendered.get_pixel(20, 100), &RED);
        assert_eq!(rendered.get_pixel(500, 170), &YELLOW);
        assert_eq!(rendered.get_pixel(20, 240), &GRAY);
    }

    #[test]
    fn test_prune_removes_only_expired_artifacts() {
        let output = tempfile::tempdir().unwrap();
        let old = output.path().join("old_highlighted.png");
        let fresh = output.path().join("fresh_highlighted.png");
        let other = output.path().join("notes.txt");
        for path in [&old, &fresh, &other] {
            fs::write(path, b"x").unwrap();
        }
        let two_hours_ago = std::time::SystemTime::now() - Duration::from_secs(7200);
        for path in [&old, &other] {
            fs::File::options()
                .write(true)
                .open(path)
                .unwrap()
                .set_modified(two_hours_ago)
                .unwrap();
        }

        let overlay = Overlay::new(output.path(), None);
        assert_eq!(overlay.prune(Duration::from_secs(3600)).unwrap(), 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_prune_missing_dir() {
        let overlay = Overlay::new("/nonexistent/outputs", None);
        assert_eq!(overlay.prune(Duration::from_secs(60)).unwrap(), 0);
    }

    #[test]
    fn test_missing_source_is_none() {
        let output = tempfile::tempdir().unwrap();
        let overlay = Overlay::new(output.path(), None);
        assert!(overlay
            .render(Path::new("/nonexistent/scan.png"), &invoice_fields())
            .is_none());
    }

    #[test]
    fn test_corrupt_source_is_none() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let source = input.path().join("broken.png");
        fs::write(&source, b"not an image").unwrap();

        let overlay = Overlay::new(output.path(), None);
        assert!(overlay.render(&source, &invoice_fields()).is_none());
        assert!(!output.path().join("broken_highlighted.png").exists());
    }

    fn without_pdfium(output: &Path) -> Overlay {
        Overlay::new(output, None).with_rasterizer(PageRasterizer::new(Some(PathBuf::from(
            "/nonexistent/libpdfium.so",
        ))))
    }

    #[test]
    fn test_pdf_renders_first_page_only() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let source = input.path().join("statement.pdf");
        let mut doc = crate::pdf::tests::build_pdf(&[(216, 216, None), (612, 792, None)]);
        doc.save(&source).unwrap();

        let overlay = without_pdfium(output.path());
        let reference = overlay.render(&source, &invoice_fields());
        assert_eq!(
            reference.as_deref(),
            Some("/outputs/statement_highlighted.png")
        );

        let rendered = image::open(output.path().join("statement_highlighted.png"))
            .unwrap()
            .to_rgb8();
        assert_eq!(rendered.dimensions(), (600, 600));
    }

    #[test]
    fn test_huge_pdf_page_does_not_abort() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let source = input.path().join("poster.pdf");
        let mut doc = crate::pdf::tests::build_pdf(&[(2_000_000_000, 2_000_000_000, None)]);
        doc.save(&source).unwrap();

        let overlay = without_pdfium(output.path());
        assert_eq!(
            overlay.render(&source, &invoice_fields()).as_deref(),
            Some("/outputs/poster_highlighted.png")
        );
        let rendered = image::open(output.path().join("poster_highlighted.png")).unwrap();
        assert_eq!(
            (rendered.width(), rendered.height()),
            (crate::pdf::MAX_DIMENSION_PX, crate::pdf::MAX_DIMENSION_PX)
        );
    }

    #[test]
    fn test_truncate_label() {
        assert_eq!(truncate_label("date: 01/02/2024"), "date: 01/02/2024");
        let long = "summary: ".to_string() + &"x".repeat(100);
        let short = truncate_label(&long);
        assert_eq!(short.chars().count(), LABEL_MAX_CHARS);
        assert!(short.ends_with("..."));
    }
}
