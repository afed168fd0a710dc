//! PDF access via lopdf: text layer extraction and fallback page rasters.
//!
//! Real page rendering lives in [`crate::raster`]. When PDFium is not
//! available a page raster is the largest image embedded in the page (what
//! scanners produce); pages without one are a blank canvas of the page's size.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, Rgb, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Resolution pages are rasterized at.
pub const RENDER_DPI: f32 = 200.0;

/// PDF points per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// Largest width or height of any page raster.
pub const MAX_DIMENSION_PX: u32 = 4096;

/// Embedded images with more samples than this are not decoded.
const MAX_IMAGE_PIXELS: u64 = 40_000_000;

/// US Letter, used when a page has no usable MediaBox.
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Guard against cyclic `Parent` chains.
const MAX_INHERIT_DEPTH: usize = 32;

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),

    #[error("PDF has no pages")]
    NoPages,

    #[error("PDF render error: {0}")]
    Render(String),
}

pub fn load(path: &Path) -> Result<Document, PdfError> {
    Ok(Document::load(path)?)
}

/// Concatenated text layer of every page, one page per line block.
pub fn extract_text(doc: &Document) -> String {
    let mut text = String::new();

    for (page_num, _) in doc.get_pages() {
        match doc.extract_text(&[page_num]) {
            Ok(content) => {
                text.push_str(&content);
                text.push('\n');
            }
            Err(e) => debug!("No text layer on page {}: {}", page_num, e),
        }
    }

    text
}

/// Object ids of all pages, in page order.
pub fn page_ids(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().into_values().collect()
}

/// First page as an RGB raster, or a blank canvas when it embeds no image.
pub fn render_first_page(doc: &Document) -> Result<RgbImage, PdfError> {
    let page_id = page_ids(doc).into_iter().next().ok_or(PdfError::NoPages)?;

    if let Some(image) = page_image(doc, page_id) {
        debug!(
            "Using embedded page image ({}x{})",
            image.width(),
            image.height()
        );
        if image.width().max(image.height()) > MAX_DIMENSION_PX {
            warn!("Embedded page image capped to {}px", MAX_DIMENSION_PX);
            return Ok(image
                .resize(MAX_DIMENSION_PX, MAX_DIMENSION_PX, FilterType::Triangle)
                .to_rgb8());
        }
        return Ok(image.to_rgb8());
    }

    let [x0, y0, x1, y1] = media_box(doc, page_id);
    let (width, height) = fit_dimensions((x1 - x0).abs(), (y1 - y0).abs());
    debug!("Page has no embedded image, using {}x{} canvas", width, height);

    Ok(RgbImage::from_pixel(width, height, Rgb([255, 255, 255])))
}

/// Pixel size of a page at [`RENDER_DPI`], capped to [`MAX_DIMENSION_PX`]
/// on the longer side with the aspect ratio kept.
pub fn fit_dimensions(width_points: f32, height_points: f32) -> (u32, u32) {
    let scale = RENDER_DPI / POINTS_PER_INCH;
    let finite = |v: f32| if v.is_finite() { v } else { 0.0 };
    let raw_w = (finite(width_points) * scale).round().max(1.0);
    let raw_h = (finite(height_points) * scale).round().max(1.0);

    let max_dim = raw_w.max(raw_h);
    if max_dim <= MAX_DIMENSION_PX as f32 {
        return (raw_w as u32, raw_h as u32);
    }

    warn!(
        "Page of {}x{}px capped to {}px",
        raw_w, raw_h, MAX_DIMENSION_PX
    );
    let ratio = MAX_DIMENSION_PX as f32 / max_dim;
    let shrink = |v: f32| {
        if v >= max_dim {
            MAX_DIMENSION_PX
        } else {
            ((v * ratio).round() as u32).clamp(1, MAX_DIMENSION_PX)
        }
    };
    (shrink(raw_w), shrink(raw_h))
}

/// Largest decodable image XObject on a page.
pub fn page_image(doc: &Document, page_id: ObjectId) -> Option<DynamicImage> {
    let resources = resolve(doc, inherited(doc, page_id, b"Resources")?)?
        .as_dict()
        .ok()?;
    let xobjects = resolve(doc, resources.get(b"XObject").ok()?)?
        .as_dict()
        .ok()?;

    xobjects
        .iter()
        .filter_map(|(_, obj)| resolve(doc, obj)?.as_stream().ok())
        .filter(|stream| is_image(&stream.dict))
        .filter_map(decode_image)
        .max_by_key(|image| u64::from(image.width()) * u64::from(image.height()))
}

fn is_image(dict: &Dictionary) -> bool {
    dict.get(b"Subtype")
        .and_then(Object::as_name)
        .map(|name| name == b"Image")
        .unwrap_or(false)
}

fn decode_image(stream: &Stream) -> Option<DynamicImage> {
    let filter = stream.dict.get(b"Filter").ok().and_then(|f| match f {
        Object::Name(name) => Some(name.clone()),
        Object::Array(filters) => filters
            .last()
            .and_then(|o| o.as_name().ok())
            .map(|n| n.to_vec()),
        _ => None,
    });

    match filter.as_deref() {
        Some(b"DCTDecode") => {
            image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg).ok()
        }
        Some(b"FlateDecode") => raw_image(&stream.dict, stream.decompressed_content().ok()?),
        None => raw_image(&stream.dict, stream.content.clone()),
        Some(other) => {
            debug!(
                "Skipping image with unsupported filter {}",
                String::from_utf8_lossy(other)
            );
            None
        }
    }
}

/// Uncompressed 8-bit RGB or gray samples.
fn raw_image(dict: &Dictionary, mut samples: Vec<u8>) -> Option<DynamicImage> {
    let width = u32::try_from(dict.get(b"Width").ok()?.as_i64().ok()?).ok()?;
    let height = u32::try_from(dict.get(b"Height").ok()?.as_i64().ok()?).ok()?;
    let bits = dict
        .get(b"BitsPerComponent")
        .and_then(Object::as_i64)
        .unwrap_or(8);
    if bits != 8 {
        return None;
    }

    let channels = match dict.get(b"ColorSpace").and_then(Object::as_name).ok()? {
        b"DeviceRGB" => 3,
        b"DeviceGray" => 1,
        _ => return None,
    };

    let pixels = u64::from(width).checked_mul(u64::from(height))?;
    if pixels > MAX_IMAGE_PIXELS {
        debug!("Skipping {}x{} embedded image, too large", width, height);
        return None;
    }
    let expected = usize::try_from(pixels).ok()?.checked_mul(channels)?;
    if samples.len() < expected {
        return None;
    }
    samples.truncate(expected);

    if channels == 3 {
        RgbImage::from_raw(width, height, samples).map(DynamicImage::ImageRgb8)
    } else {
        GrayImage::from_raw(width, height, samples).map(DynamicImage::ImageLuma8)
    }
}

fn media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let parsed = inherited(doc, page_id, b"MediaBox")
        .and_then(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_array().ok())
        .filter(|values| values.len() == 4)
        .and_then(|values| {
            let numbers: Vec<f32> = values.iter().filter_map(number).collect();
            <[f32; 4]>::try_from(numbers).ok()
        });

    parsed.unwrap_or(DEFAULT_MEDIA_BOX)
}

/// Look up a page attribute, walking up `Parent` for inherited values.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;

    for _ in 0..MAX_INHERIT_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(value);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }

    None
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}
