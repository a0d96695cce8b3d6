//! Drawing normalization
//!
//! Turns an arbitrary canvas snapshot into the fixed-size, two-color square
//! image the glyph classifier expects.

use base64::Engine as _;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use tracing::debug;

use super::error::RecognitionError;

/// Default side length of the normalized canvas
pub const DEFAULT_CANVAS_SIZE: u32 = 200;

/// Default luminance threshold; pixels brighter than this become background
pub const DEFAULT_THRESHOLD: u8 = 200;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// A drawing as handed over by the canvas collaborator
#[derive(Debug, Clone)]
pub enum RecognitionInput {
    /// Encoded image bytes (PNG, JPEG, ...)
    Encoded(Vec<u8>),
    /// `data:image/png;base64,...` style URL
    DataUrl(String),
    /// Already decoded RGBA pixels
    Rgba(RgbaImage),
}

impl RecognitionInput {
    /// Decode the input into a raster image
    pub fn decode(&self) -> Result<DynamicImage, RecognitionError> {
        let image = match self {
            RecognitionInput::Encoded(bytes) => decode_bytes(bytes)?,
            RecognitionInput::DataUrl(url) => decode_bytes(&data_url_payload(url)?)?,
            RecognitionInput::Rgba(img) => DynamicImage::ImageRgba8(img.clone()),
        };

        if image.width() == 0 || image.height() == 0 {
            return Err(RecognitionError::Decode(format!(
                "image has no pixels ({}x{})",
                image.width(),
                image.height()
            )));
        }

        Ok(image)
    }

    /// Encoded PNG bytes for this input, used when capturing feedback
    pub fn to_png(&self) -> Result<Vec<u8>, RecognitionError> {
        match self {
            RecognitionInput::Encoded(bytes) if is_png(bytes) => Ok(bytes.clone()),
            RecognitionInput::DataUrl(url) => {
                let bytes = data_url_payload(url)?;
                if is_png(&bytes) {
                    Ok(bytes)
                } else {
                    encode_png(&self.decode()?)
                }
            }
            _ => encode_png(&self.decode()?),
        }
    }
}

fn is_png(bytes: &[u8]) -> bool {
    bytes.starts_with(b"\x89PNG\r\n\x1a\n")
}

fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage, RecognitionError> {
    if bytes.is_empty() {
        return Err(RecognitionError::Decode("input is empty".to_string()));
    }
    Ok(image::load_from_memory(bytes)?)
}

/// Extract the base64 payload of a data URL
fn data_url_payload(url: &str) -> Result<Vec<u8>, RecognitionError> {
    let url = url.trim();
    let Some(rest) = url.strip_prefix("data:") else {
        return Err(RecognitionError::Decode("not a data URL".to_string()));
    };
    let Some((header, payload)) = rest.split_once(',') else {
        return Err(RecognitionError::Decode("data URL has no payload".to_string()));
    };
    if !header.ends_with(";base64") {
        return Err(RecognitionError::Decode(format!(
            "unsupported data URL encoding: {}",
            header
        )));
    }
    Ok(base64::engine::general_purpose::STANDARD.decode(payload)?)
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, RecognitionError> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| RecognitionError::Decode(format!("failed to encode PNG: {}", e)))?;
    Ok(out.into_inner())
}

/// Normalization settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeConfig {
    /// Output side length
    pub canvas_size: u32,
    /// Luminance threshold (mean of R, G, B)
    pub threshold: u8,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            canvas_size: DEFAULT_CANVAS_SIZE,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Square, binarized glyph image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    image: RgbaImage,
}

impl NormalizedImage {
    /// Side length in pixels
    pub fn side(&self) -> u32 {
        self.image.width()
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.image
    }

    /// Whether the pixel at (x, y) is ink
    pub fn is_ink(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y)[0] == 0
    }

    /// Fraction of pixels that are ink
    pub fn ink_ratio(&self) -> f32 {
        let total = (self.image.width() * self.image.height()) as f32;
        if total == 0.0 {
            return 0.0;
        }
        let ink = self.image.pixels().filter(|p| p[0] == 0).count();
        ink as f32 / total
    }

    /// Encode as PNG
    pub fn to_png(&self) -> Result<Vec<u8>, RecognitionError> {
        encode_png(&DynamicImage::ImageRgba8(self.image.clone()))
    }
}

/// Decode and normalize a drawing
pub fn normalize(
    input: &RecognitionInput,
    config: &NormalizeConfig,
) -> Result<NormalizedImage, RecognitionError> {
    let image = input.decode()?;
    Ok(normalize_image(&image, config))
}

/// Normalize an already decoded image
pub fn normalize_image(image: &DynamicImage, config: &NormalizeConfig) -> NormalizedImage {
    let size = config.canvas_size;
    let (width, height) = (image.width(), image.height());
    let side = width.min(height);
    let x = (width - side) / 2;
    let y = (height - side) / 2;

    // Composite the crop over white before scaling so transparent canvas
    // regions read as background
    let crop = image.crop_imm(x, y, side, side).to_rgba8();
    let flattened = RgbaImage::from_fn(side, side, |px, py| over_white(*crop.get_pixel(px, py)));

    let mut canvas = RgbaImage::from_pixel(size, size, WHITE);
    let scaled = image::imageops::resize(&flattened, size, size, FilterType::Triangle);
    image::imageops::overlay(&mut canvas, &scaled, 0, 0);

    let binarized = binarize(&canvas, config.threshold);

    debug!(
        "Normalized {}x{} drawing to {}x{} (crop {} at {},{})",
        width, height, size, size, side, x, y
    );

    NormalizedImage { image: binarized }
}

/// Blend a pixel onto an opaque white background
fn over_white(pixel: Rgba<u8>) -> Rgba<u8> {
    let alpha = pixel[3] as f32 / 255.0;
    let blend = |c: u8| (c as f32 * alpha + 255.0 * (1.0 - alpha)).round().clamp(0.0, 255.0) as u8;
    Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255])
}

/// Threshold every pixel to pure black or pure white, keeping alpha
fn binarize(image: &RgbaImage, threshold: u8) -> RgbaImage {
    imageproc::map::map_colors(image, |p: Rgba<u8>| {
        // mean(R,G,B) > threshold without integer division
        let sum = p[0] as u16 + p[1] as u16 + p[2] as u16;
        let value = if sum > 3 * threshold as u16 { 255 } else { 0 };
        Rgba([value, value, value, p[3]])
    })
}
