//! Image recoding into the canonical stored format.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{imageops, ColorType, DynamicImage, GrayImage, ImageFormat, ImageReader, RgbImage};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Cursor;
use std::path::Path;

use crate::types::{ConvertError, DatasetResult, ExampleSource, RawExample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalFormat {
    #[default]
    Jpeg,
    Png,
}

impl CanonicalFormat {
    pub fn image_format(&self) -> ImageFormat {
        match self {
            CanonicalFormat::Jpeg => ImageFormat::Jpeg,
            CanonicalFormat::Png => ImageFormat::Png,
        }
    }
}

/// COCO-style box: top-left corner plus size, in half-integer pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Grows the box symmetrically about its center.
    pub fn scale(&self, ratio: f64) -> Self {
        Self {
            x: self.x - 0.5 * self.w * (ratio - 1.0),
            y: self.y - 0.5 * self.h * (ratio - 1.0),
            w: self.w * ratio,
            h: self.h * ratio,
        }
    }

    /// Integer pixel bounds: `⌊c − 0.5⌋` for the near edge, `⌈c + size − 0.5⌉ + 1`
    /// for the exclusive far edge, clamped to the image.
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_crop(&self, width: u32, height: u32) -> CropBox {
        CropBox {
            xmin: (self.x - 0.5).floor() as i64,
            ymin: (self.y - 0.5).floor() as i64,
            xmax: (self.x + self.w - 0.5).ceil() as i64 + 1,
            ymax: (self.y + self.h - 0.5).ceil() as i64 + 1,
        }
        .clamp(width, height)
    }
}

/// Pixel rectangle with exclusive `xmax`/`ymax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropBox {
    pub xmin: i64,
    pub ymin: i64,
    pub xmax: i64,
    pub ymax: i64,
}

impl CropBox {
    pub fn new(xmin: i64, ymin: i64, xmax: i64, ymax: i64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> i64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> i64 {
        self.ymax - self.ymin
    }

    pub fn clamp(&self, width: u32, height: u32) -> Self {
        Self {
            xmin: self.xmin.max(0),
            ymin: self.ymin.max(0),
            xmax: self.xmax.min(i64::from(width)),
            ymax: self.ymax.min(i64::from(height)),
        }
    }
}

/// Per-example crop request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Crop {
    /// Pixel bounds taken as-is (clamped).
    Pixels(CropBox),
    /// A box expanded by `ratio` before conversion to pixel bounds.
    Scaled { bbox: BoundingBox, ratio: f64 },
}

impl Crop {
    pub fn resolve(&self, width: u32, height: u32) -> CropBox {
        match self {
            Crop::Pixels(b) => b.clamp(width, height),
            Crop::Scaled { bbox, ratio } => bbox.scale(*ratio).to_crop(width, height),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Transforms {
    pub crop: Option<Crop>,
    pub invert: bool,
}

impl Transforms {
    pub fn is_identity(&self) -> bool {
        self.crop.is_none() && !self.invert
    }
}

/// Decodes one source image and produces canonical bytes.
///
/// Transform order: RGB conversion, crop, invert. Sources already in the
/// canonical format, already RGB, with no crop and no inversion are returned
/// byte-for-byte.
#[derive(Debug, Clone, Copy)]
pub struct ImageRecodePipeline {
    format: CanonicalFormat,
    jpeg_quality: u8,
}

impl Default for ImageRecodePipeline {
    fn default() -> Self {
        Self::new(CanonicalFormat::default())
    }
}

impl ImageRecodePipeline {
    pub const DEFAULT_JPEG_QUALITY: u8 = 75;

    pub fn new(format: CanonicalFormat) -> Self {
        Self {
            format,
            jpeg_quality: Self::DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn format(&self) -> CanonicalFormat {
        self.format
    }

    pub fn process(&self, example: &RawExample, invert: bool) -> DatasetResult<Vec<u8>> {
        let transforms = Transforms {
            crop: example.crop,
            invert,
        };
        match &example.source {
            ExampleSource::File(path) => self.process_path(path, &transforms),
            ExampleSource::Intensities { name, pixels } => {
                self.process_intensities(pixels, name, &transforms)
            }
        }
    }

    pub fn process_path(&self, path: &Path, transforms: &Transforms) -> DatasetResult<Vec<u8>> {
        let bytes = fs::read(path).map_err(|e| ConvertError::ExampleRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.process_bytes(bytes, &path.display().to_string(), transforms)
    }

    pub fn process_bytes(
        &self,
        bytes: Vec<u8>,
        example: &str,
        transforms: &Transforms,
    ) -> DatasetResult<Vec<u8>> {
        let image_err = |e| ConvertError::Image {
            example: example.to_string(),
            source: e,
        };
        let (format, color) = {
            let reader = ImageReader::new(Cursor::new(bytes.as_slice()))
                .with_guessed_format()
                .map_err(|e| ConvertError::ExampleRead {
                    path: example.into(),
                    source: e,
                })?;
            let format = reader.format();
            let decoder = reader.into_decoder().map_err(image_err)?;
            (format, image::ImageDecoder::color_type(&decoder))
        };
        // The jpeg decoder reports Rgb8 for CMYK/YCCK sources too.
        let three_components =
            format != Some(ImageFormat::Jpeg) || jpeg_components(&bytes) == Some(3);
        if transforms.is_identity()
            && format == Some(self.format.image_format())
            && color == ColorType::Rgb8
            && three_components
        {
            return Ok(bytes);
        }
        let decoded = image::load_from_memory(&bytes).map_err(image_err)?;
        self.transform_and_encode(decoded.to_rgb8(), example, transforms)
    }

    /// Reshapes a flat intensity vector into a square grayscale image; always encodes.
    pub fn process_intensities(
        &self,
        pixels: &[u8],
        example: &str,
        transforms: &Transforms,
    ) -> DatasetResult<Vec<u8>> {
        let side = square_side(pixels.len()).ok_or_else(|| {
            ConvertError::Config(format!(
                "{example}: {} intensities do not form a square image",
                pixels.len()
            ))
        })?;
        let gray = GrayImage::from_raw(side, side, pixels.to_vec()).ok_or_else(|| {
            ConvertError::Config(format!("{example}: intensity buffer size mismatch"))
        })?;
        let rgb = DynamicImage::ImageLuma8(gray).to_rgb8();
        self.transform_and_encode(rgb, example, transforms)
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn transform_and_encode(
        &self,
        mut rgb: RgbImage,
        example: &str,
        transforms: &Transforms,
    ) -> DatasetResult<Vec<u8>> {
        if let Some(crop) = &transforms.crop {
            let b = crop.resolve(rgb.width(), rgb.height());
            if b.width() <= 0 || b.height() <= 0 {
                return Err(ConvertError::DegenerateCrop {
                    example: example.to_string(),
                    width: b.width(),
                    height: b.height(),
                });
            }
            rgb = imageops::crop_imm(
                &rgb,
                b.xmin as u32,
                b.ymin as u32,
                b.width() as u32,
                b.height() as u32,
            )
            .to_image();
        }
        if transforms.invert {
            imageops::invert(&mut rgb);
        }
        self.encode(&rgb, example)
    }

    fn encode(&self, rgb: &RgbImage, example: &str) -> DatasetResult<Vec<u8>> {
        let mut out = Vec::new();
        let result = match self.format {
            CanonicalFormat::Jpeg => {
                rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, self.jpeg_quality))
            }
            CanonicalFormat::Png => rgb.write_with_encoder(PngEncoder::new(&mut out)),
        };
        result.map_err(|e| ConvertError::Image {
            example: example.to_string(),
            source: e,
        })?;
        Ok(out)
    }
}

/// Component count declared by the first JPEG frame header (SOFn).
fn jpeg_components(bytes: &[u8]) -> Option<u8> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut i = 2;
    while i + 4 <= bytes.len() {
        if bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        if marker == 0xFF {
            i += 1;
            continue;
        }
        if (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC) {
            // length u16, precision u8, height u16, width u16, components u8
            return bytes.get(i + 9).copied();
        }
        if marker == 0xDA {
            return None;
        }
        let len = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
        i += 2 + len;
    }
    None
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn square_side(len: usize) -> Option<u32> {
    if len == 0 {
        return None;
    }
    let side = (len as f64).sqrt().round() as usize;
    (side * side == len).then_some(side as u32)
}
