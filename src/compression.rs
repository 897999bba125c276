// compression.rs - Output formats and the encoder seam used by the search

use crate::error::CompressError;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::borrow::Cow;
use std::io::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
    WebP,
    Avif,
    Bmp,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 5] = [
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::WebP,
        OutputFormat::Avif,
        OutputFormat::Bmp,
    ];

    /// Whether the encoder exposes a continuous quality knob. Formats without
    /// one can only be shrunk by reducing pixel count.
    pub fn supports_quality(&self) -> bool {
        matches!(self, Self::Jpeg | Self::Avif)
    }

    /// Extension used for saved files: the subtype of the mime type.
    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Avif => "avif",
            Self::Bmp => "bmp",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG (lossy, quality search)",
            Self::Png => "PNG (lossless, scale search)",
            Self::WebP => "WebP lossless (scale search)",
            Self::Avif => "AVIF (lossy, quality search, slow)",
            Self::Bmp => "BMP (uncompressed, scale search)",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jpeg => write!(f, "JPEG"),
            Self::Png => write!(f, "PNG"),
            Self::WebP => write!(f, "WebP"),
            Self::Avif => write!(f, "AVIF"),
            Self::Bmp => write!(f, "BMP"),
        }
    }
}

/// Target pixel dimensions for one encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resize {
    Original,
    /// Downscale, keeping aspect ratio, so the longest side fits. Never upscales.
    MaxSide(u32),
    Exact { width: u32, height: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeParams {
    pub format: OutputFormat,
    /// Fraction in (0, 1]. Ignored by formats without a quality knob.
    pub quality: f32,
    pub resize: Resize,
}

impl EncodeParams {
    pub fn full_fidelity(format: OutputFormat) -> Self {
        Self {
            format,
            quality: 1.0,
            resize: Resize::Original,
        }
    }
}

/// Anything that can turn a decoded image into encoded bytes.
///
/// Implementations must be deterministic: the same image and params always
/// give output of the same size, otherwise the searches cannot converge.
pub trait Encoder: Send + Sync {
    fn encode(&self, image: &DynamicImage, params: &EncodeParams) -> Result<Vec<u8>, CompressError>;

    fn decode(&self, data: &[u8]) -> Result<DynamicImage, CompressError> {
        decode(data)
    }
}

/// Encoder backed by the `image` crate codecs.
#[derive(Debug, Clone, Copy)]
pub struct ImageEncoder {
    pub filter: FilterType,
    pub avif_speed: u8,
}

impl Default for ImageEncoder {
    fn default() -> Self {
        Self {
            filter: FilterType::Lanczos3,
            avif_speed: 8,
        }
    }
}

impl ImageEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn resized<'a>(&self, image: &'a DynamicImage, resize: Resize) -> Cow<'a, DynamicImage> {
        let (width, height) = image.dimensions();
        match resize {
            Resize::Original => Cow::Borrowed(image),
            Resize::MaxSide(max) => {
                let max = max.max(1);
                if width.max(height) <= max {
                    Cow::Borrowed(image)
                } else {
                    Cow::Owned(image.resize(max, max, self.filter))
                }
            }
            Resize::Exact { width: w, height: h } => {
                let (w, h) = (w.max(1), h.max(1));
                if (w, h) == (width, height) {
                    Cow::Borrowed(image)
                } else {
                    Cow::Owned(image.resize_exact(w, h, self.filter))
                }
            }
        }
    }
}

fn quality_percent(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

impl Encoder for ImageEncoder {
    fn encode(&self, image: &DynamicImage, params: &EncodeParams) -> Result<Vec<u8>, CompressError> {
        let img = self.resized(image, params.resize);
        let mut buffer = Cursor::new(Vec::new());
        let encode_err = |e: image::ImageError| CompressError::Encode {
            format: params.format.to_string(),
            reason: e.to_string(),
        };

        match params.format {
            OutputFormat::Jpeg => {
                let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
                let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                    &mut buffer,
                    quality_percent(params.quality),
                );
                rgb.write_with_encoder(encoder).map_err(encode_err)?;
            }
            OutputFormat::Png => {
                let encoder = image::codecs::png::PngEncoder::new_with_quality(
                    &mut buffer,
                    image::codecs::png::CompressionType::Best,
                    image::codecs::png::FilterType::Adaptive,
                );
                img.write_with_encoder(encoder).map_err(encode_err)?;
            }
            OutputFormat::WebP => {
                let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
                let encoder = image::codecs::webp::WebPEncoder::new_lossless(&mut buffer);
                rgba.write_with_encoder(encoder).map_err(encode_err)?;
            }
            OutputFormat::Avif => {
                let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
                let encoder = image::codecs::avif::AvifEncoder::new_with_speed_quality(
                    &mut buffer,
                    self.avif_speed,
                    quality_percent(params.quality),
                );
                rgba.write_with_encoder(encoder).map_err(encode_err)?;
            }
            OutputFormat::Bmp => {
                img.write_to(&mut buffer, ImageFormat::Bmp).map_err(encode_err)?;
            }
        }

        Ok(buffer.into_inner())
    }
}

/// Decode an upload into pixels.
pub fn decode(data: &[u8]) -> Result<DynamicImage, CompressError> {
    image::load_from_memory(data).map_err(|e| CompressError::Decode(e.to_string()))
}
