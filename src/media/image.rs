//! Still-image decoding, resizing and the built-in encoders.
//!
//! Everything here is CPU bound; async callers run it on
//! `tokio::task::spawn_blocking`.

use std::io::Cursor;

use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};

use crate::error::MediaError;
use crate::media::detection::Format;

/// A decoded still image.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    image: DynamicImage,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Resize so that the longer side equals `bound`, keeping aspect ratio.
    ///
    /// Images are scaled up as well as down. Each side is at least 1px.
    pub fn fit_to_square(&self, bound: u32) -> DecodedImage {
        let (width, height) = fit_dimensions(self.width(), self.height(), bound);
        if (width, height) == self.dimensions() {
            return self.clone();
        }
        DecodedImage {
            image: self.image.resize_exact(width, height, FilterType::Lanczos3),
        }
    }

    /// Encode as lossless WebP with the pure-Rust encoder.
    pub fn encode_lossless_webp(&self) -> Result<Vec<u8>, MediaError> {
        let rgba = DynamicImage::ImageRgba8(self.image.to_rgba8());
        let mut out = Vec::new();
        rgba.write_with_encoder(WebPEncoder::new_lossless(&mut out))
            .map_err(|e| MediaError::Encode {
                reason: format!("lossless WebP: {}", e),
            })?;
        Ok(out)
    }

    /// Encode as PNG.
    pub fn encode_png(&self) -> Result<Vec<u8>, MediaError> {
        let mut out = Vec::new();
        self.image
            .write_with_encoder(PngEncoder::new(&mut out))
            .map_err(|e| MediaError::Encode {
                reason: format!("PNG: {}", e),
            })?;
        Ok(out)
    }
}

impl From<DynamicImage> for DecodedImage {
    fn from(image: DynamicImage) -> Self {
        Self { image }
    }
}

/// Compute dimensions whose longer side equals `bound`.
pub fn fit_dimensions(width: u32, height: u32, bound: u32) -> (u32, u32) {
    if width == 0 || height == 0 || bound == 0 {
        return (bound.max(1), bound.max(1));
    }
    let (long, short) = if width >= height {
        (width, height)
    } else {
        (height, width)
    };
    let scaled_short = ((short as u64 * bound as u64 + long as u64 / 2) / long as u64) as u32;
    let scaled_short = scaled_short.clamp(1, bound);
    if width >= height {
        (bound, scaled_short)
    } else {
        (scaled_short, bound)
    }
}

/// Decode bytes as the given format.
///
/// GIF yields its first frame. Animated WebP yields its first frame as well.
pub fn decode(data: &[u8], format: Format) -> Result<DecodedImage, MediaError> {
    let image_format = match format {
        Format::Jpeg => image::ImageFormat::Jpeg,
        Format::Png => image::ImageFormat::Png,
        Format::Gif => image::ImageFormat::Gif,
        Format::WebP => image::ImageFormat::WebP,
        Format::Video | Format::Unknown => {
            return Err(MediaError::UnsupportedFormat {
                format: format.to_string(),
            });
        }
    };

    let mut reader = ImageReader::new(Cursor::new(data));
    reader.set_format(image_format);
    let image = reader.decode().map_err(|e| MediaError::Decode {
        format: format.to_string(),
        reason: e.to_string(),
    })?;

    tracing::debug!(
        %format,
        width = image.width(),
        height = image.height(),
        "Decoded still image"
    );
    Ok(DecodedImage { image })
}

/// Decode and fit into the bounding box in one step.
pub fn decode_and_fit(
    data: &[u8],
    format: Format,
    bound: u32,
) -> Result<DecodedImage, MediaError> {
    Ok(decode(data, format)?.fit_to_square(bound))
}
