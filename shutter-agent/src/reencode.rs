//! JPEG re-encoder backed by the `image` crate.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ExtendedColorType;

use shutter_core::{Dimensions, Reencoded, Reencoder, ShutterError};

/// Decodes, optionally resizes, and re-encodes as baseline JPEG.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegReencoder;

impl Reencoder for JpegReencoder {
    fn reencode(
        &self,
        jpeg: &[u8],
        quality: u8,
        resize: Option<Dimensions>,
    ) -> Result<Reencoded, ShutterError> {
        let decoded = image::load_from_memory(jpeg).map_err(encoding)?;
        let decoded = match resize {
            Some(d) => decoded.resize_exact(d.width, d.height, FilterType::Triangle),
            None => decoded,
        };

        let rgb = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
            .encode(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
            .map_err(encoding)?;

        Ok(Reencoded {
            bytes,
            width,
            height,
        })
    }
}

fn encoding(e: image::ImageError) -> ShutterError {
    ShutterError::Encoding(e.to_string())
}
