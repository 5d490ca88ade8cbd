//! MJPEG decoder using TurboJPEG (software) -> RGB24.

use turbojpeg::PixelFormat as TJPixelFormat;

use super::{DecodedImage, FrameDecoder};
use crate::error::{AppError, Result};

/// Refuse to allocate for images larger than this many pixels (8K UHD)
const DEFAULT_MAX_PIXELS: usize = 7680 * 4320;

pub struct MjpegTurboDecoder {
    max_pixels: usize,
}

impl MjpegTurboDecoder {
    pub fn new() -> Self {
        Self {
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }

    pub fn with_max_pixels(max_pixels: usize) -> Self {
        Self { max_pixels }
    }
}

impl Default for MjpegTurboDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for MjpegTurboDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<DecodedImage> {
        let header = turbojpeg::read_header(data)
            .map_err(|e| AppError::Decode(format!("turbojpeg read_header failed: {}", e)))?;

        // The header is attacker controlled; check before decompress allocates
        let pixels = header.width.saturating_mul(header.height);
        if pixels == 0 || pixels > self.max_pixels {
            return Err(AppError::Decode(format!(
                "unsupported image size {}x{}",
                header.width, header.height
            )));
        }

        let image = turbojpeg::decompress(data, TJPixelFormat::RGB)
            .map_err(|e| AppError::Decode(format!("turbojpeg decode failed: {}", e)))?;

        // Repack if the decoder padded rows
        let row = image.width * 3;
        let pixels = if image.pitch == row {
            image.pixels
        } else {
            image
                .pixels
                .chunks(image.pitch)
                .take(image.height)
                .flat_map(|line| line[..row].iter().copied())
                .collect()
        };

        Ok(DecodedImage {
            width: image.width as u32,
            height: image.height as u32,
            pixels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::source::encode_test_pattern;

    #[test]
    fn test_decode_generated_jpeg() {
        let jpeg = encode_test_pattern(64, 48, 3, 80).unwrap();
        let mut decoder = MjpegTurboDecoder::new();

        let image = decoder.decode(&jpeg).unwrap();
        assert_eq!(image.width, 64);
        assert_eq!(image.height, 48);
        assert_eq!(image.pixels.len(), 64 * 48 * 3);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let mut decoder = MjpegTurboDecoder::new();
        let result = decoder.decode(b"definitely not a jpeg");
        assert!(matches!(result, Err(AppError::Decode(_))));
    }

    #[test]
    fn test_pixel_limit() {
        let jpeg = encode_test_pattern(64, 48, 0, 80).unwrap();
        let mut decoder = MjpegTurboDecoder::with_max_pixels(100);
        assert!(matches!(decoder.decode(&jpeg), Err(AppError::Decode(_))));
    }
}
