//! PNG normalization for images sent to OCR services.

use std::io::Cursor;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::ImageFormat;

use super::OcrError;

/// Decode any supported image format and re-encode it as PNG.
pub fn normalize_to_png(bytes: &[u8]) -> Result<Vec<u8>, OcrError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|error| OcrError::Image(error.to_string()))?;
    let mut buffer = Cursor::new(Vec::new());
    decoded
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|error| OcrError::Image(error.to_string()))?;
    Ok(buffer.into_inner())
}

/// Normalize to PNG and base64-encode the result.
pub fn png_base64(bytes: &[u8]) -> Result<String, OcrError> {
    normalize_to_png(bytes).map(|png| STANDARD.encode(png))
}

#[cfg(test)]
pub(crate) fn sample_image(format: ImageFormat) -> Vec<u8> {
    let image = image::RgbImage::from_fn(4, 4, |x, y| {
        if (x + y) % 2 == 0 {
            image::Rgb([255, 255, 255])
        } else {
            image::Rgb([0, 0, 0])
        }
    });
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, format)
        .expect("encode sample image");
    buffer.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn jpeg_is_converted_to_png() {
        let png = normalize_to_png(&sample_image(ImageFormat::Jpeg)).expect("normalize");
        assert_eq!(&png[..8], &PNG_SIGNATURE);
        let decoded = image::load_from_memory(&png).expect("decodes");
        assert_eq!((decoded.width(), decoded.height()), (4, 4));
    }

    #[test]
    fn base64_output_decodes_to_png() {
        let encoded = png_base64(&sample_image(ImageFormat::Png)).expect("encode");
        let bytes = STANDARD.decode(encoded).expect("valid base64");
        assert_eq!(&bytes[..8], &PNG_SIGNATURE);
    }

    #[test]
    fn garbage_is_rejected() {
        let error = normalize_to_png(b"not an image").expect_err("garbage");
        assert!(matches!(error, OcrError::Image(_)));
    }
}
