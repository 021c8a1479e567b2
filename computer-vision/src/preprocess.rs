//! Image decoding and the fixed ImageNet preprocessing pipeline.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

use crate::error::ClassifyError;

/// Target length of the shorter image side after resizing.
pub const RESIZE_SHORT_SIDE: u32 = 256;

/// Side of the square center crop fed to the model.
pub const CROP_SIZE: u32 = 224;

/// Longest allowed side after resizing, as a multiple of the short side.
/// Bounds the resize buffer at 256 x 16384 pixels.
pub const MAX_ASPECT_RATIO: u32 = 64;

/// ImageNet per-channel mean (RGB).
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet per-channel standard deviation (RGB).
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Decode a base64 payload into raw bytes.
///
/// Accepts an optional `data:<mime>;base64,` prefix and ignores embedded
/// whitespace (line-wrapped encoders).
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, ClassifyError> {
    let data = match payload.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

/// Decode image bytes (any format the `image` crate understands) into 8-bit RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, ClassifyError> {
    let image = image::load_from_memory(bytes)?.to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(ClassifyError::EmptyImage);
    }
    Ok(image)
}

/// Resize, center-crop and normalize into a `[1, 3, 224, 224]` batch.
pub fn to_input_batch(image: &RgbImage) -> Result<Array4<f32>, ClassifyError> {
    let (width, height) = resized_dimensions(image.width(), image.height())?;
    let resized = imageops::resize(image, width, height, FilterType::Triangle);

    let left = crop_offset(width);
    let top = crop_offset(height);
    let cropped = imageops::crop_imm(&resized, left, top, CROP_SIZE, CROP_SIZE).to_image();

    let side = CROP_SIZE as usize;
    Ok(Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
        let value = cropped.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0;
        (value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]
    }))
}

/// Scale so the shorter side becomes [`RESIZE_SHORT_SIDE`], keeping aspect ratio.
/// The longer side is truncated, not rounded.
///
/// Images longer than [`MAX_ASPECT_RATIO`] times their short side are rejected.
fn resized_dimensions(width: u32, height: u32) -> Result<(u32, u32), ClassifyError> {
    let (short, long) = (width.min(height), width.max(height));
    if short == 0 {
        return Err(ClassifyError::EmptyImage);
    }
    if u64::from(long) > u64::from(short) * u64::from(MAX_ASPECT_RATIO) {
        return Err(ClassifyError::Dimensions {
            width,
            height,
            max_ratio: MAX_ASPECT_RATIO,
        });
    }

    let scaled = u64::from(RESIZE_SHORT_SIDE) * u64::from(long) / u64::from(short);
    let scaled = u32::try_from(scaled).map_err(|_| ClassifyError::Dimensions {
        width,
        height,
        max_ratio: MAX_ASPECT_RATIO,
    })?;

    if width <= height {
        Ok((RESIZE_SHORT_SIDE, scaled))
    } else {
        Ok((scaled, RESIZE_SHORT_SIDE))
    }
}

/// Half the excess length, ties to even. Lengths below the crop size give 0.
fn crop_offset(length: u32) -> u32 {
    (length.saturating_sub(CROP_SIZE) as f64 / 2.0).round_ties_even() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_decode_base64_plain_and_data_url() {
        assert_eq!(decode_base64("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(
            decode_base64("data:image/png;base64,aGVs\nbG8=").unwrap(),
            b"hello"
        );
    }

    #[test]
    fn test_decode_base64_malformed() {
        let err = decode_base64("not base64!!").unwrap_err();
        assert!(matches!(err, ClassifyError::Decode(_)));
    }

    #[test]
    fn test_decode_image_rejects_garbage() {
        let err = decode_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ClassifyError::ImageFormat(_)));
    }

    #[test]
    fn test_resized_dimensions() {
        assert_eq!(resized_dimensions(640, 480).unwrap(), (341, 256));
        assert_eq!(resized_dimensions(480, 640).unwrap(), (256, 341));
        assert_eq!(resized_dimensions(100, 100).unwrap(), (256, 256));
        assert_eq!(resized_dimensions(1000, 100).unwrap(), (2560, 256));
        assert_eq!(resized_dimensions(1, 1).unwrap(), (256, 256));
    }

    #[test]
    fn test_resized_dimensions_aspect_ratio_limit() {
        // Exactly 64:1 is the widest accepted shape.
        assert_eq!(resized_dimensions(64, 1).unwrap(), (16384, 256));
        assert_eq!(resized_dimensions(2, 128).unwrap(), (256, 16384));

        for (width, height) in [(65, 1), (2, 129), (1, 16_777_216), (1, 16_777_217), (1, 20_000_000)] {
            let err = resized_dimensions(width, height).unwrap_err();
            assert!(
                matches!(err, ClassifyError::Dimensions { max_ratio: 64, .. }),
                "{}x{} should be rejected, got {:?}",
                width,
                height,
                err
            );
        }

        assert!(matches!(
            resized_dimensions(0, 10),
            Err(ClassifyError::EmptyImage)
        ));
    }

    #[test]
    fn test_tall_narrow_image_is_rejected_before_resize() {
        let image = RgbImage::from_pixel(1, 100, Rgb([10, 20, 30]));
        let err = to_input_batch(&image).unwrap_err();
        assert!(err.to_string().contains("1x100"));
    }

    #[test]
    fn test_crop_offset() {
        assert_eq!(crop_offset(224), 0);
        assert_eq!(crop_offset(256), 16);
        assert_eq!(crop_offset(341), 58);
        assert_eq!(crop_offset(343), 60);
        assert_eq!(crop_offset(0), 0);
        assert_eq!(crop_offset(100), 0);
    }

    #[test]
    fn test_batch_shape_and_normalization() {
        let image = RgbImage::from_pixel(320, 240, Rgb([255, 0, 128]));
        let batch = to_input_batch(&image).unwrap();

        assert_eq!(batch.shape(), &[1, 3, 224, 224]);

        let red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let green = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        let blue = (128.0 / 255.0 - IMAGENET_MEAN[2]) / IMAGENET_STD[2];
        assert!((batch[[0, 0, 100, 100]] - red).abs() < 1e-5);
        assert!((batch[[0, 1, 0, 0]] - green).abs() < 1e-5);
        assert!((batch[[0, 2, 223, 223]] - blue).abs() < 1e-5);
    }
}
