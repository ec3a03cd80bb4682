//! Image → model input conversion.
//!
//! Decode, bilinear resize to 100×100, divide by 255. Every function here
//! is pure: identical input always produces a bit-identical tensor.

use crate::types::{FaceTensor, INPUT_CHANNELS, INPUT_SIZE};
use faceid_hw::frame::resize_bilinear_f32;
use faceid_hw::Frame;
use image::RgbImage;
use ndarray::Array3;
use std::path::Path;
use thiserror::Error;

const PIXEL_SCALE: f32 = 255.0;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has zero size ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("tensor shape mismatch: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Read an image file and preprocess it.
pub fn preprocess_file(path: &Path) -> Result<FaceTensor, PreprocessError> {
    let bytes = std::fs::read(path).map_err(|source| PreprocessError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    preprocess_encoded(&bytes)
}

/// Decode encoded image bytes (JPEG, PNG, ...) and preprocess them.
pub fn preprocess_encoded(bytes: &[u8]) -> Result<FaceTensor, PreprocessError> {
    let img = image::load_from_memory(bytes)?;
    preprocess_image(&img.to_rgb8())
}

/// Preprocess an already decoded RGB image.
pub fn preprocess_image(img: &RgbImage) -> Result<FaceTensor, PreprocessError> {
    to_tensor(img.as_raw(), img.width(), img.height())
}

/// Preprocess a BGR camera frame (channels are swapped to RGB first).
pub fn preprocess_frame(frame: &Frame) -> Result<FaceTensor, PreprocessError> {
    preprocess_image(&frame.to_rgb_image())
}

fn to_tensor(rgb: &[u8], width: u32, height: u32) -> Result<FaceTensor, PreprocessError> {
    if width == 0 || height == 0 {
        return Err(PreprocessError::EmptyImage { width, height });
    }

    let resized = resize_bilinear_f32(
        rgb,
        width as usize,
        height as usize,
        INPUT_CHANNELS,
        INPUT_SIZE,
        INPUT_SIZE,
    );
    let values = resized
        .into_iter()
        .map(|v| (v / PIXEL_SCALE).clamp(0.0, 1.0))
        .collect();

    let array = Array3::from_shape_vec((INPUT_SIZE, INPUT_SIZE, INPUT_CHANNELS), values)?;
    Ok(FaceTensor::new(array))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn noisy_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = (x * 31 + y * 17) % 256;
            Rgb([v as u8, (255 - v) as u8, ((x * y) % 256) as u8])
        })
    }

    fn encode(img: &RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_output_shape_and_range() {
        for (w, h) in [(250, 250), (37, 80), (1, 1), (640, 360)] {
            let tensor = preprocess_image(&noisy_image(w, h)).unwrap();
            assert_eq!(tensor.shape(), &[INPUT_SIZE, INPUT_SIZE, INPUT_CHANNELS]);
            assert!(tensor.view().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_deterministic() {
        let bytes = encode(&noisy_image(250, 250), ImageFormat::Jpeg);
        let a = preprocess_encoded(&bytes).unwrap();
        let b = preprocess_encoded(&bytes).unwrap();
        let bits = |t: &FaceTensor| t.view().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn test_normalization_divides_by_255() {
        let img = RgbImage::from_pixel(100, 100, Rgb([255, 0, 51]));
        let tensor = preprocess_image(&img).unwrap();
        let px = tensor.view();
        assert_eq!(px[[0, 0, 0]], 1.0);
        assert_eq!(px[[0, 0, 1]], 0.0);
        assert!((px[[50, 50, 2]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_png_is_lossless() {
        let img = noisy_image(100, 100);
        let from_png = preprocess_encoded(&encode(&img, ImageFormat::Png)).unwrap();
        let direct = preprocess_image(&img).unwrap();
        assert_eq!(from_png, direct);
    }

    #[test]
    fn test_frame_channels_swapped_to_rgb() {
        // BGR (10, 20, 30) → RGB (30, 20, 10)
        let frame = Frame::from_bgr([10u8, 20, 30].repeat(4 * 4), 4, 4).unwrap();
        let tensor = preprocess_frame(&frame).unwrap();
        let px = tensor.view();
        assert!((px[[0, 0, 0]] - 30.0 / 255.0).abs() < 1e-6);
        assert!((px[[0, 0, 2]] - 10.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_grayscale_input_expanded() {
        let gray = image::GrayImage::from_pixel(20, 20, image::Luma([128]));
        let mut buf = Cursor::new(Vec::new());
        gray.write_to(&mut buf, ImageFormat::Png).unwrap();
        let tensor = preprocess_encoded(buf.get_ref()).unwrap();
        assert_eq!(tensor.shape(), &[INPUT_SIZE, INPUT_SIZE, INPUT_CHANNELS]);
        assert!((tensor.mean() - 128.0 / 255.0).abs() < 1e-5);
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        let err = preprocess_encoded(b"not an image").unwrap_err();
        assert!(matches!(err, PreprocessError::Decode(_)));
    }

    #[test]
    fn test_empty_image_rejected() {
        let err = preprocess_image(&RgbImage::new(0, 0)).unwrap_err();
        assert!(matches!(err, PreprocessError::EmptyImage { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = preprocess_file(Path::new("/nonexistent/faceid/ref.jpg")).unwrap_err();
        assert!(matches!(err, PreprocessError::Io { .. }));
    }
}
