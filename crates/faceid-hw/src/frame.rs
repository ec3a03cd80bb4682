//! Frame type and image processing: YUYV/GREY to BGR, crop, bilinear resize.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Bytes per BGR pixel.
pub const CHANNELS: usize = 3;

/// A captured camera frame in packed BGR order (8 bits per channel).
#[derive(Clone)]
pub struct Frame {
    /// BGR pixel data (width * height * 3 bytes, row-major).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

/// Rectangular region of interest inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True if the region is non-empty and lies entirely inside a
    /// `width × height` frame.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).is_some_and(|r| r <= width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= height)
    }
}

impl Frame {
    /// Wrap packed BGR bytes, checking the buffer length against the dimensions.
    pub fn from_bgr(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        })
    }

    /// Build a BGR frame from an RGB image (channel swap).
    pub fn from_rgb_image(img: &RgbImage) -> Self {
        let mut data = Vec::with_capacity(img.as_raw().len());
        for px in img.pixels() {
            data.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        Self {
            data,
            width: img.width(),
            height: img.height(),
            timestamp: std::time::Instant::now(),
            sequence: 0,
        }
    }

    /// Average pixel brightness over all channels (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Copy out the pixels inside `roi`.
    pub fn crop(&self, roi: &Roi) -> Result<Frame, FrameError> {
        if !roi.fits(self.width, self.height) {
            return Err(FrameError::RoiOutOfBounds {
                roi: *roi,
                width: self.width,
                height: self.height,
            });
        }

        let stride = self.width as usize * CHANNELS;
        let row_len = roi.width as usize * CHANNELS;
        let mut data = Vec::with_capacity(row_len * roi.height as usize);
        for y in roi.y as usize..(roi.y + roi.height) as usize {
            let start = y * stride + roi.x as usize * CHANNELS;
            data.extend_from_slice(&self.data[start..start + row_len]);
        }

        Ok(Frame {
            data,
            width: roi.width,
            height: roi.height,
            timestamp: self.timestamp,
            sequence: self.sequence,
        })
    }

    /// Resize with bilinear interpolation, rounding back to 8-bit.
    pub fn resize(&self, width: u32, height: u32) -> Frame {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let resized = resize_bilinear_f32(
            &self.data,
            self.width as usize,
            self.height as usize,
            CHANNELS,
            width as usize,
            height as usize,
        );
        Frame {
            data: resized
                .into_iter()
                .map(|v| v.round().clamp(0.0, 255.0) as u8)
                .collect(),
            width,
            height,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }

    /// Convert to an RGB image (channel swap), e.g. for encoding to disk.
    pub fn to_rgb_image(&self) -> RgbImage {
        let w = self.width as usize;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let i = (y as usize * w + x as usize) * CHANNELS;
            Rgb([self.data[i + 2], self.data[i + 1], self.data[i]])
        })
    }
}

/// Bilinear resize of packed interleaved 8-bit pixels into `f32` samples.
///
/// Uses half-pixel centres: destination pixel `x` samples source coordinate
/// `(x + 0.5) * src_w / dst_w - 0.5`, clamped to the image. Output values are
/// not rounded, so they stay in `[0.0, 255.0]`.
pub fn resize_bilinear_f32(
    src: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    dst_width: usize,
    dst_height: usize,
) -> Vec<f32> {
    let mut out = vec![0f32; dst_width * dst_height * channels];
    if width == 0 || height == 0 || src.len() < width * height * channels {
        return out;
    }

    let scale_x = width as f32 / dst_width as f32;
    let scale_y = height as f32 / dst_height as f32;

    for y in 0..dst_height {
        let src_y = ((y as f32 + 0.5) * scale_y - 0.5).max(0.0);
        let y0 = (src_y.floor() as usize).min(height - 1);
        let y1 = (y0 + 1).min(height - 1);
        let fy = src_y - y0 as f32;

        for x in 0..dst_width {
            let src_x = ((x as f32 + 0.5) * scale_x - 0.5).max(0.0);
            let x0 = (src_x.floor() as usize).min(width - 1);
            let x1 = (x0 + 1).min(width - 1);
            let fx = src_x - x0 as f32;

            for c in 0..channels {
                let tl = src[(y0 * width + x0) * channels + c] as f32;
                let tr = src[(y0 * width + x1) * channels + c] as f32;
                let bl = src[(y1 * width + x0) * channels + c] as f32;
                let br = src[(y1 * width + x1) * channels + c] as f32;

                let top = tl + (tr - tl) * fx;
                let bot = bl + (br - bl) * fx;
                out[(y * dst_width + x) * channels + c] = top + (bot - top) * fy;
            }
        }
    }

    out
}

/// Convert packed YUYV (4:2:2) to BGR using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_bgr(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut bgr = Vec::with_capacity((width * height) as usize * CHANNELS);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (u, v) = (chunk[1], chunk[3]);
        push_yuv_as_bgr(&mut bgr, chunk[0], u, v);
        push_yuv_as_bgr(&mut bgr, chunk[2], u, v);
    }
    Ok(bgr)
}

fn push_yuv_as_bgr(out: &mut Vec<u8>, y: u8, u: u8, v: u8) {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    out.push(b.clamp(0, 255) as u8);
    out.push(g.clamp(0, 255) as u8);
    out.push(r.clamp(0, 255) as u8);
}

/// Replicate 8-bit grayscale into three BGR channels.
pub fn grey_to_bgr(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if gray.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: gray.len(),
        });
    }
    Ok(gray[..expected].iter().flat_map(|&p| [p, p, p]).collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("region {roi:?} does not fit inside {width}x{height} frame")]
    RoiOutOfBounds { roi: Roi, width: u32, height: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let data = (0..height)
            .flat_map(|y| (0..width).flat_map(move |x| [x as u8, y as u8, 7]))
            .collect();
        Frame::from_bgr(data, width, height).unwrap()
    }

    #[test]
    fn test_yuyv_neutral_gray() {
        // Y=126 with neutral chroma maps to mid gray
        let yuyv = vec![126, 128, 126, 128];
        let bgr = yuyv_to_bgr(&yuyv, 2, 1).unwrap();
        assert_eq!(bgr, vec![128; 6]);
    }

    #[test]
    fn test_yuyv_black_and_white() {
        let yuyv = vec![16, 128, 235, 128];
        let bgr = yuyv_to_bgr(&yuyv, 2, 1).unwrap();
        assert_eq!(&bgr[..3], &[0, 0, 0]);
        assert_eq!(&bgr[3..], &[255, 255, 255]);
    }

    #[test]
    fn test_yuyv_red_dominant() {
        // High V pushes red up and green down; blue stays low.
        let yuyv = vec![81, 90, 81, 240];
        let bgr = yuyv_to_bgr(&yuyv, 2, 1).unwrap();
        let (b, g, r) = (bgr[0], bgr[1], bgr[2]);
        assert!(r > 200, "r={r}");
        assert!(g < 50, "g={g}");
        assert!(b < 50, "b={b}");
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_bgr(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_bgr() {
        let bgr = grey_to_bgr(&[10, 200], 2, 1).unwrap();
        assert_eq!(bgr, vec![10, 10, 10, 200, 200, 200]);
    }

    #[test]
    fn test_from_bgr_rejects_wrong_length() {
        assert!(Frame::from_bgr(vec![0; 10], 2, 2).is_err());
        assert!(Frame::from_bgr(vec![0; 12], 2, 2).is_ok());
    }

    #[test]
    fn test_roi_fits() {
        assert!(Roi::new(200, 50, 250, 250).fits(640, 360));
        assert!(!Roi::new(200, 120, 250, 250).fits(640, 360));
        assert!(!Roi::new(0, 0, 0, 10).fits(640, 360));
        assert!(!Roi::new(u32::MAX, 0, 2, 2).fits(640, 360));
    }

    #[test]
    fn test_crop_copies_region() {
        let frame = gradient_frame(8, 6);
        let crop = frame.crop(&Roi::new(2, 3, 4, 2)).unwrap();
        assert_eq!((crop.width, crop.height), (4, 2));
        assert_eq!(crop.data.len(), 4 * 2 * 3);
        // Top-left pixel of the crop is source pixel (2, 3)
        assert_eq!(&crop.data[..3], &[2, 3, 7]);
        // Bottom-right pixel is source pixel (5, 4)
        assert_eq!(&crop.data[crop.data.len() - 3..], &[5, 4, 7]);
    }

    #[test]
    fn test_crop_out_of_bounds() {
        let frame = gradient_frame(8, 6);
        let err = frame.crop(&Roi::new(5, 0, 4, 2)).err().unwrap();
        assert!(matches!(err, FrameError::RoiOutOfBounds { .. }));
    }

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let frame = Frame::from_bgr(vec![77; 13 * 9 * 3], 13, 9).unwrap();
        let resized = frame.resize(5, 4);
        assert_eq!((resized.width, resized.height), (5, 4));
        assert!(resized.data.iter().all(|&v| v == 77));
    }

    #[test]
    fn test_resize_same_size_is_identity() {
        let frame = gradient_frame(8, 6);
        let resized = frame.resize(8, 6);
        assert_eq!(resized.data, frame.data);
    }

    #[test]
    fn test_resize_downscale_by_two_averages() {
        // 2x1 → 1x1 samples exactly between the two pixels
        let frame = Frame::from_bgr(vec![0, 0, 0, 100, 100, 100], 2, 1).unwrap();
        let resized = frame.resize(1, 1);
        assert_eq!(resized.data, vec![50, 50, 50]);
    }

    #[test]
    fn test_rgb_roundtrip_swaps_channels() {
        let frame = Frame::from_bgr(vec![1, 2, 3], 1, 1).unwrap();
        let rgb = frame.to_rgb_image();
        assert_eq!(rgb.get_pixel(0, 0).0, [3, 2, 1]);
        let back = Frame::from_rgb_image(&rgb);
        assert_eq!(back.data, frame.data);
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame::from_bgr(vec![0, 100, 200], 1, 1).unwrap();
        assert!((frame.avg_brightness() - 100.0).abs() < 1e-6);
    }
}
