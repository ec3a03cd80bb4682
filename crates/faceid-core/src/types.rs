use faceid_hw::{Frame, FrameError, Roi};
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

/// Side length of the square model input.
pub const INPUT_SIZE: usize = 100;
/// Colour channels of the model input (RGB).
pub const INPUT_CHANNELS: usize = 3;

/// Preprocessed model input: (100, 100, 3) RGB, every value in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct FaceTensor(Array3<f32>);

impl FaceTensor {
    pub(crate) fn new(array: Array3<f32>) -> Self {
        debug_assert_eq!(array.shape(), &[INPUT_SIZE, INPUT_SIZE, INPUT_CHANNELS]);
        Self(array)
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.0.view()
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    /// Mean over all elements (0.0 for an empty tensor).
    pub fn mean(&self) -> f32 {
        self.0.mean().unwrap_or(0.0)
    }
}

/// Cutoffs applied to pairwise scores and to the fraction of matches.
///
/// Both comparisons are strict: a score equal to `detection` is not a
/// detection, and a ratio equal to `verification` does not verify.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub detection: f32,
    pub verification: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            detection: 0.5,
            verification: 0.5,
        }
    }
}

impl Thresholds {
    /// Both cutoffs lie in [0, 1].
    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.detection) && (0.0..=1.0).contains(&self.verification)
    }
}

/// Where the verify-time crop is taken from.
///
/// Every raw frame is first resized to `frame_width × frame_height`, then
/// `roi` is cut out of the resized frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureGeometry {
    pub frame_width: u32,
    pub frame_height: u32,
    pub roi: Roi,
}

impl Default for CaptureGeometry {
    fn default() -> Self {
        Self {
            frame_width: 640,
            frame_height: 360,
            roi: Roi::new(200, 50, 250, 250),
        }
    }
}

impl CaptureGeometry {
    pub fn is_valid(&self) -> bool {
        self.roi.fits(self.frame_width, self.frame_height)
    }

    /// Resize `frame` to the capture size and crop the region of interest.
    pub fn apply(&self, frame: &Frame) -> Result<Frame, FrameError> {
        frame
            .resize(self.frame_width, self.frame_height)
            .crop(&self.roi)
    }
}

/// Similarity of the capture against one reference image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairwiseScore {
    /// Name of the reference image (file name for directory galleries).
    pub reference: String,
    pub score: f32,
    /// `score > detection threshold`.
    pub detected: bool,
}

/// Outcome of one verification call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    /// One score per gallery entry, in gallery order.
    pub scores: Vec<PairwiseScore>,
    pub detections: usize,
    /// `detections / scores.len()`.
    pub verification: f32,
    pub verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let t = Thresholds::default();
        assert_eq!(t.detection, 0.5);
        assert_eq!(t.verification, 0.5);
        assert!(t.is_valid());
    }

    #[test]
    fn test_thresholds_out_of_range() {
        let t = Thresholds {
            detection: 1.5,
            verification: 0.5,
        };
        assert!(!t.is_valid());
        let t = Thresholds {
            detection: 0.5,
            verification: -0.1,
        };
        assert!(!t.is_valid());
    }

    #[test]
    fn test_default_geometry_is_valid() {
        assert!(CaptureGeometry::default().is_valid());
    }

    #[test]
    fn test_geometry_apply_yields_roi_size() {
        let frame = Frame::from_bgr(vec![90; 640 * 480 * 3], 640, 480).unwrap();
        let crop = CaptureGeometry::default().apply(&frame).unwrap();
        assert_eq!((crop.width, crop.height), (250, 250));
        assert!(crop.data.iter().all(|&v| v == 90));
    }

    #[test]
    fn test_geometry_rejects_roi_outside_frame() {
        let geometry = CaptureGeometry {
            roi: Roi::new(500, 0, 250, 250),
            ..CaptureGeometry::default()
        };
        assert!(!geometry.is_valid());
        let frame = Frame::from_bgr(vec![0; 640 * 480 * 3], 640, 480).unwrap();
        assert!(geometry.apply(&frame).is_err());
    }

    #[test]
    fn test_thresholds_deserialize_partial() {
        let t: Thresholds = serde_json::from_str(r#"{"detection": 0.7}"#).unwrap();
        assert_eq!(t.detection, 0.7);
        assert_eq!(t.verification, 0.5);
    }
}
