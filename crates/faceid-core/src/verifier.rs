//! Verification aggregator.
//!
//! Captures one frame, crops the region of interest, persists it, scores it
//! against every gallery image, and thresholds the scores into a decision:
//!
//! ```text
//! verified = count(score > detection) / N > verification
//! ```

use crate::gallery::{GalleryError, GallerySource};
use crate::model::{ModelError, SimilarityModel};
use crate::preprocess::{self, PreprocessError};
use crate::types::{CaptureGeometry, PairwiseScore, Thresholds, VerificationResult};
use faceid_hw::{CaptureError, Frame, FrameError, FrameSource};
use image::codecs::jpeg::JpegEncoder;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// JPEG quality of the persisted capture.
const CAPTURE_JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("verification aborted: {0}")]
    Aborted(#[source] CaptureError),
    #[error("reference gallery is empty")]
    EmptyGallery,
    #[error("a verification is already in progress")]
    Busy,
    #[error("capture crop failed: {0}")]
    Frame(#[from] FrameError),
    #[error("failed to encode capture: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to write capture to {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("capture preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("reference {name} unusable: {source}")]
    Reference {
        name: String,
        source: PreprocessError,
    },
    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

/// Single-slot flag allowing at most one verification at a time.
///
/// Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<AtomicBool>);

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot, or `None` if a verification already holds it.
    pub fn try_acquire(&self) -> Option<InFlightGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(Arc::clone(&self.0)))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn owns(&self, guard: &InFlightGuard) -> bool {
        Arc::ptr_eq(&self.0, &guard.0)
    }
}

/// Proof of holding the [`InFlight`] slot; releases it on drop.
#[derive(Debug)]
pub struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Counts and ratio derived from a score sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub detections: usize,
    pub verification: f32,
    pub verified: bool,
}

/// Threshold a score sequence into a decision.
///
/// An empty sequence has no defined ratio and is rejected.
pub fn decide(scores: &[f32], thresholds: &Thresholds) -> Result<Decision, VerifyError> {
    if scores.is_empty() {
        return Err(VerifyError::EmptyGallery);
    }
    let detections = scores.iter().filter(|&&s| s > thresholds.detection).count();
    let verification = detections as f32 / scores.len() as f32;
    Ok(Decision {
        detections,
        verification,
        verified: verification > thresholds.verification,
    })
}

/// Runs verifications with an owned similarity model.
pub struct Verifier<M> {
    model: M,
    thresholds: Thresholds,
    geometry: CaptureGeometry,
    capture_path: Option<PathBuf>,
    in_flight: InFlight,
}

impl<M: SimilarityModel> Verifier<M> {
    pub fn new(model: M, thresholds: Thresholds, geometry: CaptureGeometry) -> Self {
        Self {
            model,
            thresholds,
            geometry,
            capture_path: None,
            in_flight: InFlight::new(),
        }
    }

    /// Overwrite this file with the cropped capture on every verification.
    pub fn with_capture_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.capture_path = Some(path.into());
        self
    }

    /// Share an existing in-flight slot (e.g. with a request handle).
    pub fn with_in_flight(mut self, in_flight: InFlight) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }

    pub fn geometry(&self) -> &CaptureGeometry {
        &self.geometry
    }

    /// Acquire the in-flight slot and verify.
    pub fn verify(
        &mut self,
        source: &mut dyn FrameSource,
        gallery: &dyn GallerySource,
    ) -> Result<VerificationResult, VerifyError> {
        let guard = self.in_flight.try_acquire().ok_or(VerifyError::Busy)?;
        self.verify_held(&guard, source, gallery)
    }

    /// Verify while the caller already holds this verifier's in-flight slot.
    ///
    /// A guard taken from a different [`InFlight`] is rejected with `Busy`.
    pub fn verify_held(
        &mut self,
        guard: &InFlightGuard,
        source: &mut dyn FrameSource,
        gallery: &dyn GallerySource,
    ) -> Result<VerificationResult, VerifyError> {
        if !self.in_flight.owns(guard) {
            return Err(VerifyError::Busy);
        }

        let frame = source.read_frame().map_err(|e| {
            tracing::warn!(error = %e, "verify: frame capture failed; aborting");
            VerifyError::Aborted(e)
        })?;

        let crop = self.geometry.apply(&frame)?;
        let encoded = encode_jpeg(&crop)?;
        if let Some(path) = &self.capture_path {
            persist(path, &encoded)?;
        }
        let capture = preprocess::preprocess_encoded(&encoded)?;

        let entries = gallery.entries()?;
        if entries.is_empty() {
            return Err(VerifyError::EmptyGallery);
        }

        let mut scores = Vec::with_capacity(entries.len());
        for entry in entries {
            let reference = entry
                .source
                .to_tensor()
                .map_err(|source| VerifyError::Reference {
                    name: entry.name.clone(),
                    source,
                })?;
            let score = self.model.predict(&capture, &reference)?;
            tracing::debug!(reference = %entry.name, score, "verify: scored reference");
            scores.push(PairwiseScore {
                reference: entry.name,
                score,
                detected: score > self.thresholds.detection,
            });
        }

        let raw: Vec<f32> = scores.iter().map(|s| s.score).collect();
        let decision = decide(&raw, &self.thresholds)?;

        tracing::info!(
            references = scores.len(),
            detections = decision.detections,
            verification = decision.verification,
            verified = decision.verified,
            "verify: decision"
        );

        Ok(VerificationResult {
            scores,
            detections: decision.detections,
            verification: decision.verification,
            verified: decision.verified,
        })
    }
}

/// Encode a BGR frame as JPEG bytes.
pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, CAPTURE_JPEG_QUALITY);
    frame.to_rgb_image().write_with_encoder(encoder)?;
    Ok(buf)
}

fn persist(path: &Path, encoded: &[u8]) -> Result<(), VerifyError> {
    let to_err = |source| VerifyError::Persist {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(to_err)?;
    }
    std::fs::write(path, encoded).map_err(to_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_boundary_is_strict() {
        // 2 of 4 detections → 0.5, which does not exceed 0.5
        let d = decide(&[0.9, 0.8, 0.2, 0.1], &Thresholds::default()).unwrap();
        assert_eq!(d.detections, 2);
        assert_eq!(d.verification, 0.5);
        assert!(!d.verified);
    }

    #[test]
    fn test_decide_majority_verifies() {
        let d = decide(&[0.9, 0.8, 0.7, 0.1], &Thresholds::default()).unwrap();
        assert_eq!(d.detections, 3);
        assert!(d.verified);
    }

    #[test]
    fn test_decide_score_equal_to_threshold_is_not_detection() {
        let d = decide(&[0.5, 0.5, 0.5], &Thresholds::default()).unwrap();
        assert_eq!(d.detections, 0);
        assert!(!d.verified);
    }

    #[test]
    fn test_decide_single_reference() {
        assert!(decide(&[0.51], &Thresholds::default()).unwrap().verified);
        assert!(!decide(&[0.49], &Thresholds::default()).unwrap().verified);
    }

    #[test]
    fn test_decide_custom_thresholds() {
        let t = Thresholds {
            detection: 0.7,
            verification: 0.3,
        };
        // 0.8 and 0.75 pass 0.7; 2/5 = 0.4 > 0.3
        let d = decide(&[0.8, 0.75, 0.7, 0.6, 0.1], &t).unwrap();
        assert_eq!(d.detections, 2);
        assert!(d.verified);
    }

    #[test]
    fn test_decide_empty_is_error() {
        let err = decide(&[], &Thresholds::default()).unwrap_err();
        assert!(matches!(err, VerifyError::EmptyGallery));
    }

    #[test]
    fn test_in_flight_single_slot() {
        let slot = InFlight::new();
        assert!(!slot.is_busy());

        let guard = slot.try_acquire().unwrap();
        assert!(slot.is_busy());
        assert!(slot.clone().try_acquire().is_none());

        drop(guard);
        assert!(!slot.is_busy());
        assert!(slot.try_acquire().is_some());
    }

    #[test]
    fn test_in_flight_contended_threads() {
        let slot = InFlight::new();
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let slot = slot.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    slot.try_acquire()
                })
            })
            .collect();

        // Guards are returned (not dropped) so winners stay held until counted.
        let guards: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(guards.iter().filter(|g| g.is_some()).count(), 1);
    }

    #[test]
    fn test_encode_jpeg_decodes_to_same_size() {
        let frame = Frame::from_bgr(vec![60; 250 * 250 * 3], 250, 250).unwrap();
        let bytes = encode_jpeg(&frame).unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (250, 250));
    }
}
