//! faceid-core: face verification pipeline.
//!
//! Preprocesses a captured region of interest, scores it against every
//! image of a reference gallery with a twin-network similarity model
//! (ONNX Runtime), and reduces the pairwise scores to a single decision.

pub mod gallery;
pub mod model;
pub mod preprocess;
pub mod status;
pub mod types;
pub mod verifier;

pub use gallery::{DirectoryGallery, GalleryEntry, GallerySource, ImageSource, MemoryGallery};
pub use model::{ModelError, OnnxSiameseModel, SimilarityModel, TensorLayout};
pub use status::StatusText;
pub use types::{CaptureGeometry, FaceTensor, PairwiseScore, Thresholds, VerificationResult};
pub use verifier::{InFlight, InFlightGuard, Verifier, VerifyError};
