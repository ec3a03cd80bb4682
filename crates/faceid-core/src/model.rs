//! Twin-network similarity model via ONNX Runtime.
//!
//! The pipeline treats the trained network as an opaque function of two
//! preprocessed images returning a similarity in [0, 1]. The artifact is an
//! ONNX export of the trained siamese model with two image inputs and one
//! scalar output.

use crate::types::FaceTensor;
use ndarray::{Array4, Axis};
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Expected number of image inputs of a twin network.
const SIAMESE_INPUTS: usize = 2;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    NotFound(String),
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scores the similarity of two preprocessed images.
pub trait SimilarityModel {
    fn predict(&mut self, a: &FaceTensor, b: &FaceTensor) -> Result<f32, ModelError>;
}

impl<M: SimilarityModel + ?Sized> SimilarityModel for Box<M> {
    fn predict(&mut self, a: &FaceTensor, b: &FaceTensor) -> Result<f32, ModelError> {
        (**self).predict(a, b)
    }
}

impl<M: SimilarityModel + ?Sized> SimilarityModel for &mut M {
    fn predict(&mut self, a: &FaceTensor, b: &FaceTensor) -> Result<f32, ModelError> {
        (**self).predict(a, b)
    }
}

/// Memory layout the exported graph expects for each image input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// (1, 100, 100, 3), as exported from Keras/TensorFlow.
    #[default]
    Nhwc,
    /// (1, 3, 100, 100).
    Nchw,
}

/// Siamese similarity model running on ONNX Runtime.
pub struct OnnxSiameseModel {
    session: Session,
    layout: TensorLayout,
}

impl OnnxSiameseModel {
    /// Load the model artifact. Any failure here is fatal for a session.
    pub fn load(model_path: &Path, layout: TensorLayout) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::NotFound(model_path.display().to_string()));
        }

        let load_err = |e: &dyn std::fmt::Display| {
            ModelError::Load(format!("{}: {e}", model_path.display()))
        };
        let session = Session::builder()
            .map_err(|e| load_err(&e))?
            .with_intra_threads(2)
            .map_err(|e| load_err(&e))?
            .commit_from_file(model_path)
            .map_err(|e| load_err(&e))?;

        let num_inputs = session.inputs().len();
        tracing::info!(
            path = %model_path.display(),
            ?layout,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded siamese model"
        );

        if num_inputs != SIAMESE_INPUTS {
            return Err(ModelError::Load(format!(
                "expected {SIAMESE_INPUTS} image inputs, got {num_inputs}"
            )));
        }

        Ok(Self { session, layout })
    }

    /// Add the batch axis and reorder channels for `layout`.
    fn to_batch(tensor: &FaceTensor, layout: TensorLayout) -> Array4<f32> {
        match layout {
            TensorLayout::Nhwc => tensor.view().insert_axis(Axis(0)).to_owned(),
            TensorLayout::Nchw => tensor
                .view()
                .permuted_axes([2, 0, 1])
                .insert_axis(Axis(0))
                .as_standard_layout()
                .into_owned(),
        }
    }
}

impl SimilarityModel for OnnxSiameseModel {
    fn predict(&mut self, a: &FaceTensor, b: &FaceTensor) -> Result<f32, ModelError> {
        let input_a = Self::to_batch(a, self.layout);
        let input_b = Self::to_batch(b, self.layout);

        let outputs = self.session.run(ort::inputs![
            TensorRef::from_array_view(input_a.view())?,
            TensorRef::from_array_view(input_b.view())?
        ])?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("similarity extraction: {e}")))?;

        let score = *data
            .first()
            .ok_or_else(|| ModelError::InferenceFailed("model returned an empty tensor".into()))?;

        if !score.is_finite() {
            return Err(ModelError::InferenceFailed(format!(
                "model returned non-finite similarity {score}"
            )));
        }

        Ok(score.clamp(0.0, 1.0))
    }
}
