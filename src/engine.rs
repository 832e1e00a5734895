//! Inference engines that turn a feature matrix into class probabilities.

use crate::features::FeatureMatrix;

#[cfg(feature = "onnx")]
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
#[cfg(feature = "onnx")]
use std::path::Path;
use thiserror::Error;

/// Number of emotion classes the classifier distinguishes.
pub const NUM_CLASSES: usize = 4;

/// Errors that can occur while extracting features or running the model
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The model file is missing or the runtime rejected it.
    #[error("Failed to load model: {0}")]
    ModelLoadError(String),

    /// The runtime failed while running the model.
    #[error("Inference error: {0}")]
    InferenceError(String),

    /// The samples could not be turned into features.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The model produced the wrong number of scores.
    #[error("Model returned {got} values, expected {expected}")]
    UnexpectedOutput {
        /// Scores returned
        got: usize,
        /// Scores expected, one per class
        expected: usize,
    },

    /// Built without the `onnx` feature.
    #[error("Built without the `onnx` feature")]
    FeatureNotEnabled,
}

/// A pre-loaded classifier. Implementations keep no state between calls
/// beyond their own scratch buffers.
pub trait EmotionEngine: Send {
    /// Class probabilities for one feature matrix.
    fn infer(&mut self, features: &FeatureMatrix) -> Result<Vec<f32>, InferenceError>;
}

impl<E: EmotionEngine + ?Sized> EmotionEngine for Box<E> {
    fn infer(&mut self, features: &FeatureMatrix) -> Result<Vec<f32>, InferenceError> {
        (**self).infer(features)
    }
}

/// Check that the model produced one score per class.
pub fn expect_classes(scores: Vec<f32>) -> Result<Vec<f32>, InferenceError> {
    if scores.len() != NUM_CLASSES {
        return Err(InferenceError::UnexpectedOutput {
            got: scores.len(),
            expected: NUM_CLASSES,
        });
    }
    Ok(scores)
}

/// Quantized classifier exported to ONNX. The time axis of its input is
/// dynamic, so any window length works.
#[cfg(feature = "onnx")]
pub struct OnnxEngine {
    session: Session,
}

#[cfg(feature = "onnx")]
impl OnnxEngine {
    /// Load the model at `model_path`.
    pub fn load(model_path: &Path, n_threads: usize) -> Result<Self, InferenceError> {
        if !model_path.exists() {
            return Err(InferenceError::ModelLoadError(format!(
                "Model not found at {:?}",
                model_path
            )));
        }

        let session = Session::builder()
            .map_err(|e: ort::Error| InferenceError::ModelLoadError(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e: ort::Error| InferenceError::ModelLoadError(e.to_string()))?
            .with_intra_threads(n_threads.max(1))
            .map_err(|e: ort::Error| InferenceError::ModelLoadError(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e: ort::Error| InferenceError::ModelLoadError(e.to_string()))?;

        log::info!("Emotion model loaded from {:?}", model_path);
        Ok(Self { session })
    }
}

#[cfg(feature = "onnx")]
impl EmotionEngine for OnnxEngine {
    fn infer(&mut self, features: &FeatureMatrix) -> Result<Vec<f32>, InferenceError> {
        // Model expects [batch, time, n_mfcc]
        let (shape, data) = features.to_batch();
        let input_tensor = Value::from_array((shape, data))
            .map_err(|e: ort::Error| InferenceError::InferenceError(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e: ort::Error| InferenceError::InferenceError(e.to_string()))?;

        let output = outputs
            .iter()
            .next()
            .ok_or_else(|| InferenceError::InferenceError("No output from model".to_string()))?;

        let output_tensor = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e: ort::Error| InferenceError::InferenceError(e.to_string()))?;

        let scores: Vec<f32> = output_tensor.1.iter().copied().collect();
        log::debug!("Model scores: {:?}", scores);
        expect_classes(scores)
    }
}

/// Placeholder used when the crate is built without ONNX support.
#[cfg(not(feature = "onnx"))]
pub struct OnnxEngine;

#[cfg(not(feature = "onnx"))]
impl OnnxEngine {
    /// Always fails with [`InferenceError::FeatureNotEnabled`].
    pub fn load(_model_path: &std::path::Path, _n_threads: usize) -> Result<Self, InferenceError> {
        Err(InferenceError::FeatureNotEnabled)
    }
}

#[cfg(not(feature = "onnx"))]
impl EmotionEngine for OnnxEngine {
    fn infer(&mut self, _features: &FeatureMatrix) -> Result<Vec<f32>, InferenceError> {
        Err(InferenceError::FeatureNotEnabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(Vec<f32>);

    impl EmotionEngine for Echo {
        fn infer(&mut self, _features: &FeatureMatrix) -> Result<Vec<f32>, InferenceError> {
            expect_classes(self.0.clone())
        }
    }

    #[test]
    fn boxed_engine_delegates() {
        let mut engine: Box<dyn EmotionEngine> = Box::new(Echo(vec![0.1, 0.2, 0.3, 0.4]));
        let features = FeatureMatrix::new(1, 1, vec![0.0]).unwrap();
        assert_eq!(engine.infer(&features).unwrap(), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn wrong_class_count_is_rejected() {
        let mut engine = Echo(vec![0.5, 0.5]);
        let features = FeatureMatrix::new(1, 1, vec![0.0]).unwrap();
        assert!(matches!(
            engine.infer(&features),
            Err(InferenceError::UnexpectedOutput { got: 2, expected: 4 })
        ));
    }

    #[cfg(feature = "onnx")]
    #[test]
    fn missing_model_fails_to_load() {
        let err = OnnxEngine::load(Path::new("/nonexistent/model.onnx"), 1).err().unwrap();
        assert!(matches!(err, InferenceError::ModelLoadError(_)));
    }
}
