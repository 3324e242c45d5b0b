use image::DynamicImage;
use std::sync::Arc;

use super::DetectError;
use super::config::{BackendKind, DetectorConfig, ScoreKind};
use super::hosted::HostedClassifier;
use super::onnx::PortableGraph;
use super::preprocess::{PreprocessedTensor, TensorSpec};
use super::tflite::QuantizedInterpreter;

/// Output of a single inference call. `confidence` is on the 0..1 scale.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPrediction {
    pub label: String,
    pub class_index: Option<usize>,
    pub confidence: f32,
}

/// What a backend wants to be fed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// The decoded image, preprocessed remotely.
    Image,
    /// A (1, 224, 224, 3) tensor built with this convention.
    Tensor(TensorSpec),
}

pub enum ModelInput<'a> {
    Image(&'a DynamicImage),
    Tensor(&'a PreprocessedTensor),
}

/// A loaded classifier. Implementations are shared across request workers.
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn input_kind(&self) -> InputKind;

    fn infer(&self, input: ModelInput<'_>) -> Result<RawPrediction, DetectError>;
}

/// Builds the configured backend. Called once at startup.
pub fn load_backend(config: &DetectorConfig) -> Result<Arc<dyn InferenceBackend>, DetectError> {
    let backend: Arc<dyn InferenceBackend> = match config.backend {
        BackendKind::HostedClassifier => {
            Arc::new(HostedClassifier::new(&config.backends.hosted_classifier)?)
        }
        BackendKind::PortableGraph => Arc::new(PortableGraph::load(&config.backends.portable_graph)?),
        BackendKind::QuantizedInterpreter => Arc::new(QuantizedInterpreter::load(
            &config.backends.quantized_interpreter,
        )?),
    };
    log::info!("Loaded inference backend: {}", backend.name());
    Ok(backend)
}

pub(crate) fn expect_tensor<'a>(
    backend: &str,
    input: ModelInput<'a>,
) -> Result<&'a PreprocessedTensor, DetectError> {
    match input {
        ModelInput::Tensor(tensor) => {
            tensor.ensure_input_shape()?;
            Ok(tensor)
        }
        ModelInput::Image(_) => Err(DetectError::InferenceError(format!(
            "{} expects a preprocessed tensor, got a raw image",
            backend
        ))),
    }
}

/// Picks the arg-max class out of a score vector.
pub(crate) fn top_class(
    scores: &[f32],
    labels: &[String],
    kind: ScoreKind,
) -> Result<RawPrediction, DetectError> {
    let probabilities = match kind {
        ScoreKind::Probability => scores.to_vec(),
        ScoreKind::Logits => softmax(scores),
    };

    let (class_index, score) = probabilities
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, score)| !score.is_nan())
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or_else(|| DetectError::InferenceError("model returned no scores".into()))?;

    let label = labels.get(class_index).ok_or_else(|| {
        DetectError::InferenceError(format!(
            "class index {} has no label ({} labels configured)",
            class_index,
            labels.len()
        ))
    })?;

    Ok(RawPrediction {
        label: label.clone(),
        class_index: Some(class_index),
        confidence: score.clamp(0.0, 1.0),
    })
}

pub(crate) fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}
