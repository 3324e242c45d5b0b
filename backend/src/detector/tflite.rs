use tract_core::prelude::*;

use super::DetectError;
use super::config::{GraphSpec, ScoreKind};
use super::model::{InferenceBackend, InputKind, ModelInput, RawPrediction, expect_tensor, top_class};
use super::preprocess::{INPUT_SHAPE, TensorSpec};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// Mobile `.tflite` export run through tract. The optimized plan is
/// immutable and each call gets its own state, so no lock is needed.
pub struct QuantizedInterpreter {
    plan: Plan,
    labels: Vec<String>,
    input: TensorSpec,
    scores: ScoreKind,
}

impl QuantizedInterpreter {
    pub fn load(spec: &GraphSpec) -> Result<Self, DetectError> {
        if !spec.model_path.exists() {
            return Err(DetectError::BackendUnavailable(format!(
                "TFLite model not found at {}",
                spec.model_path.display()
            )));
        }

        let plan = tract_tflite::tflite()
            .model_for_path(&spec.model_path)
            .and_then(|model| model.into_optimized()?.into_runnable())
            .map_err(|e| DetectError::BackendUnavailable(format!("TFLite load failed: {:#}", e)))?;

        log::info!(
            "TFLite interpreter ready from {} ({} classes, {} input)",
            spec.model_path.display(),
            spec.labels.len(),
            spec.input.normalization.as_str()
        );

        Ok(Self::from_plan(plan, spec))
    }

    fn from_plan(plan: Plan, spec: &GraphSpec) -> Self {
        Self {
            plan,
            labels: spec.labels.clone(),
            input: spec.input,
            scores: spec.scores,
        }
    }
}

impl InferenceBackend for QuantizedInterpreter {
    fn name(&self) -> &'static str {
        "quantized_interpreter"
    }

    fn input_kind(&self) -> InputKind {
        InputKind::Tensor(self.input)
    }

    fn infer(&self, input: ModelInput<'_>) -> Result<RawPrediction, DetectError> {
        let tensor = expect_tensor(self.name(), input)?;
        let data = tensor
            .as_slice()
            .ok_or_else(|| DetectError::InferenceError("tensor is not contiguous".into()))?;

        let scores = Tensor::from_shape::<f32>(&INPUT_SHAPE, data)
            .and_then(|input| self.plan.run(tvec!(input.into_tvalue())))
            .and_then(|outputs| {
                let scores = outputs[0].cast_to::<f32>()?;
                Ok(scores.as_slice::<f32>()?.to_vec())
            })
            .map_err(|e| DetectError::InferenceError(format!("TFLite invoke failed: {:#}", e)))?;

        log::debug!("TFLite raw output: {:?}", scores);
        top_class(&scores, &self.labels, self.scores)
    }
}
