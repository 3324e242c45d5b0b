use ort::session::Session;
use ort::value::Tensor;
use std::sync::Mutex;

use super::DetectError;
use super::config::{GraphSpec, ScoreKind};
use super::model::{InferenceBackend, InputKind, ModelInput, RawPrediction, expect_tensor, top_class};
use super::preprocess::{INPUT_SHAPE, TensorSpec};

/// Exported ONNX graph run through ONNX Runtime.
///
/// `Session::run` takes `&mut self`, so calls are serialized per instance.
pub struct PortableGraph {
    session: Mutex<Session>,
    labels: Vec<String>,
    input: TensorSpec,
    scores: ScoreKind,
}

impl PortableGraph {
    pub fn load(spec: &GraphSpec) -> Result<Self, DetectError> {
        if !spec.model_path.exists() {
            return Err(DetectError::BackendUnavailable(format!(
                "ONNX model not found at {}",
                spec.model_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| DetectError::BackendUnavailable(e.to_string()))?
            .commit_from_file(&spec.model_path)
            .map_err(|e| DetectError::BackendUnavailable(format!("ONNX load failed: {}", e)))?;

        log::info!(
            "ONNX session ready from {} ({} classes, {} input)",
            spec.model_path.display(),
            spec.labels.len(),
            spec.input.normalization.as_str()
        );

        Ok(Self {
            session: Mutex::new(session),
            labels: spec.labels.clone(),
            input: spec.input,
            scores: spec.scores,
        })
    }
}

impl InferenceBackend for PortableGraph {
    fn name(&self) -> &'static str {
        "portable_graph"
    }

    fn input_kind(&self) -> InputKind {
        InputKind::Tensor(self.input)
    }

    fn infer(&self, input: ModelInput<'_>) -> Result<RawPrediction, DetectError> {
        let tensor = expect_tensor(self.name(), input)?;
        let data = tensor
            .as_slice()
            .ok_or_else(|| DetectError::InferenceError("tensor is not contiguous".into()))?
            .to_vec();

        let input = Tensor::from_array((INPUT_SHAPE, data))
            .map_err(|e| DetectError::InferenceError(format!("ONNX input: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectError::InferenceError("ONNX session lock poisoned".into()))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| DetectError::InferenceError(format!("ONNX inference failed: {}", e)))?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectError::InferenceError(format!("ONNX output: {}", e)))?;

        log::debug!("ONNX raw output: {:?}", scores);
        top_class(scores, &self.labels, self.scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::preprocess::{ChannelOrder, Normalization, PreprocessedTensor};
    use ndarray::Array4;
    use std::path::Path;

    const LABELS: [&str; 6] = ["Healthy", "Black Rot", "Leaf Blight", "Rust", "Mosaic", "Late Blight"];

    fn spec(model_path: &Path, scores: ScoreKind) -> GraphSpec {
        GraphSpec {
            model_path: model_path.to_path_buf(),
            labels: LABELS.iter().map(|l| l.to_string()).collect(),
            input: TensorSpec {
                normalization: Normalization::Symmetric,
                channel_order: ChannelOrder::Bgr,
            },
            scores,
        }
    }

    // Minimal protobuf writer, enough for a ModelProto.
    fn varint(out: &mut Vec<u8>, mut value: u64) {
        while value >= 0x80 {
            out.push((value as u8) | 0x80);
            value >>= 7;
        }
        out.push(value as u8);
    }

    fn int_field(out: &mut Vec<u8>, field: u64, value: u64) {
        varint(out, field << 3);
        varint(out, value);
    }

    fn bytes_field(out: &mut Vec<u8>, field: u64, bytes: &[u8]) {
        varint(out, (field << 3) | 2);
        varint(out, bytes.len() as u64);
        out.extend_from_slice(bytes);
    }

    fn float_value_info(name: &str, dims: &[u64]) -> Vec<u8> {
        let mut shape = Vec::new();
        for dim in dims {
            let mut dimension = Vec::new();
            int_field(&mut dimension, 1, *dim);
            bytes_field(&mut shape, 1, &dimension);
        }
        let mut tensor_type = Vec::new();
        int_field(&mut tensor_type, 1, 1);
        bytes_field(&mut tensor_type, 2, &shape);
        let mut type_proto = Vec::new();
        bytes_field(&mut type_proto, 1, &tensor_type);

        let mut info = Vec::new();
        bytes_field(&mut info, 1, name.as_bytes());
        bytes_field(&mut info, 2, &type_proto);
        info
    }

    /// Graph with an NHWC `input` that returns `scores` as a constant (1, n)
    /// output through an Identity node.
    fn constant_graph(scores: &[f32]) -> Vec<u8> {
        let mut weights = Vec::new();
        int_field(&mut weights, 1, 1);
        int_field(&mut weights, 1, scores.len() as u64);
        int_field(&mut weights, 2, 1);
        bytes_field(&mut weights, 8, b"weights");
        let raw: Vec<u8> = scores.iter().flat_map(|s| s.to_le_bytes()).collect();
        bytes_field(&mut weights, 9, &raw);

        let mut node = Vec::new();
        bytes_field(&mut node, 1, b"weights");
        bytes_field(&mut node, 2, b"scores");
        bytes_field(&mut node, 4, b"Identity");

        let input_dims: Vec<u64> = INPUT_SHAPE.iter().map(|d| *d as u64).collect();
        let mut graph = Vec::new();
        bytes_field(&mut graph, 1, &node);
        bytes_field(&mut graph, 2, b"constant_scores");
        bytes_field(&mut graph, 5, &weights);
        bytes_field(&mut graph, 11, &float_value_info("input", &input_dims));
        bytes_field(&mut graph, 12, &float_value_info("scores", &[1, scores.len() as u64]));

        let mut opset = Vec::new();
        int_field(&mut opset, 2, 13);

        let mut model = Vec::new();
        int_field(&mut model, 1, 7);
        bytes_field(&mut model, 7, &graph);
        bytes_field(&mut model, 8, &opset);
        model
    }

    fn load_graph(dir: &Path, scores: &[f32], kind: ScoreKind) -> PortableGraph {
        let model_path = dir.join("disease_model.onnx");
        std::fs::write(&model_path, constant_graph(scores)).unwrap();
        PortableGraph::load(&spec(&model_path, kind)).unwrap()
    }

    fn leaf_tensor() -> PreprocessedTensor {
        PreprocessedTensor::from_array(Array4::zeros(INPUT_SHAPE))
    }

    #[test]
    fn missing_model_is_unavailable_at_load() {
        let path = Path::new("/nonexistent/disease_model.onnx");
        match PortableGraph::load(&spec(path, ScoreKind::Probability)) {
            Err(DetectError::BackendUnavailable(msg)) => assert!(msg.contains("not found")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("model should not load"),
        }
    }

    #[test]
    fn corrupt_model_is_unavailable_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("disease_model.onnx");
        std::fs::write(&model_path, b"not an onnx graph").unwrap();
        match PortableGraph::load(&spec(&model_path, ScoreKind::Probability)) {
            Err(DetectError::BackendUnavailable(msg)) => assert!(msg.contains("ONNX load failed")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("model should not load"),
        }
    }

    #[test]
    fn session_output_is_read_as_top_class() {
        let dir = tempfile::tempdir().unwrap();
        let backend = load_graph(dir.path(), &[0.02, 0.81, 0.05, 0.04, 0.03, 0.05], ScoreKind::Probability);
        let prediction = backend.infer(ModelInput::Tensor(&leaf_tensor())).unwrap();
        assert_eq!(prediction.label, "Black Rot");
        assert_eq!(prediction.class_index, Some(1));
        assert!((prediction.confidence - 0.81).abs() < 1e-6);
    }

    #[test]
    fn session_logits_are_softmaxed() {
        let dir = tempfile::tempdir().unwrap();
        let backend = load_graph(dir.path(), &[5.0, 0.0, 0.0, 0.0, 0.0, 0.0], ScoreKind::Logits);
        let prediction = backend.infer(ModelInput::Tensor(&leaf_tensor())).unwrap();
        assert_eq!(prediction.label, "Healthy");
        assert!(prediction.confidence > 0.95 && prediction.confidence < 1.0);
    }

    #[test]
    fn wrong_layout_never_reaches_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let backend = load_graph(dir.path(), &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0], ScoreKind::Probability);
        let nchw = PreprocessedTensor::from_array(Array4::zeros((1, 3, 224, 224)));
        assert!(matches!(
            backend.infer(ModelInput::Tensor(&nchw)),
            Err(DetectError::ShapeMismatch { .. })
        ));
    }
}
