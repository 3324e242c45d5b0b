pub mod config;
pub mod hosted;
pub mod model;
pub mod onnx;
pub mod preprocess;
pub mod taxonomy;
pub mod tflite;

use shared::{BackendInfo, DiseaseCategory};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::storage::upload::{self, TransientUpload, UploadError, UploadedImage};
use config::DetectorConfig;
use model::{InferenceBackend, InputKind, ModelInput, RawPrediction};
use taxonomy::{Taxonomy, to_percent};

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("{0}")]
    MissingInput(String),
    #[error("Image exceeds the {limit} byte upload limit")]
    PayloadTooLarge { limit: usize },
    #[error("Could not decode image: {0}")]
    DecodeError(String),
    #[error("Tensor shape {actual:?} does not match expected {expected:?}")]
    ShapeMismatch {
        actual: Vec<usize>,
        expected: Vec<usize>,
    },
    #[error("Inference backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Model inference error: {0}")]
    InferenceError(String),
    #[error("Upload storage error: {0}")]
    Io(String),
}

impl From<UploadError> for DetectError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::TooLarge { limit } => DetectError::PayloadTooLarge { limit },
            other => DetectError::Io(other.to_string()),
        }
    }
}

/// Outcome returned to the caller. `confidence` is on the 0..100 scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanonicalDiagnosis {
    pub category: DiseaseCategory,
    pub confidence: f32,
    pub is_leaf: bool,
}

/// Process-wide pipeline: one loaded backend plus the gating policy.
#[derive(Clone)]
pub struct DiseaseDetector {
    backend: Arc<dyn InferenceBackend>,
    taxonomy: Taxonomy,
    upload_dir: PathBuf,
    max_upload_bytes: usize,
}

impl DiseaseDetector {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        taxonomy: Taxonomy,
        upload_dir: PathBuf,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            backend,
            taxonomy,
            upload_dir,
            max_upload_bytes,
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Result<Self, DetectError> {
        let backend = model::load_backend(config)?;
        Ok(Self::new(
            backend,
            Taxonomy::new(config.taxonomy_order, config.confidence_threshold),
            config.upload.dir(),
            config.upload.max_bytes,
        ))
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn info(&self) -> BackendInfo {
        let normalization = match self.backend.input_kind() {
            InputKind::Image => None,
            InputKind::Tensor(spec) => Some(spec.normalization.as_str().to_string()),
        };
        BackendInfo {
            backend: self.backend.name().to_string(),
            normalization,
            confidence_threshold: self.taxonomy.threshold(),
            taxonomy_order: self.taxonomy.order().as_str().to_string(),
        }
    }

    /// Runs the whole pipeline for one upload. Blocking.
    pub fn detect(&self, image: &UploadedImage) -> Result<CanonicalDiagnosis, DetectError> {
        upload::validate_image_size(&image.bytes, self.max_upload_bytes)?;

        let fingerprint = upload::fingerprint(&image.bytes);
        let artifact = TransientUpload::persist(&self.upload_dir, image)?;
        log::info!(
            "Classifying {} ({} bytes, sha256 {}) with {}",
            image.file_name,
            image.bytes.len(),
            &fingerprint[..12],
            self.backend.name()
        );

        let raw = self.classify(artifact.path())?;
        log::debug!(
            "Raw prediction for {}: {:?} (class {:?}) at {:.4}",
            &fingerprint[..12],
            raw.label,
            raw.class_index,
            raw.confidence
        );

        let diagnosis = self.evaluate(&raw);
        if diagnosis.is_leaf {
            log::info!(
                "Accepted {}: {} at {:.2}%",
                &fingerprint[..12],
                diagnosis.category,
                diagnosis.confidence
            );
        } else {
            log::info!(
                "Rejected {}: {} at {:.2}% is not a reliable leaf diagnosis",
                &fingerprint[..12],
                diagnosis.category,
                diagnosis.confidence
            );
        }
        Ok(diagnosis)
    }

    fn classify(&self, path: &Path) -> Result<RawPrediction, DetectError> {
        match self.backend.input_kind() {
            InputKind::Image => {
                let image = preprocess::decode_image(path)?;
                self.backend.infer(ModelInput::Image(&image))
            }
            InputKind::Tensor(spec) => {
                let tensor = preprocess::preprocess(path, &spec)?;
                self.backend.infer(ModelInput::Tensor(&tensor))
            }
        }
    }

    pub fn evaluate(&self, raw: &RawPrediction) -> CanonicalDiagnosis {
        let category = self.taxonomy.normalize_label(&raw.label);
        // Gate on the unrounded score; rounding is for reporting only.
        let is_leaf = self.taxonomy.is_accepted(category, raw.confidence * 100.0);
        CanonicalDiagnosis {
            category,
            confidence: to_percent(raw.confidence),
            is_leaf,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use super::preprocess::{ChannelOrder, Normalization, TensorSpec};

    /// Classifies by the dominant mean channel of the tensor.
    pub(crate) struct ScriptedBackend;

    pub(crate) const SCRIPTED_INPUT: TensorSpec = TensorSpec {
        normalization: Normalization::Identity,
        channel_order: ChannelOrder::Rgb,
    };

    impl InferenceBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn input_kind(&self) -> InputKind {
            InputKind::Tensor(SCRIPTED_INPUT)
        }

        fn infer(&self, input: ModelInput<'_>) -> Result<RawPrediction, DetectError> {
            let tensor = model::expect_tensor(self.name(), input)?;
            let view = tensor.view();
            let mut sums = [0f64; 3];
            for ((_, _, _, c), value) in view.indexed_iter() {
                sums[c] += *value as f64;
            }
            let (label, confidence) = match (sums[0], sums[1], sums[2]) {
                (r, g, b) if g > r && g > b => ("Tomato___healthy", 0.93),
                (r, g, b) if r > g && r > b => ("Corn_Rust", 0.72),
                (r, g, b) if b > r && b > g => ("random_object", 0.99),
                _ => ("Apple___Black_rot", 0.55),
            };
            Ok(RawPrediction {
                label: label.to_string(),
                class_index: None,
                confidence,
            })
        }
    }

    pub(crate) struct FailingBackend;

    impl InferenceBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn input_kind(&self) -> InputKind {
            InputKind::Tensor(SCRIPTED_INPUT)
        }

        fn infer(&self, _input: ModelInput<'_>) -> Result<RawPrediction, DetectError> {
            Err(DetectError::InferenceError("graph execution aborted".into()))
        }
    }

    pub(crate) fn detector(backend: Arc<dyn InferenceBackend>, dir: &Path) -> DiseaseDetector {
        DiseaseDetector::new(backend, Taxonomy::default(), dir.to_path_buf(), 1024 * 1024)
    }

    pub(crate) fn png(color: [u8; 3]) -> Vec<u8> {
        let image = image::RgbImage::from_pixel(64, 48, image::Rgb(color));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    pub(crate) fn upload(color: [u8; 3]) -> UploadedImage {
        UploadedImage {
            file_name: "leaf.png".into(),
            content_type: Some("image/png".into()),
            bytes: png(color),
        }
    }
}
