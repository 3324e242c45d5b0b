use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::preprocess::TensorSpec;
use super::taxonomy::{CONFIDENCE_THRESHOLD, TaxonomyOrder};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Unknown backend '{0}', expected hosted_classifier, portable_graph or quantized_interpreter")]
    UnknownBackend(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    HostedClassifier,
    PortableGraph,
    QuantizedInterpreter,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::HostedClassifier => "hosted_classifier",
            BackendKind::PortableGraph => "portable_graph",
            BackendKind::QuantizedInterpreter => "quantized_interpreter",
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "hosted_classifier" | "hosted" => Ok(BackendKind::HostedClassifier),
            "portable_graph" | "onnx" => Ok(BackendKind::PortableGraph),
            "quantized_interpreter" | "tflite" => Ok(BackendKind::QuantizedInterpreter),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    /// The graph ends in a softmax; the arg-max score is used as is.
    #[default]
    Probability,
    /// Raw logits; softmax is applied before taking the confidence.
    Logits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub version: f32,
    pub backend: BackendKind,
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f32,
    #[serde(default)]
    pub taxonomy_order: TaxonomyOrder,
    #[serde(default)]
    pub upload: UploadConfig,
    pub backends: Backends,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Defaults to the system temp directory.
    pub dir: Option<PathBuf>,
    pub max_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl UploadConfig {
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backends {
    pub hosted_classifier: HostedSpec,
    pub portable_graph: GraphSpec,
    pub quantized_interpreter: GraphSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedSpec {
    pub endpoint: String,
    pub model_id: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Only ever read from the environment.
    #[serde(skip)]
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSpec {
    pub model_path: PathBuf,
    pub labels: Vec<String>,
    pub input: TensorSpec,
    #[serde(default)]
    pub scores: ScoreKind,
}

fn default_threshold() -> f32 {
    CONFIDENCE_THRESHOLD
}

fn default_timeout() -> u64 {
    30
}

impl DetectorConfig {
    /// Reads `$DETECTOR_CONFIG`, falling back to `config/detector.yaml` next to
    /// the workspace, then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = match std::env::var("DETECTOR_CONFIG") {
            Ok(path) => PathBuf::from(path),
            Err(_) => match std::env::var("CARGO_MANIFEST_DIR") {
                Ok(manifest_dir) => Path::new(&manifest_dir).join("../config/detector.yaml"),
                Err(_) => PathBuf::from("config/detector.yaml"),
            },
        };
        let mut config = Self::from_file(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_yaml_str(&config_str, base_dir)
    }

    /// Relative model paths are resolved against `base_dir`.
    pub fn from_yaml_str(config_str: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut config: DetectorConfig = serde_yaml::from_str(config_str)?;
        for spec in [
            &mut config.backends.portable_graph,
            &mut config.backends.quantized_interpreter,
        ] {
            if spec.model_path.is_relative() {
                spec.model_path = base_dir.join(&spec.model_path);
            }
        }
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("DETECTOR_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(token) = lookup("HF_API_TOKEN").filter(|t| !t.is_empty()) {
            self.backends.hosted_classifier.api_token = Some(token);
        }
        if let Some(dir) = lookup("UPLOAD_DIR") {
            self.upload.dir = Some(PathBuf::from(dir));
        }
        if let Some(max_bytes) = lookup("MAX_UPLOAD_BYTES") {
            self.upload.max_bytes = max_bytes
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("MAX_UPLOAD_BYTES={}", max_bytes)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence_threshold {} is outside 0..=100",
                self.confidence_threshold
            )));
        }
        if self.upload.max_bytes == 0 {
            return Err(ConfigError::Invalid("upload.max_bytes must be positive".into()));
        }
        let labels = match self.backend {
            BackendKind::HostedClassifier => return Ok(()),
            BackendKind::PortableGraph => &self.backends.portable_graph.labels,
            BackendKind::QuantizedInterpreter => &self.backends.quantized_interpreter.labels,
        };
        if labels.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{} needs a non-empty label list",
                self.backend.as_str()
            )));
        }
        Ok(())
    }
}
