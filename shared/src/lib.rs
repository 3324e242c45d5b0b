use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Canonical disease categories exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum DiseaseCategory {
    #[strum(serialize = "Healthy")]
    #[serde(rename = "Healthy")]
    Healthy,
    #[strum(serialize = "Black Rot")]
    #[serde(rename = "Black Rot")]
    BlackRot,
    #[strum(serialize = "Leaf Blight")]
    #[serde(rename = "Leaf Blight")]
    LeafBlight,
    #[strum(serialize = "Rust")]
    #[serde(rename = "Rust")]
    Rust,
    #[strum(serialize = "Mosaic")]
    #[serde(rename = "Mosaic")]
    Mosaic,
    #[strum(serialize = "Late Blight")]
    #[serde(rename = "Late Blight")]
    LateBlight,
    #[strum(serialize = "Unknown")]
    #[serde(rename = "Unknown")]
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Envelope shared by every endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub status: ResponseStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
            data: None,
        }
    }
}

/// Payload of `/api/disease-detect`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum DetectionData {
    Leaf {
        is_leaf: bool,
        disease: DiseaseCategory,
        confidence: f32,
    },
    NotLeaf {
        is_leaf: bool,
        message: String,
    },
}

impl DetectionData {
    pub fn leaf(disease: DiseaseCategory, confidence: f32) -> Self {
        DetectionData::Leaf {
            is_leaf: true,
            disease,
            confidence,
        }
    }

    pub fn not_leaf(message: impl Into<String>) -> Self {
        DetectionData::NotLeaf {
            is_leaf: false,
            message: message.into(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, DetectionData::Leaf { .. })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BackendInfo {
    pub backend: String,
    pub normalization: Option<String>,
    pub confidence_threshold: f32,
    pub taxonomy_order: String,
}
