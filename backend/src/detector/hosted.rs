use image::{DynamicImage, ImageFormat};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;

use super::DetectError;
use super::config::HostedSpec;
use super::model::{InferenceBackend, InputKind, ModelInput, RawPrediction};

/// Image classifier hosted behind an inference API. The remote processor does
/// its own resizing and normalization, so it receives the decoded image.
pub struct HostedClassifier {
    client: Client,
    url: String,
    api_token: String,
}

#[derive(Debug, Deserialize)]
struct HostedLabel {
    label: String,
    score: f32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HostedReply {
    Labels(Vec<HostedLabel>),
    Failure { error: String },
}

impl HostedClassifier {
    pub fn new(spec: &HostedSpec) -> Result<Self, DetectError> {
        let api_token = spec.api_token.clone().ok_or_else(|| {
            DetectError::BackendUnavailable("HF_API_TOKEN is not set for the hosted classifier".into())
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(spec.timeout_secs))
            .build()
            .map_err(|e| DetectError::BackendUnavailable(format!("HTTP client: {}", e)))?;

        let url = model_url(&spec.endpoint, &spec.model_id);
        log::info!("Hosted classifier configured at {}", url);

        Ok(Self {
            client,
            url,
            api_token,
        })
    }

    fn classify(&self, image: &DynamicImage) -> Result<RawPrediction, DetectError> {
        let mut body = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut body), ImageFormat::Png)
            .map_err(|e| DetectError::InferenceError(format!("PNG encoding failed: {}", e)))?;

        let response = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_token))
            .header(CONTENT_TYPE, "image/png")
            .body(body)
            .send()
            .map_err(|e| DetectError::InferenceError(format!("hosted request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| DetectError::InferenceError(format!("hosted response unreadable: {}", e)))?;

        if !status.is_success() {
            return Err(DetectError::InferenceError(format!(
                "hosted classifier returned {}: {}",
                status, text
            )));
        }

        parse_reply(&text)
    }
}

impl InferenceBackend for HostedClassifier {
    fn name(&self) -> &'static str {
        "hosted_classifier"
    }

    fn input_kind(&self) -> InputKind {
        InputKind::Image
    }

    fn infer(&self, input: ModelInput<'_>) -> Result<RawPrediction, DetectError> {
        match input {
            ModelInput::Image(image) => self.classify(image),
            ModelInput::Tensor(_) => Err(DetectError::InferenceError(
                "hosted classifier expects the decoded image, not a tensor".into(),
            )),
        }
    }
}

fn model_url(endpoint: &str, model_id: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), model_id.trim_start_matches('/'))
}

fn parse_reply(body: &str) -> Result<RawPrediction, DetectError> {
    let reply: HostedReply = serde_json::from_str(body)
        .map_err(|e| DetectError::InferenceError(format!("unexpected hosted reply: {}", e)))?;

    let labels = match reply {
        HostedReply::Labels(labels) => labels,
        HostedReply::Failure { error } => {
            return Err(DetectError::InferenceError(format!("hosted classifier: {}", error)));
        }
    };

    let best = labels
        .into_iter()
        .filter(|l| !l.score.is_nan())
        .max_by(|a, b| a.score.total_cmp(&b.score))
        .ok_or_else(|| DetectError::InferenceError("hosted classifier returned no labels".into()))?;

    Ok(RawPrediction {
        label: best.label,
        class_index: None,
        confidence: best.score.clamp(0.0, 1.0),
    })
}
