use actix_multipart::Multipart;
use actix_web::{HttpResponse, http::StatusCode, web};
use futures::{StreamExt, TryStreamExt};
use log::{error, warn};
use serde_json::json;
use shared::{ApiResponse, DetectionData};

use crate::detector::{CanonicalDiagnosis, DetectError, DiseaseDetector};
use crate::storage::upload::{UploadedImage, validate_image_size};

const UPLOAD_FIELD: &str = "file";

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::scope("/api").configure(detection_routes))
        .configure(detection_routes);
}

fn detection_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/disease-detect").route(web::post().to(detect_disease)))
        .service(web::resource("/disease-detect/info").route(web::get().to(backend_info)));
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "AgroSense AI Backend Running" }))
}

async fn backend_info(detector: web::Data<DiseaseDetector>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success("Detector ready", detector.info()))
}

async fn detect_disease(detector: web::Data<DiseaseDetector>, payload: Multipart) -> HttpResponse {
    let image = match read_upload(payload, detector.max_upload_bytes()).await {
        Ok(image) => image,
        Err(e) => return error_response(&e),
    };

    let pipeline = detector.clone();
    match web::block(move || pipeline.detect(&image)).await {
        Ok(Ok(diagnosis)) => HttpResponse::Ok().json(diagnosis_response(diagnosis)),
        Ok(Err(e)) => error_response(&e),
        Err(e) => {
            error!("Detection worker failed: {}", e);
            HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Detection worker failed"))
        }
    }
}

/// Pulls the `file` field out of the form. Other fields are skipped.
async fn read_upload(mut payload: Multipart, limit: usize) -> Result<UploadedImage, DetectError> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| DetectError::MissingInput(format!("Malformed upload: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or_default()
            .to_string();
        if file_name.is_empty() {
            return Err(DetectError::MissingInput("No image selected".into()));
        }
        let content_type = field.content_type().map(|mime| mime.essence_str().to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let data =
                chunk.map_err(|e| DetectError::MissingInput(format!("Malformed upload: {}", e)))?;
            bytes.extend_from_slice(&data);
            validate_image_size(&bytes, limit)?;
        }
        if bytes.is_empty() {
            return Err(DetectError::MissingInput("Image file is empty".into()));
        }

        return Ok(UploadedImage {
            file_name,
            content_type,
            bytes,
        });
    }

    Err(DetectError::MissingInput("Image file missing".into()))
}

fn diagnosis_response(diagnosis: CanonicalDiagnosis) -> ApiResponse<DetectionData> {
    if diagnosis.is_leaf {
        ApiResponse::success(
            "Prediction Successful",
            DetectionData::leaf(diagnosis.category, diagnosis.confidence),
        )
    } else {
        ApiResponse::success(
            "Not a valid leaf image",
            DetectionData::not_leaf("Please upload a clear image of a plant leaf"),
        )
    }
}

fn status_for(err: &DetectError) -> StatusCode {
    match err {
        DetectError::MissingInput(_) => StatusCode::BAD_REQUEST,
        DetectError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        DetectError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DetectError::DecodeError(_)
        | DetectError::ShapeMismatch { .. }
        | DetectError::InferenceError(_)
        | DetectError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &DetectError) -> HttpResponse {
    let status = status_for(err);
    if status.is_client_error() {
        warn!("Rejected upload: {}", err);
    } else {
        error!("Disease detection failed: {}", err);
    }
    HttpResponse::build(status).json(ApiResponse::<()>::error(err.to_string()))
}
