mod detector;
mod routes;
mod storage;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use detector::DiseaseDetector;
use detector::config::DetectorConfig;
use routes::configure_routes;
use std::env;

fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = DetectorConfig::load().map_err(|e| {
        log::error!("Failed to load detector configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    // Loaded before the runtime starts: the hosted backend owns a blocking
    // HTTP client that must not be created or dropped on an async worker.
    let detector = DiseaseDetector::from_config(&config).map_err(|e| {
        log::error!("Failed to load inference backend at startup: {}", e);
        std::io::Error::other(format!("Model loading failed: {}", e))
    })?;

    std::fs::create_dir_all(detector.upload_dir())?;
    log::info!(
        "Backend {} active, threshold {}%, taxonomy order {}, uploads in {}",
        config.backend.as_str(),
        config.confidence_threshold,
        config.taxonomy_order.as_str(),
        detector.upload_dir().display()
    );

    let port = env::var("PORT").unwrap_or_else(|_| "5000".to_string());
    let bind_address = format!("0.0.0.0:{}", port);

    let detector = web::Data::new(detector);
    let app_detector = detector.clone();

    actix_web::rt::System::new().block_on(async move {
        log::info!("Starting server on {}", bind_address);

        HttpServer::new(move || {
            App::new()
                .wrap(
                    Cors::default()
                        .allow_any_origin()
                        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                        .allowed_headers(vec![
                            actix_web::http::header::ACCEPT,
                            actix_web::http::header::CONTENT_TYPE,
                        ])
                        .max_age(3600),
                )
                .app_data(app_detector.clone())
                .configure(configure_routes)
        })
        .bind(&bind_address)?
        .run()
        .await
    })
}
