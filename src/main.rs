//! docsense - document classification, field extraction and rule-based decisions.

mod classifier;
mod config;
mod decision;
mod extractor;
mod ocr;
mod overlay;
mod pdf;
mod pipeline;
mod raster;
mod schema;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use config::AppConfig;
use ocr::tesseract::TesseractOcr;
use ocr::{DocumentReader, TextSource};
use overlay::Overlay;
use pipeline::{Pipeline, RawDocument};
use raster::PageRasterizer;
use schema::ResultRecord;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// How often expired explainability images are swept.
const ARTIFACT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    reader: Arc<DocumentReader>,
    upload_dir: Arc<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "docsense=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let rules = config.rules()?;
    info!(
        "Loaded {} document classes, {} skills",
        rules.classes.len(),
        rules.skills.len()
    );

    for dir in [&config.output_dir, &config.upload_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {:?}", dir))?;
    }

    let rasterizer = PageRasterizer::new(config.pdfium_library.clone());
    if !rasterizer.is_available() {
        warn!("PDFium not loadable; PDF overlays will use embedded page images");
    }

    let overlay =
        Overlay::new(&config.output_dir, config.overlay_font.as_deref()).with_rasterizer(rasterizer);
    let pipeline = Arc::new(Pipeline::new(&rules, overlay)?);

    let ocr = TesseractOcr::new(config.tesseract.clone());
    if !ocr.is_available() {
        warn!(
            "Tesseract not runnable at {:?}; scanned uploads will produce empty text",
            config.tesseract.command
        );
    }

    let reader = DocumentReader::new(ocr);
    info!("Text source: {}", reader.name());

    match config.artifact_ttl {
        Some(ttl) => spawn_artifact_cleanup(pipeline.clone(), ttl),
        None => info!("Artifact retention disabled, explainability images are kept"),
    }

    let state = AppState {
        pipeline,
        reader: Arc::new(reader),
        upload_dir: Arc::new(config.upload_dir.clone()),
    };
    let app = router(state, &config.output_dir, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState, output_dir: &Path, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/analyze_document", post(analyze_document))
        .route("/analyze_document/", post(analyze_document))
        .nest_service("/outputs", ServeDir::new(output_dir))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Periodically delete explainability images older than `ttl`.
fn spawn_artifact_cleanup(pipeline: Arc<Pipeline>, ttl: Duration) {
    info!("Explainability images are kept for {:?}", ttl);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ARTIFACT_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let pipeline = pipeline.clone();
            match tokio::task::spawn_blocking(move || pipeline.overlay().prune(ttl)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Artifact cleanup failed: {}", e),
                Err(e) => error!("Artifact cleanup task failed: {}", e),
            }
        }
    });
}

// ============================================================================
// Handlers
// ============================================================================

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Document Understanding API is running" }))
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Upload a document and run the full pipeline on it.
async fn analyze_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ResultRecord>, (StatusCode, String)> {
    let mut filename = String::new();
    let mut file_data = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("document").to_string();
            file_data = field.bytes().await.map_err(|e| {
                (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
            })?.to_vec();
            break;
        }
    }

    if file_data.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()));
    }

    info!("Received file: {} ({} bytes)", filename, file_data.len());

    let upload_path = state.upload_dir.join(format!(
        "{}_{}",
        Uuid::new_v4().simple(),
        sanitize_filename(&filename)
    ));
    tokio::fs::write(&upload_path, &file_data).await.map_err(|e| {
        error!("Failed to store upload {:?}: {}", upload_path, e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to store upload".to_string())
    })?;

    let worker = state.clone();
    let path = upload_path.clone();
    let record = tokio::task::spawn_blocking(move || process_upload(&worker, &path))
        .await
        .map_err(|e| {
            error!("Pipeline task failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Processing failed: {}", e))
        })?;

    if let Err(e) = tokio::fs::remove_file(&upload_path).await {
        warn!("Failed to remove upload {:?}: {}", upload_path, e);
    }

    Ok(Json(record))
}

// ============================================================================
// Helper functions
// ============================================================================

/// Read the upload's text and run the pipeline. Text extraction failures
/// degrade to empty text so a record is always produced.
fn process_upload(state: &AppState, path: &Path) -> ResultRecord {
    let text = state.reader.extract(path).unwrap_or_else(|e| {
        warn!("Text extraction failed for {:?}: {}", path, e);
        String::new()
    });

    state.pipeline.run(&RawDocument::new(&text, Some(path)))
}

/// Keep only the final path component, with unsafe characters replaced.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}
