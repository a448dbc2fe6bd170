use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::map_response,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::json;
use tracing::{error, info, warn};

mod config;
mod error;
mod extract;
mod models;

use config::Config;
use error::AppError;
use models::{ExtractionRequest, ExtractionResult, SuccessResponse};

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    client: reqwest::Client,
}

impl AppState {
    fn new(config: Config) -> Result<Self, extract::ExtractionError> {
        Ok(Self {
            config: Arc::new(config),
            client: extract::build_client()?,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env()?;
    if let Err(e) = config.api_key() {
        warn!("{}; every extraction request will fail until it is set", e);
    }

    let state = AppState::new(config)?;
    let listener = tokio::net::TcpListener::bind(state.config.listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/process", any(process_endpoint))
        .layer(map_response(with_cors))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("shutting down");
}

async fn with_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn process_endpoint(State(state): State<AppState>, request: Request) -> Response {
    match request.method() {
        &Method::OPTIONS => return StatusCode::OK.into_response(),
        &Method::POST => {}
        other => {
            warn!(method = %other, "rejected method");
            return AppError::MethodNotAllowed.into_response();
        }
    }

    match process(&state, request).await {
        Ok(result) => {
            info!(?result, "final response");
            (StatusCode::OK, Json(SuccessResponse::new(result))).into_response()
        }
        Err(e) => {
            if let AppError::Processing(msg) = &e {
                error!(error = %msg, "processing failed");
            }
            e.into_response()
        }
    }
}

async fn process(state: &AppState, request: Request) -> Result<ExtractionResult, AppError> {
    info!("processing image");

    let body = axum::body::to_bytes(request.into_body(), state.config.max_body_bytes)
        .await
        .map_err(|e| AppError::Processing(format!("failed to read request body: {}", e)))?;
    let payload = parse_payload(&body)?;

    let image = match payload.image() {
        Some(image) => image,
        None => {
            error!("no image data in request");
            return Err(AppError::MissingPayload);
        }
    };

    let api_key = state.config.api_key()?;

    info!(image_len = image.len(), "image received");
    Ok(extract::extract_from_image(&state.client, &state.config, api_key, image).await?)
}

/// An empty body is treated like a body without an image.
fn parse_payload(body: &[u8]) -> Result<ExtractionRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ExtractionRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        error!(error = %e, "request body is not a JSON object");
        AppError::Processing("invalid request body".to_string())
    })
}
