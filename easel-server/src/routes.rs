use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use easel_core::{
    encode_data_url, params, Error, GenerationDefaults, InferenceInvoker, LifecycleStatus,
    OutputFormat, RawGenerationParams,
};
use serde::Serialize;
use serde_json::json;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

use crate::error::ApiResult;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub invoker: InferenceInvoker,
    pub defaults: GenerationDefaults,
    pub output_format: OutputFormat,
}

#[derive(Serialize, Debug)]
struct GenerationParameters {
    steps: usize,
    guidance: f64,
    height: usize,
    width: usize,
    seed: Option<u64>,
}

#[derive(Serialize, Debug)]
struct GenerationResponse {
    success: bool,
    image: String,
    prompt: String,
    parameters: GenerationParameters,
}

pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/generate", post(generate_image_handler))
        .fallback(not_found)
        .with_state(Arc::new(state))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        )
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Endpoint not found" })))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.invoker.lifecycle().status() {
        LifecycleStatus::Ready(model) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "pipeline_loaded": true,
                "model": { "model_id": model.model_id, "variant": model.variant },
                "device_info": model.device_info,
            })),
        ),
        LifecycleStatus::Failed(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy", "pipeline_loaded": false, "error": error })),
        ),
        LifecycleStatus::Loading => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "loading", "pipeline_loaded": false, "error": null })),
        ),
        LifecycleStatus::Uninitialized => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "uninitialized", "pipeline_loaded": false, "error": null })),
        ),
    }
}

async fn generate_image_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RawGenerationParams>, JsonRejection>,
) -> ApiResult<Json<GenerationResponse>> {
    // Nothing is parsed or queued until a model is ready.
    state.invoker.lifecycle().model()?;

    let Json(raw) = payload.map_err(|rejection| {
        Error::Validation(format!("No valid JSON data provided: {}", rejection.body_text()))
    })?;
    let request = params::validate(&raw, &state.defaults)?;

    let image = state.invoker.generate(request.clone()).await?;
    let image = encode_data_url(&image, state.output_format)?;
    info!("image generation successful");

    Ok(Json(GenerationResponse {
        success: true,
        image,
        prompt: request.prompt,
        parameters: GenerationParameters {
            steps: request.steps,
            guidance: request.guidance_scale,
            height: request.height,
            width: request.width,
            seed: request.seed,
        },
    }))
}
