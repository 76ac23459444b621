use axum::body::Body;
use axum::extract::State;
use axum::http::{Response, StatusCode};
use serde::Serialize;

use kimichat_core::config::{validate_config, ConfigReport};

use crate::envelope::{json_body, json_success, now_rfc3339};
use crate::AppState;

#[derive(Serialize)]
struct HealthBody {
    success: bool,
    message: &'static str,
    timestamp: String,
}

/// `GET /api/health` — liveness probe.
pub(crate) async fn health() -> Response<Body> {
    json_body(
        StatusCode::OK,
        &HealthBody {
            success: true,
            message: "AI backend service is running",
            timestamp: now_rfc3339(),
        },
    )
}

#[derive(Serialize)]
struct FeatureFlags {
    streaming: bool,
    multimodal: bool,
    retry: bool,
}

#[derive(Serialize)]
struct ModelConfigData {
    validation: ConfigReport,
    features: FeatureFlags,
    timestamp: String,
}

/// `GET /api/model/config` — provider configuration report with the API
/// key reduced to a masked tail.
pub(crate) async fn model_config(State(state): State<AppState>) -> Response<Body> {
    let validation = validate_config(state.config(), state.api_key());
    json_success(ModelConfigData {
        validation,
        features: FeatureFlags {
            streaming: true,
            multimodal: true,
            retry: true,
        },
        timestamp: now_rfc3339(),
    })
}
