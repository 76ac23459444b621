use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use kimichat_core::config::{self, ModelConfig, ModelOverrides};
use kimichat_core::provider::{ChatClient, ProviderError};

mod envelope;
pub mod prompts;
mod routes;
mod server;
mod sse;

pub const DEFAULT_ADDR: &str = "0.0.0.0:3001";
const ENV_SERVICE_ADDR: &str = "KIMICHAT_SERVICE_ADDR";

const PROVIDER_CONNECT_TIMEOUT_SECS: u64 = 15;

pub fn service_addr_from_env() -> String {
    std::env::var(ENV_SERVICE_ADDR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string())
}

/// Per-process immutable state shared by all request handlers.
///
/// Nothing here is mutated after startup; each request works on its own
/// merged config copy, so no state crosses requests.
#[derive(Clone)]
pub struct AppState {
    http: reqwest::Client,
    config: ModelConfig,
    api_key: Option<String>,
}

impl AppState {
    pub fn new(config: ModelConfig, api_key: Option<String>) -> Self {
        Self {
            http: build_provider_client(),
            config,
            api_key,
        }
    }

    pub fn from_env() -> Self {
        Self::new(ModelConfig::from_env(), config::api_key_from_env())
    }

    pub(crate) fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub(crate) fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Builds a provider client for one request, with the caller's
    /// overrides merged over the service config.
    pub(crate) fn chat_client(
        &self,
        overrides: &ModelOverrides,
    ) -> Result<ChatClient, ProviderError> {
        let api_key = self.api_key.clone().ok_or(ProviderError::MissingApiKey)?;
        Ok(ChatClient::new(
            self.http.clone(),
            self.config.merged(overrides),
            api_key,
        ))
    }
}

fn build_provider_client() -> reqwest::Client {
    // 中文注释：不设总超时，长时流式补全会被客户端层误判超时中断；连接阶段单独限时。
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(PROVIDER_CONNECT_TIMEOUT_SECS))
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(30)))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/ai/chat", post(routes::chat::chat))
        .route(
            "/api/ai/analyze-multi-images",
            post(routes::images::analyze_multi_images)
                .layer(DefaultBodyLimit::max(routes::images::UPLOAD_BODY_LIMIT_BYTES)),
        )
        .route("/api/health", get(routes::system::health))
        .route("/api/model/config", get(routes::system::model_config))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(addr: &str) -> std::io::Result<()> {
    let state = AppState::from_env();
    if state.api_key.is_none() {
        log::warn!(
            "event=config_invalid msg=\"no provider api key\" hint=\"set {}\"",
            config::ENV_API_KEY
        );
    }
    server::run(addr, router(state))
}
