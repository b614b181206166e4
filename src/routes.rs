use crate::error::ScrapeError;
use crate::models::{ServiceInfo, SyncRequest, SyncResponse};
use crate::sync_service::SyncService;
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub sync_service: Arc<SyncService>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(|| async { "OK" }))
        .route("/sync", post(sync_handler))
        .layer(cors)
        .with_state(state)
}

async fn root_handler(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        status: "ok".to_string(),
        service: "instagram-sync".to_string(),
        source: state.sync_service.source_name().to_string(),
        proxies: state
            .sync_service
            .proxy_pool()
            .map(|pool| pool.len())
            .unwrap_or(0),
    })
}

async fn sync_handler(
    State(state): State<AppState>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, ScrapeError> {
    info!(
        "Sync requested for '{}' by caller {}",
        request.username, request.user_id
    );
    state.sync_service.sync(&request).await.map(Json)
}
