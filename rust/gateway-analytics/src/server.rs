use crate::{
    config::{AppConfig, StorageBackend},
    db,
    error::{Result, ServiceError},
    models::{AnalyticsConfigRow, GatewayDetail, GatewayReport, GatewayRow},
    reconcile::SaveResult,
    state::AppState,
    store::{MemoryTelemetryStore, PgTelemetryStore, TelemetryStore},
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Body returned for every save attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveResponse {
    pub result: SaveResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Server {
    config: AppConfig,
    state: AppState,
}

impl Server {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn TelemetryStore> = match config.storage {
            StorageBackend::Postgres => {
                let pool = db::connect_pool(&config).await?;
                if config.apply_schema {
                    db::apply_schema(&pool).await?;
                }
                Arc::new(PgTelemetryStore::new(pool))
            }
            StorageBackend::Memory => {
                warn!("using in-memory storage; telemetry is lost on restart");
                Arc::new(MemoryTelemetryStore::new())
            }
        };

        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: AppConfig, store: Arc<dyn TelemetryStore>) -> Self {
        let state = AppState::new(store);
        Self { config, state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(Self::health))
            .route(
                "/api/gateways",
                get(Self::list_gateways).post(Self::save_gateway),
            )
            .route("/api/gateways/:gateway_id", get(Self::get_gateway))
            .route("/api/settings", get(Self::settings))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, storage = ?self.config.storage, "gateway analytics listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    async fn health() -> Json<serde_json::Value> {
        Json(json!({ "status": "ok" }))
    }

    async fn list_gateways(State(state): State<AppState>) -> Result<Json<Vec<GatewayRow>>> {
        let rows = state.reader.list_gateways().await?;
        Ok(Json(rows))
    }

    async fn get_gateway(
        State(state): State<AppState>,
        Path(gateway_id): Path<Uuid>,
    ) -> Result<Json<GatewayDetail>> {
        state
            .reader
            .get_gateway(gateway_id)
            .await?
            .map(Json)
            .ok_or_else(|| ServiceError::NotFound(format!("gateway {gateway_id}")))
    }

    async fn save_gateway(
        State(state): State<AppState>,
        payload: std::result::Result<Json<GatewayReport>, JsonRejection>,
    ) -> (StatusCode, Json<SaveResponse>) {
        let report = match payload {
            Ok(Json(report)) => report,
            // An absent or unreadable report is rejected like one without an id.
            Err(rejection) => {
                let error = rejection.body_text();
                debug!(%error, "rejecting unreadable gateway report");
                let response = SaveResponse {
                    result: SaveResult::Rejected,
                    error: Some(error),
                };
                return (StatusCode::BAD_REQUEST, Json(response));
            }
        };

        let outcome = state.reconciler.save_gateway(&report).await;
        let result = SaveResult::from_outcome(&outcome);
        let (status, error) = match outcome {
            Ok(()) => (StatusCode::OK, None),
            Err(err) => (err.status(), Some(err.to_string())),
        };
        (status, Json(SaveResponse { result, error }))
    }

    async fn settings(State(state): State<AppState>) -> Result<Json<AnalyticsConfigRow>> {
        state
            .settings
            .find_settings()
            .await?
            .map(Json)
            .ok_or_else(|| ServiceError::NotFound("analytics settings".into()))
    }
}
