//! Read path for the dashboard.

use crate::{
    error::Result,
    models::{GatewayDetail, GatewayRow},
    store::TelemetryStore,
};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

#[derive(Clone)]
pub struct TelemetryReader {
    store: Arc<dyn TelemetryStore>,
}

impl TelemetryReader {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    /// Every gateway, shallow: related collections are not loaded.
    pub async fn list_gateways(&self) -> Result<Vec<GatewayRow>> {
        self.store.list_gateways().await.inspect_err(|err| {
            error!(error = %err, "failed to list gateways");
        })
    }

    /// One gateway with all related collections, or `None` when no row matches.
    pub async fn get_gateway(&self, gateway_id: Uuid) -> Result<Option<GatewayDetail>> {
        self.store.find_gateway(gateway_id).await.inspect_err(|err| {
            error!(%gateway_id, error = %err, "failed to load gateway");
        })
    }
}
