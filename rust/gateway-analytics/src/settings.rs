use crate::{error::Result, models::AnalyticsConfigRow, store::TelemetryStore};
use std::sync::Arc;
use tracing::error;

/// Read-only access to the global analytics settings row.
#[derive(Clone)]
pub struct SettingsLookup {
    store: Arc<dyn TelemetryStore>,
}

impl SettingsLookup {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    pub async fn find_settings(&self) -> Result<Option<AnalyticsConfigRow>> {
        self.store.find_settings().await.inspect_err(|err| {
            error!(error = %err, "failed to load analytics settings");
        })
    }
}
