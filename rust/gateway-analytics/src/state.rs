use crate::{
    reader::TelemetryReader, reconcile::TelemetryReconciler, settings::SettingsLookup,
    store::TelemetryStore,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub reader: TelemetryReader,
    pub reconciler: TelemetryReconciler,
    pub settings: SettingsLookup,
}

impl AppState {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self {
            reader: TelemetryReader::new(Arc::clone(&store)),
            reconciler: TelemetryReconciler::new(Arc::clone(&store)),
            settings: SettingsLookup::new(store),
        }
    }
}
