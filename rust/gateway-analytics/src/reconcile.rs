//! Write path: merges a gateway report into storage.
//!
//! A report is a full upsert-merge, not a patch. Every scalar on the incoming
//! gateway and performance metric overwrites the stored value. Services and
//! disks are upserted by natural key and never pruned. Latest events are
//! replaced wholesale whenever the report carries the collection.

use crate::{
    error::{Result, ServiceError},
    models::{
        DiskReport, DiskRow, GatewayReport, GatewayRow, LatestEventReport, NewLatestEvent,
        PerformanceMetricReport, PerformanceMetricRow, ServiceReport, ServiceRow,
    },
    store::{ReportWriter, TelemetryStore},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of a save, as reported back to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveResult {
    Success,
    Rejected,
    Failure,
}

impl SaveResult {
    pub fn from_outcome(outcome: &Result<()>) -> Self {
        match outcome {
            Ok(()) => SaveResult::Success,
            Err(ServiceError::InvalidRequest(_)) => SaveResult::Rejected,
            Err(_) => SaveResult::Failure,
        }
    }
}

#[derive(Clone)]
pub struct TelemetryReconciler {
    store: Arc<dyn TelemetryStore>,
}

impl TelemetryReconciler {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    /// Validates and persists `report`, stamping it with the server clock.
    ///
    /// Returns `InvalidRequest` without touching storage when the gateway id
    /// is nil. Storage failures roll the whole write back; retrying is left to
    /// the caller.
    pub async fn save_gateway(&self, report: &GatewayReport) -> Result<()> {
        validate(report)?;

        let received_at = Utc::now();
        match self.store.write_report(report, received_at).await {
            Ok(()) => {
                info!(gateway_id = %report.gateway_id, "gateway report saved");
                Ok(())
            }
            Err(err) => {
                warn!(gateway_id = %report.gateway_id, error = %err, "gateway report discarded");
                Err(err)
            }
        }
    }
}

fn validate(report: &GatewayReport) -> Result<()> {
    if report.gateway_id.is_nil() {
        debug!("rejecting gateway report without an identifier");
        return Err(ServiceError::InvalidRequest(
            "gateway_id must not be empty".into(),
        ));
    }
    Ok(())
}

/// Applies `report` through `writer`. Callers own the surrounding unit of work.
pub(crate) async fn apply_report<W>(
    writer: &mut W,
    report: &GatewayReport,
    received_at: DateTime<Utc>,
) -> Result<()>
where
    W: ReportWriter + ?Sized,
{
    let gateway_id = report.gateway_id;

    let mut gateway = writer.find_or_create_gateway(gateway_id).await?;
    overwrite_gateway(&mut gateway.record, report, received_at);
    writer.store_gateway(gateway).await?;

    if let Some(metric) = &report.performance_metric {
        let mut row = writer.find_or_create_performance_metric(gateway_id).await?;
        overwrite_performance_metric(&mut row.record, gateway_id, metric);
        writer.store_performance_metric(row).await?;
    }

    if let Some(services) = &report.services {
        for service in services {
            let mut row = writer
                .find_or_create_service(gateway_id, &service.service_name)
                .await?;
            overwrite_service(&mut row.record, gateway_id, service);
            writer.store_service(row).await?;
        }
    }

    if let Some(disks) = &report.disks {
        for disk in disks {
            let mut row = writer.find_or_create_disk(gateway_id, &disk.label).await?;
            overwrite_disk(&mut row.record, gateway_id, disk);
            writer.store_disk(row).await?;
        }
    }

    if let Some(events) = &report.latest_events {
        let events = events
            .iter()
            .map(|event| new_latest_event(gateway_id, event))
            .collect();
        writer.replace_latest_events(gateway_id, events).await?;
    }

    Ok(())
}

fn overwrite_gateway(row: &mut GatewayRow, report: &GatewayReport, received_at: DateTime<Utc>) {
    row.gateway_id = report.gateway_id;
    row.machine_name = report.machine_name.clone();
    row.remote_access_id = report.remote_access_id.clone();
    row.running_since = report.running_since;
    row.operating_system = report.operating_system.clone();
    row.cpu_info = report.cpu_info.clone();
    row.memory_size = report.memory_size;
    row.latitude = report.latitude;
    row.longitude = report.longitude;
    row.location_date = report.location_date;
    row.last_report_date = received_at;
}

fn overwrite_performance_metric(
    row: &mut PerformanceMetricRow,
    gateway_id: Uuid,
    metric: &PerformanceMetricReport,
) {
    row.gateway_id = gateway_id;
    row.total_events_processed = metric.total_events_processed;
    row.events_processed_per_sec = metric.events_processed_per_sec;
    row.current_signal_quality = metric.current_signal_quality;
    row.average_signal_quality = metric.average_signal_quality;
    row.reliability = metric.reliability;
    row.stability = metric.stability;
    row.latency = metric.latency;
    row.connected_nodes = metric.connected_nodes;
}

fn overwrite_service(row: &mut ServiceRow, gateway_id: Uuid, service: &ServiceReport) {
    row.gateway_id = gateway_id;
    row.service_name = service.service_name.clone();
    row.status = service.status.clone();
}

fn overwrite_disk(row: &mut DiskRow, gateway_id: Uuid, disk: &DiskReport) {
    row.gateway_id = gateway_id;
    row.label = disk.label.clone();
    row.total_space = disk.total_space;
    row.used_space = disk.used_space;
}

fn new_latest_event(gateway_id: Uuid, event: &LatestEventReport) -> NewLatestEvent {
    NewLatestEvent {
        gateway_id,
        event_date_utc: event.event_date_utc,
        asset_name: event.asset_name.clone(),
        event_name: event.event_name.clone(),
        event_info: event.event_info.clone(),
    }
}
