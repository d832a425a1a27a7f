use super::{ReportWriter, TelemetryStore, Tracked};
use crate::{
    error::Result,
    models::{
        AnalyticsConfigRow, DiskRow, GatewayDetail, GatewayReport, GatewayRow, LatestEventRow,
        NewLatestEvent, PerformanceMetricRow, ServiceRow,
    },
    reconcile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel_async::scoped_futures::{ScopedBoxFuture, ScopedFutureExt};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct Tables {
    gateways: BTreeMap<Uuid, GatewayRow>,
    performance_metrics: BTreeMap<Uuid, PerformanceMetricRow>,
    services: BTreeMap<(Uuid, String), ServiceRow>,
    disks: BTreeMap<(Uuid, String), DiskRow>,
    latest_events: Vec<LatestEventRow>,
    next_event_id: i64,
    settings: Vec<AnalyticsConfigRow>,
}

/// In-process telemetry store with the same unit-of-work semantics as the
/// Postgres backend: writes stage a copy of the tables and only replace the
/// live copy when every step succeeds.
#[derive(Debug, Default)]
pub struct MemoryTelemetryStore {
    tables: Mutex<Tables>,
    commits: AtomicU64,
}

impl MemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Vec<AnalyticsConfigRow>) -> Self {
        Self {
            tables: Mutex::new(Tables {
                settings,
                ..Tables::default()
            }),
            commits: AtomicU64::new(0),
        }
    }

    /// Number of units of work committed so far.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Runs `work` against a staged copy of the tables and commits it only if
    /// `work` returns `Ok`. Writers are serialized.
    pub async fn within_unit_of_work<'a, F>(&self, work: F) -> Result<()>
    where
        F: for<'w> FnOnce(&'w mut MemoryReportWriter) -> ScopedBoxFuture<'a, 'w, Result<()>>
            + Send
            + 'a,
    {
        let mut live = self.tables.lock().await;
        let mut writer = MemoryReportWriter {
            staged: live.clone(),
        };
        work(&mut writer).await?;
        *live = writer.staged;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    async fn list_gateways(&self) -> Result<Vec<GatewayRow>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<GatewayRow> = tables.gateways.values().cloned().collect();
        rows.sort_by(|a, b| b.last_report_date.cmp(&a.last_report_date));
        Ok(rows)
    }

    async fn find_gateway(&self, gateway_id: Uuid) -> Result<Option<GatewayDetail>> {
        let tables = self.tables.lock().await;
        let Some(gateway) = tables.gateways.get(&gateway_id).cloned() else {
            return Ok(None);
        };

        let performance_metric = tables.performance_metrics.get(&gateway_id).cloned();
        // BTreeMap keys order services by name and disks by label.
        let services = tables
            .services
            .values()
            .filter(|row| row.gateway_id == gateway_id)
            .cloned()
            .collect();
        let disks = tables
            .disks
            .values()
            .filter(|row| row.gateway_id == gateway_id)
            .cloned()
            .collect();
        let mut latest_events: Vec<LatestEventRow> = tables
            .latest_events
            .iter()
            .filter(|row| row.gateway_id == gateway_id)
            .cloned()
            .collect();
        latest_events.sort_by(|a, b| {
            b.event_date_utc
                .cmp(&a.event_date_utc)
                .then(a.id.cmp(&b.id))
        });

        Ok(Some(GatewayDetail {
            gateway,
            performance_metric,
            disks,
            latest_events,
            services,
        }))
    }

    async fn find_settings(&self) -> Result<Option<AnalyticsConfigRow>> {
        let tables = self.tables.lock().await;
        Ok(tables.settings.iter().min_by_key(|row| row.id).cloned())
    }

    async fn write_report(
        &self,
        report: &GatewayReport,
        received_at: DateTime<Utc>,
    ) -> Result<()> {
        self.within_unit_of_work(|writer| {
            reconcile::apply_report(writer, report, received_at).scope_boxed()
        })
        .await
    }
}

/// Writer over a staged copy of the in-memory tables.
#[derive(Debug)]
pub struct MemoryReportWriter {
    staged: Tables,
}

#[async_trait]
impl ReportWriter for MemoryReportWriter {
    async fn find_or_create_gateway(&mut self, gateway_id: Uuid) -> Result<Tracked<GatewayRow>> {
        let found = self.staged.gateways.get(&gateway_id).cloned();
        Ok(Tracked::from_lookup(found, || GatewayRow::new(gateway_id)))
    }

    async fn store_gateway(&mut self, gateway: Tracked<GatewayRow>) -> Result<()> {
        let record = gateway.record;
        self.staged.gateways.insert(record.gateway_id, record);
        Ok(())
    }

    async fn find_or_create_performance_metric(
        &mut self,
        gateway_id: Uuid,
    ) -> Result<Tracked<PerformanceMetricRow>> {
        let found = self.staged.performance_metrics.get(&gateway_id).cloned();
        Ok(Tracked::from_lookup(found, || {
            PerformanceMetricRow::new(gateway_id)
        }))
    }

    async fn store_performance_metric(
        &mut self,
        metric: Tracked<PerformanceMetricRow>,
    ) -> Result<()> {
        let record = metric.record;
        self.staged
            .performance_metrics
            .insert(record.gateway_id, record);
        Ok(())
    }

    async fn find_or_create_service(
        &mut self,
        gateway_id: Uuid,
        service_name: &str,
    ) -> Result<Tracked<ServiceRow>> {
        let found = self
            .staged
            .services
            .get(&(gateway_id, service_name.to_string()))
            .cloned();
        Ok(Tracked::from_lookup(found, || {
            ServiceRow::new(gateway_id, service_name)
        }))
    }

    async fn store_service(&mut self, service: Tracked<ServiceRow>) -> Result<()> {
        let record = service.record;
        self.staged
            .services
            .insert((record.gateway_id, record.service_name.clone()), record);
        Ok(())
    }

    async fn find_or_create_disk(
        &mut self,
        gateway_id: Uuid,
        label: &str,
    ) -> Result<Tracked<DiskRow>> {
        let found = self
            .staged
            .disks
            .get(&(gateway_id, label.to_string()))
            .cloned();
        Ok(Tracked::from_lookup(found, || DiskRow::new(gateway_id, label)))
    }

    async fn store_disk(&mut self, disk: Tracked<DiskRow>) -> Result<()> {
        let record = disk.record;
        self.staged
            .disks
            .insert((record.gateway_id, record.label.clone()), record);
        Ok(())
    }

    async fn replace_latest_events(
        &mut self,
        gateway_id: Uuid,
        events: Vec<NewLatestEvent>,
    ) -> Result<()> {
        self.staged
            .latest_events
            .retain(|row| row.gateway_id != gateway_id);

        for event in events {
            self.staged.next_event_id += 1;
            self.staged.latest_events.push(LatestEventRow {
                id: self.staged.next_event_id,
                gateway_id: event.gateway_id,
                event_date_utc: event.event_date_utc,
                asset_name: event.asset_name,
                event_name: event.event_name,
                event_info: event.event_info,
            });
        }
        Ok(())
    }
}
