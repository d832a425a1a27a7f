//! Storage seam for gateway telemetry.
//!
//! [`TelemetryStore`] is what the reader, reconciler and settings lookup talk
//! to. Each backend opens its own unit of work for a write and hands the
//! reconciler a [`ReportWriter`] scoped to it; nothing the writer stages is
//! visible until the unit of work commits.

mod memory;
mod postgres;

pub use memory::{MemoryReportWriter, MemoryTelemetryStore};
pub use postgres::{PgReportWriter, PgTelemetryStore};

use crate::{
    error::Result,
    models::{
        AnalyticsConfigRow, DiskRow, GatewayDetail, GatewayReport, GatewayRow, NewLatestEvent,
        PerformanceMetricRow, ServiceRow,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Every gateway row, without related collections.
    async fn list_gateways(&self) -> Result<Vec<GatewayRow>>;

    /// One gateway with its metric, disks, latest events and services.
    async fn find_gateway(&self, gateway_id: Uuid) -> Result<Option<GatewayDetail>>;

    /// The first settings row, if any exist.
    async fn find_settings(&self) -> Result<Option<AnalyticsConfigRow>>;

    /// Merges `report` inside a single unit of work. Any error discards the
    /// whole write.
    async fn write_report(&self, report: &GatewayReport, received_at: DateTime<Utc>)
        -> Result<()>;
}

/// Whether a record handle was loaded from storage or freshly created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    Existing,
    Created,
}

/// Owned, mutable record handle returned by a find-or-create lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<T> {
    pub record: T,
    pub state: RowState,
}

impl<T> Tracked<T> {
    pub fn existing(record: T) -> Self {
        Self {
            record,
            state: RowState::Existing,
        }
    }

    pub fn created(record: T) -> Self {
        Self {
            record,
            state: RowState::Created,
        }
    }

    pub fn is_new(&self) -> bool {
        self.state == RowState::Created
    }

    fn from_lookup(found: Option<T>, create: impl FnOnce() -> T) -> Self {
        match found {
            Some(record) => Self::existing(record),
            None => Self::created(create()),
        }
    }
}

/// Operations available inside one write unit of work.
#[async_trait]
pub trait ReportWriter: Send {
    async fn find_or_create_gateway(&mut self, gateway_id: Uuid) -> Result<Tracked<GatewayRow>>;

    async fn store_gateway(&mut self, gateway: Tracked<GatewayRow>) -> Result<()>;

    async fn find_or_create_performance_metric(
        &mut self,
        gateway_id: Uuid,
    ) -> Result<Tracked<PerformanceMetricRow>>;

    async fn store_performance_metric(&mut self, metric: Tracked<PerformanceMetricRow>)
        -> Result<()>;

    async fn find_or_create_service(
        &mut self,
        gateway_id: Uuid,
        service_name: &str,
    ) -> Result<Tracked<ServiceRow>>;

    async fn store_service(&mut self, service: Tracked<ServiceRow>) -> Result<()>;

    async fn find_or_create_disk(&mut self, gateway_id: Uuid, label: &str)
        -> Result<Tracked<DiskRow>>;

    async fn store_disk(&mut self, disk: Tracked<DiskRow>) -> Result<()>;

    /// Deletes every stored event for the gateway, then inserts `events`.
    async fn replace_latest_events(
        &mut self,
        gateway_id: Uuid,
        events: Vec<NewLatestEvent>,
    ) -> Result<()>;
}
