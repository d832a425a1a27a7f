use super::{ReportWriter, TelemetryStore, Tracked};
use crate::{
    db::{PgConnectionManager, PgPool},
    error::{Result, ServiceError},
    models::{
        AnalyticsConfigRow, DiskRow, GatewayDetail, GatewayReport, GatewayRow, LatestEventRow,
        NewLatestEvent, PerformanceMetricRow, ServiceRow,
    },
    reconcile,
    schema::{analytics_configs, disks, gateways, latest_events, performance_metrics, services},
};
use async_trait::async_trait;
use bb8::PooledConnection;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{
    scoped_futures::ScopedFutureExt, AsyncConnection, AsyncPgConnection, RunQueryDsl,
};
use tracing::error;
use uuid::Uuid;

/// Telemetry store backed by PostgreSQL through diesel-async.
#[derive(Clone)]
pub struct PgTelemetryStore {
    pool: PgPool,
}

impl PgTelemetryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn connection(&self) -> Result<PooledConnection<'_, PgConnectionManager>> {
        self.pool.get().await.map_err(|err| {
            error!(error = ?err, "failed to acquire database connection");
            ServiceError::Internal(anyhow::anyhow!("{err:?}"))
        })
    }
}

// Postgres runs READ UNCOMMITTED as READ COMMITTED; dirty reads are acceptable here
// either way.
async fn read_uncommitted(conn: &mut AsyncPgConnection) -> QueryResult<usize> {
    diesel::sql_query("SET TRANSACTION ISOLATION LEVEL READ UNCOMMITTED")
        .execute(conn)
        .await
}

#[async_trait]
impl TelemetryStore for PgTelemetryStore {
    async fn list_gateways(&self) -> Result<Vec<GatewayRow>> {
        let mut conn = self.connection().await?;
        conn.transaction::<_, ServiceError, _>(|conn| {
            async move {
                read_uncommitted(conn).await?;
                let rows = gateways::table
                    .order(gateways::last_report_date.desc())
                    .select(GatewayRow::as_select())
                    .load(conn)
                    .await?;
                Ok(rows)
            }
            .scope_boxed()
        })
        .await
    }

    async fn find_gateway(&self, gateway_id: Uuid) -> Result<Option<GatewayDetail>> {
        let mut conn = self.connection().await?;
        conn.transaction::<_, ServiceError, _>(|conn| {
            async move {
                read_uncommitted(conn).await?;
                let Some(gateway) = gateways::table
                    .find(gateway_id)
                    .select(GatewayRow::as_select())
                    .first(conn)
                    .await
                    .optional()?
                else {
                    return Ok(None);
                };

                let performance_metric = performance_metrics::table
                    .find(gateway_id)
                    .select(PerformanceMetricRow::as_select())
                    .first(conn)
                    .await
                    .optional()?;
                let disks = disks::table
                    .filter(disks::gateway_id.eq(gateway_id))
                    .order(disks::label.asc())
                    .select(DiskRow::as_select())
                    .load(conn)
                    .await?;
                let latest_events = latest_events::table
                    .filter(latest_events::gateway_id.eq(gateway_id))
                    .order((latest_events::event_date_utc.desc(), latest_events::id.asc()))
                    .select(LatestEventRow::as_select())
                    .load(conn)
                    .await?;
                let services = services::table
                    .filter(services::gateway_id.eq(gateway_id))
                    .order(services::service_name.asc())
                    .select(ServiceRow::as_select())
                    .load(conn)
                    .await?;

                Ok(Some(GatewayDetail {
                    gateway,
                    performance_metric,
                    disks,
                    latest_events,
                    services,
                }))
            }
            .scope_boxed()
        })
        .await
    }

    async fn find_settings(&self) -> Result<Option<AnalyticsConfigRow>> {
        let mut conn = self.connection().await?;
        conn.transaction::<_, ServiceError, _>(|conn| {
            async move {
                read_uncommitted(conn).await?;
                let row = analytics_configs::table
                    .order(analytics_configs::id.asc())
                    .select(AnalyticsConfigRow::as_select())
                    .first(conn)
                    .await
                    .optional()?;
                Ok(row)
            }
            .scope_boxed()
        })
        .await
    }

    async fn write_report(
        &self,
        report: &GatewayReport,
        received_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.transaction::<_, ServiceError, _>(|conn| {
            async move {
                let mut writer = PgReportWriter { conn };
                reconcile::apply_report(&mut writer, report, received_at).await
            }
            .scope_boxed()
        })
        .await
    }
}

/// Writer bound to one open Postgres transaction.
pub struct PgReportWriter<'c> {
    conn: &'c mut AsyncPgConnection,
}

#[async_trait]
impl<'c> ReportWriter for PgReportWriter<'c> {
    async fn find_or_create_gateway(&mut self, gateway_id: Uuid) -> Result<Tracked<GatewayRow>> {
        let found = gateways::table
            .find(gateway_id)
            .select(GatewayRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        Ok(Tracked::from_lookup(found, || GatewayRow::new(gateway_id)))
    }

    async fn store_gateway(&mut self, gateway: Tracked<GatewayRow>) -> Result<()> {
        if gateway.is_new() {
            diesel::insert_into(gateways::table)
                .values(&gateway.record)
                .execute(&mut *self.conn)
                .await?;
        } else {
            diesel::update(gateways::table.find(gateway.record.gateway_id))
                .set(&gateway.record)
                .execute(&mut *self.conn)
                .await?;
        }
        Ok(())
    }

    async fn find_or_create_performance_metric(
        &mut self,
        gateway_id: Uuid,
    ) -> Result<Tracked<PerformanceMetricRow>> {
        let found = performance_metrics::table
            .find(gateway_id)
            .select(PerformanceMetricRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        Ok(Tracked::from_lookup(found, || {
            PerformanceMetricRow::new(gateway_id)
        }))
    }

    async fn store_performance_metric(
        &mut self,
        metric: Tracked<PerformanceMetricRow>,
    ) -> Result<()> {
        if metric.is_new() {
            diesel::insert_into(performance_metrics::table)
                .values(&metric.record)
                .execute(&mut *self.conn)
                .await?;
        } else {
            diesel::update(performance_metrics::table.find(metric.record.gateway_id))
                .set(&metric.record)
                .execute(&mut *self.conn)
                .await?;
        }
        Ok(())
    }

    async fn find_or_create_service(
        &mut self,
        gateway_id: Uuid,
        service_name: &str,
    ) -> Result<Tracked<ServiceRow>> {
        let found = services::table
            .filter(services::gateway_id.eq(gateway_id))
            .filter(services::service_name.eq(service_name))
            .select(ServiceRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        Ok(Tracked::from_lookup(found, || {
            ServiceRow::new(gateway_id, service_name)
        }))
    }

    async fn store_service(&mut self, service: Tracked<ServiceRow>) -> Result<()> {
        if service.is_new() {
            diesel::insert_into(services::table)
                .values(&service.record)
                .execute(&mut *self.conn)
                .await?;
        } else {
            let key = &service.record;
            diesel::update(
                services::table
                    .filter(services::gateway_id.eq(key.gateway_id))
                    .filter(services::service_name.eq(&key.service_name)),
            )
            .set(&service.record)
            .execute(&mut *self.conn)
            .await?;
        }
        Ok(())
    }

    async fn find_or_create_disk(
        &mut self,
        gateway_id: Uuid,
        label: &str,
    ) -> Result<Tracked<DiskRow>> {
        let found = disks::table
            .filter(disks::gateway_id.eq(gateway_id))
            .filter(disks::label.eq(label))
            .select(DiskRow::as_select())
            .first(&mut *self.conn)
            .await
            .optional()?;
        Ok(Tracked::from_lookup(found, || DiskRow::new(gateway_id, label)))
    }

    async fn store_disk(&mut self, disk: Tracked<DiskRow>) -> Result<()> {
        if disk.is_new() {
            diesel::insert_into(disks::table)
                .values(&disk.record)
                .execute(&mut *self.conn)
                .await?;
        } else {
            let key = &disk.record;
            diesel::update(
                disks::table
                    .filter(disks::gateway_id.eq(key.gateway_id))
                    .filter(disks::label.eq(&key.label)),
            )
            .set(&disk.record)
            .execute(&mut *self.conn)
            .await?;
        }
        Ok(())
    }

    async fn replace_latest_events(
        &mut self,
        gateway_id: Uuid,
        events: Vec<NewLatestEvent>,
    ) -> Result<()> {
        diesel::delete(latest_events::table.filter(latest_events::gateway_id.eq(gateway_id)))
            .execute(&mut *self.conn)
            .await?;

        if !events.is_empty() {
            diesel::insert_into(latest_events::table)
                .values(events)
                .execute(&mut *self.conn)
                .await?;
        }
        Ok(())
    }
}
