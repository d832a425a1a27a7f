//! Row and payload models for gateway telemetry.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Root record for a reporting gateway. `last_report_date` is always the
/// server clock at the time of the most recent successful write.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Queryable,
    Selectable,
    Insertable,
    AsChangeset,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::gateways)]
#[diesel(primary_key(gateway_id))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct GatewayRow {
    pub gateway_id: Uuid,
    pub machine_name: Option<String>,
    pub remote_access_id: Option<String>,
    pub running_since: Option<DateTime<Utc>>,
    pub operating_system: Option<String>,
    pub cpu_info: Option<String>,
    pub memory_size: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_date: Option<DateTime<Utc>>,
    pub last_report_date: DateTime<Utc>,
}

impl GatewayRow {
    pub fn new(gateway_id: Uuid) -> Self {
        Self {
            gateway_id,
            ..Self::default()
        }
    }
}

#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Queryable,
    Selectable,
    Insertable,
    AsChangeset,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::performance_metrics)]
#[diesel(primary_key(gateway_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PerformanceMetricRow {
    pub gateway_id: Uuid,
    pub total_events_processed: i64,
    pub events_processed_per_sec: f64,
    pub current_signal_quality: f64,
    pub average_signal_quality: f64,
    pub reliability: f64,
    pub stability: f64,
    pub latency: f64,
    pub connected_nodes: i32,
}

impl PerformanceMetricRow {
    pub fn new(gateway_id: Uuid) -> Self {
        Self {
            gateway_id,
            ..Self::default()
        }
    }
}

#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Queryable,
    Selectable,
    Insertable,
    AsChangeset,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::services)]
#[diesel(primary_key(gateway_id, service_name))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ServiceRow {
    pub gateway_id: Uuid,
    pub service_name: String,
    pub status: Option<String>,
}

impl ServiceRow {
    pub fn new(gateway_id: Uuid, service_name: &str) -> Self {
        Self {
            gateway_id,
            service_name: service_name.to_string(),
            status: None,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Queryable,
    Selectable,
    Insertable,
    AsChangeset,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::disks)]
#[diesel(primary_key(gateway_id, label))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DiskRow {
    pub gateway_id: Uuid,
    pub label: String,
    pub total_space: i64,
    pub used_space: i64,
}

impl DiskRow {
    pub fn new(gateway_id: Uuid, label: &str) -> Self {
        Self {
            gateway_id,
            label: label.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::latest_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LatestEventRow {
    pub id: i64,
    pub gateway_id: Uuid,
    pub event_date_utc: DateTime<Utc>,
    pub asset_name: Option<String>,
    pub event_name: Option<String>,
    pub event_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::schema::latest_events)]
pub struct NewLatestEvent {
    pub gateway_id: Uuid,
    pub event_date_utc: DateTime<Utc>,
    pub asset_name: Option<String>,
    pub event_name: Option<String>,
    pub event_info: Option<String>,
}

/// Global settings row handed out to gateways.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::analytics_configs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AnalyticsConfigRow {
    pub id: i32,
    pub report_interval_secs: i32,
    pub latest_event_limit: i32,
    pub updated_at: DateTime<Utc>,
}

/// Full gateway view: the root row plus every related collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayDetail {
    #[serde(flatten)]
    pub gateway: GatewayRow,
    pub performance_metric: Option<PerformanceMetricRow>,
    pub disks: Vec<DiskRow>,
    pub latest_events: Vec<LatestEventRow>,
    pub services: Vec<ServiceRow>,
}

/// Snapshot of one gateway's state as sent by the device.
///
/// `None` collections leave stored rows untouched. An empty `latest_events`
/// clears the stored events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayReport {
    #[serde(default, deserialize_with = "nil_when_blank")]
    pub gateway_id: Uuid,
    pub machine_name: Option<String>,
    pub remote_access_id: Option<String>,
    pub running_since: Option<DateTime<Utc>>,
    pub operating_system: Option<String>,
    pub cpu_info: Option<String>,
    pub memory_size: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_date: Option<DateTime<Utc>>,
    pub performance_metric: Option<PerformanceMetricReport>,
    pub services: Option<Vec<ServiceReport>>,
    pub disks: Option<Vec<DiskReport>>,
    pub latest_events: Option<Vec<LatestEventReport>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceMetricReport {
    pub total_events_processed: i64,
    pub events_processed_per_sec: f64,
    pub current_signal_quality: f64,
    pub average_signal_quality: f64,
    pub reliability: f64,
    pub stability: f64,
    pub latency: f64,
    pub connected_nodes: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceReport {
    pub service_name: String,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskReport {
    pub label: String,
    #[serde(default)]
    pub total_space: i64,
    #[serde(default)]
    pub used_space: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestEventReport {
    pub event_date_utc: DateTime<Utc>,
    pub asset_name: Option<String>,
    pub event_name: Option<String>,
    pub event_info: Option<String>,
}

/// Reads a gateway id, treating `null` and blank strings as the nil UUID so
/// the reconciler can reject them instead of the JSON extractor.
fn nil_when_blank<'de, D>(deserializer: D) -> Result<Uuid, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => {
            Uuid::parse_str(raw.trim()).map_err(serde::de::Error::custom)
        }
        _ => Ok(Uuid::nil()),
    }
}
