mod support;

use axum::http::StatusCode;
use chrono::{TimeZone, Utc};
use gateway_analytics::models::AnalyticsConfigRow;
use pretty_assertions::assert_eq;
use serde_json::json;
use support::{read_json, AnalyticsTestHarness};

const GATEWAY_ID: &str = "3f2b8c1e-4d5a-4e6f-9a7b-1c2d3e4f5a6b";

fn full_report() -> serde_json::Value {
    json!({
        "gateway_id": GATEWAY_ID,
        "machine_name": "gw-harbor",
        "remote_access_id": "901 222 333",
        "running_since": "2024-06-01T06:00:00Z",
        "operating_system": "Ubuntu 22.04",
        "cpu_info": "ARM Cortex-A72",
        "memory_size": 4294967296_i64,
        "latitude": 57.7,
        "longitude": 11.97,
        "location_date": "2024-06-01T06:01:00Z",
        "performance_metric": {
            "total_events_processed": 1200,
            "events_processed_per_sec": 3.5,
            "current_signal_quality": 0.9,
            "average_signal_quality": 0.85,
            "reliability": 0.99,
            "stability": 0.95,
            "latency": 18.0,
            "connected_nodes": 6
        },
        "services": [
            { "service_name": "collector", "status": "running" },
            { "service_name": "uplink", "status": "stopped" }
        ],
        "disks": [
            { "label": "/", "total_space": 32000000000_i64, "used_space": 8000000000_i64 }
        ],
        "latest_events": [
            {
                "event_date_utc": "2024-06-01T07:00:00Z",
                "asset_name": "crane-2",
                "event_name": "overload",
                "event_info": "load 12t"
            }
        ]
    })
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let harness = AnalyticsTestHarness::new();
    let (status, body) = read_json(harness.get("/healthz").await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn empty_store_lists_no_gateways() {
    let harness = AnalyticsTestHarness::new();
    let (status, body) = read_json(harness.get("/api/gateways").await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn saved_report_is_listed_shallow_and_detailed_in_full() {
    let harness = AnalyticsTestHarness::new();

    let (status, body) =
        read_json(harness.post_json("/api/gateways", &full_report()).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "result": "success" }));

    let (status, list) = read_json(harness.get("/api/gateways").await).await;
    assert_eq!(status, StatusCode::OK);
    let rows = list.as_array().expect("list should be an array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["gateway_id"], json!(GATEWAY_ID));
    assert_eq!(rows[0]["machine_name"], json!("gw-harbor"));
    assert!(rows[0].get("services").is_none());
    assert!(rows[0].get("latest_events").is_none());

    let (status, detail) =
        read_json(harness.get(&format!("/api/gateways/{GATEWAY_ID}")).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["gateway_id"], json!(GATEWAY_ID));
    assert_eq!(detail["performance_metric"]["connected_nodes"], json!(6));
    assert_eq!(detail["services"].as_array().map(Vec::len), Some(2));
    assert_eq!(detail["services"][0]["service_name"], json!("collector"));
    assert_eq!(detail["disks"][0]["used_space"], json!(8000000000_i64));
    assert_eq!(detail["latest_events"][0]["event_name"], json!("overload"));
    assert!(detail["last_report_date"].is_string());
}

#[tokio::test]
async fn unknown_gateway_returns_404() {
    let harness = AnalyticsTestHarness::new();
    let (status, body) = read_json(
        harness
            .get("/api/gateways/00000000-0000-4000-8000-000000000001")
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body["error"],
        json!("not found: gateway 00000000-0000-4000-8000-000000000001")
    );
}

#[tokio::test]
async fn malformed_gateway_id_in_path_is_a_client_error() {
    let harness = AnalyticsTestHarness::new();
    let response = harness.get("/api/gateways/not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn nil_or_missing_gateway_id_is_rejected() {
    let harness = AnalyticsTestHarness::new();

    let payloads = [
        json!({
            "gateway_id": "00000000-0000-0000-0000-000000000000",
            "machine_name": "ghost",
            "latest_events": []
        }),
        json!({ "machine_name": "anonymous" }),
        json!({ "gateway_id": null, "machine_name": "null-id" }),
        json!({ "gateway_id": "", "machine_name": "blank-id" }),
    ];
    for payload in &payloads {
        let (status, body) = read_json(harness.post_json("/api/gateways", payload).await).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{payload}");
        assert_eq!(body["result"], json!("rejected"), "{payload}");
    }

    assert_eq!(harness.store().commit_count(), 0);
    let (_, list) = read_json(harness.get("/api/gateways").await).await;
    assert_eq!(list, json!([]));
}

#[tokio::test]
async fn absent_or_unreadable_report_is_rejected() {
    let harness = AnalyticsTestHarness::new();

    let bodies: [&'static str; 4] = ["null", "", "{ not json", r#"{"gateway_id":"gw-7"}"#];
    for raw in bodies {
        let (status, body) = read_json(harness.post_raw("/api/gateways", raw).await).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{raw:?}");
        assert_eq!(body["result"], json!("rejected"), "{raw:?}");
        assert!(body["error"].is_string(), "{raw:?}");
    }

    assert_eq!(harness.store().commit_count(), 0);
}

#[tokio::test]
async fn storage_failure_is_reported_as_failure() {
    let harness = AnalyticsTestHarness::with_failing_writes();

    let (status, body) =
        read_json(harness.post_json("/api/gateways", &full_report()).await).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["result"], json!("failure"));
    assert!(body["error"]
        .as_str()
        .is_some_and(|error| error.starts_with("storage error")));

    let (status, list) = read_json(harness.get("/api/gateways").await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list, json!([]));
}

#[tokio::test]
async fn second_report_replaces_events_and_keeps_services() {
    let harness = AnalyticsTestHarness::new();
    harness.post_json("/api/gateways", &full_report()).await;

    let follow_up = json!({
        "gateway_id": GATEWAY_ID,
        "machine_name": "gw-harbor-2",
        "services": [ { "service_name": "uplink", "status": "running" } ],
        "latest_events": []
    });
    let (status, _) = read_json(harness.post_json("/api/gateways", &follow_up).await).await;
    assert_eq!(status, StatusCode::OK);

    let (_, detail) = read_json(harness.get(&format!("/api/gateways/{GATEWAY_ID}")).await).await;
    assert_eq!(detail["machine_name"], json!("gw-harbor-2"));
    assert_eq!(detail["operating_system"], json!(null));
    assert_eq!(detail["latest_events"], json!([]));
    assert_eq!(
        detail["services"],
        json!([
            { "gateway_id": GATEWAY_ID, "service_name": "collector", "status": "running" },
            { "gateway_id": GATEWAY_ID, "service_name": "uplink", "status": "running" }
        ])
    );
    // Metric and disks were absent from the follow-up and stay as they were.
    assert_eq!(detail["performance_metric"]["total_events_processed"], json!(1200));
    assert_eq!(detail["disks"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn settings_endpoint_serves_first_row() {
    let harness = AnalyticsTestHarness::new();
    let response = harness.get("/api/settings").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let harness = AnalyticsTestHarness::with_settings(vec![AnalyticsConfigRow {
        id: 1,
        report_interval_secs: 120,
        latest_event_limit: 20,
        updated_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
    }]);
    let (status, body) = read_json(harness.get("/api/settings").await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["report_interval_secs"], json!(120));
    assert_eq!(body["latest_event_limit"], json!(20));
}
