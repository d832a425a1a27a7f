//! Diesel schema definitions for the gateway analytics tables.

diesel::table! {
    use diesel::sql_types::*;

    gateways (gateway_id) {
        gateway_id -> Uuid,
        machine_name -> Nullable<Text>,
        remote_access_id -> Nullable<Text>,
        running_since -> Nullable<Timestamptz>,
        operating_system -> Nullable<Text>,
        cpu_info -> Nullable<Text>,
        memory_size -> Nullable<Int8>,
        latitude -> Nullable<Float8>,
        longitude -> Nullable<Float8>,
        location_date -> Nullable<Timestamptz>,
        last_report_date -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    performance_metrics (gateway_id) {
        gateway_id -> Uuid,
        total_events_processed -> Int8,
        events_processed_per_sec -> Float8,
        current_signal_quality -> Float8,
        average_signal_quality -> Float8,
        reliability -> Float8,
        stability -> Float8,
        latency -> Float8,
        connected_nodes -> Int4,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    services (gateway_id, service_name) {
        gateway_id -> Uuid,
        service_name -> Text,
        status -> Nullable<Text>,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    disks (gateway_id, label) {
        gateway_id -> Uuid,
        label -> Text,
        total_space -> Int8,
        used_space -> Int8,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    latest_events (id) {
        id -> Int8,
        gateway_id -> Uuid,
        event_date_utc -> Timestamptz,
        asset_name -> Nullable<Text>,
        event_name -> Nullable<Text>,
        event_info -> Nullable<Text>,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    analytics_configs (id) {
        id -> Int4,
        report_interval_secs -> Int4,
        latest_event_limit -> Int4,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(performance_metrics -> gateways (gateway_id));
diesel::joinable!(services -> gateways (gateway_id));
diesel::joinable!(disks -> gateways (gateway_id));
diesel::joinable!(latest_events -> gateways (gateway_id));

diesel::allow_tables_to_appear_in_same_query!(
    gateways,
    performance_metrics,
    services,
    disks,
    latest_events,
);
