//! Integration tests for the sync client runtime, driven through the mock
//! connector and mock range source with paused time.

use biosensor_sync::connection::{MockConnector, MockPeer};
use biosensor_sync::fetcher::{MockRangeSource, RangeResponse};
use biosensor_sync::{
    FetchError, FetchResult, LimitWarning, Measurement, MeasurementType, Mode, SyncClient,
    SyncConfig, SyncHandle, SyncSnapshot, TimeRange,
};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 4, 22, 0, 0).unwrap()
}

fn hr(offset_secs: i64, value: f64) -> Measurement {
    Measurement::new(
        t0() + chrono::Duration::seconds(offset_secs),
        MeasurementType::HeartRate,
        value,
    )
}

fn spawn(connector: &MockConnector, source: &MockRangeSource, mode: Option<Mode>) -> SyncHandle {
    let config = SyncConfig {
        ws_url: "ws://sensors.test/ws/ouratimeseries".to_string(),
        ..SyncConfig::default()
    };
    let client = SyncClient::new(config, Arc::new(connector.clone()), Arc::new(source.clone()));
    match mode {
        Some(mode) => client.with_mode(mode).spawn(),
        None => client.spawn(),
    }
}

async fn wait_for(
    handle: &SyncHandle,
    what: &str,
    predicate: impl FnMut(&SyncSnapshot) -> bool,
) -> SyncSnapshot {
    let mut updates = handle.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(60), updates.wait_for(predicate))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .expect("client stopped");
    snapshot.clone()
}

async fn wait_for_requests(source: &MockRangeSource, count: usize) {
    tokio::time::timeout(Duration::from_secs(60), async {
        while source.request_count() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {count} fetches"));
}

async fn connected(handle: &SyncHandle, connector: &MockConnector) -> MockPeer {
    wait_for(handle, "initial fetch", |s| s.is_connected && s.generation == 1).await;
    connector.last_peer().expect("socket opened")
}

#[tokio::test(start_paused = true)]
async fn test_update_notification_refetches_live_window() {
    let connector = MockConnector::new();
    let source = MockRangeSource::new();
    source.respond_with_records(Vec::new());

    let mut missing_value = hr(1, 0.0);
    missing_value.value = None;
    source.respond_with_records(vec![hr(0, 60.0), missing_value, hr(2, 62.0)]);

    let handle = spawn(&connector, &source, None);
    let peer = connected(&handle, &connector).await;
    assert_eq!(source.request_count(), 1);
    assert_eq!(connector.urls(), vec!["ws://sensors.test/ws/ouratimeseries"]);

    assert!(peer.send_text(r#"{"type":"heartrate_update"}"#));
    let snapshot = wait_for(&handle, "refetched dataset", |s| s.dataset.len() == 2).await;

    assert_eq!(source.request_count(), 2);
    let range = source.requests()[1];
    assert_eq!(range.end - range.start, chrono::Duration::hours(24));
    assert!(Utc::now() - range.end < chrono::Duration::minutes(1));
    assert!(snapshot.dataset.iter().all(Measurement::is_admissible));
    assert_eq!(snapshot.error, None);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_mode_switch_discards_in_flight_fetch() {
    let range_a = TimeRange::new(t0() - chrono::Duration::days(2), t0() - chrono::Duration::days(1));
    let range_b = TimeRange::new(t0() - chrono::Duration::hours(6), t0());

    let connector = MockConnector::new();
    let source = MockRangeSource::new();
    let release_a = source.hold_next();
    let release_b = source.hold_next();

    let handle = spawn(&connector, &source, Some(Mode::Fixed(range_a)));
    wait_for_requests(&source, 1).await;

    assert!(handle.set_mode(Mode::Fixed(range_b)));
    wait_for_requests(&source, 2).await;
    assert_eq!(source.requests(), vec![range_a, range_b]);

    let _ = release_b.send(Ok(FetchResult::from_records(vec![hr(0, 70.0), hr(1, 71.0)], 10_000)));
    wait_for(&handle, "range B data", |s| s.dataset.len() == 2).await;

    // The response for A arrives last and must not overwrite B.
    let _ = release_a.send(Ok(FetchResult::from_records(
        (0..5).map(|i| hr(i, 50.0)).collect(),
        10_000,
    )));
    tokio::time::sleep(Duration::from_secs(1)).await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.dataset.len(), 2);
    assert_eq!(snapshot.mode, Mode::Fixed(range_b));
    assert_eq!(source.request_count(), 2);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_setting_same_mode_does_not_refetch() {
    let range = TimeRange::new(t0() - chrono::Duration::hours(1), t0());
    let connector = MockConnector::new();
    let source = MockRangeSource::new();

    let handle = spawn(&connector, &source, Some(Mode::Fixed(range)));
    connected(&handle, &connector).await;

    handle.set_mode(Mode::Fixed(range));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.request_count(), 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_close_reconnects_after_five_seconds() {
    let connector = MockConnector::new();
    let source = MockRangeSource::new();

    let handle = spawn(&connector, &source, None);
    let peer = connected(&handle, &connector).await;

    let closed_at = Instant::now();
    peer.close();

    let snapshot = wait_for(&handle, "disconnect", |s| !s.is_connected).await;
    assert_eq!(snapshot.error, None);

    wait_for(&handle, "reconnect fetch", |s| s.is_connected && s.generation == 2).await;
    assert!(closed_at.elapsed() >= Duration::from_secs(5));
    assert_eq!(connector.attempts(), 2);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.request_count(), 2);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_surfaces_and_recovers() {
    let connector = MockConnector::new();
    let source = MockRangeSource::new();

    let handle = spawn(&connector, &source, None);
    let peer = connected(&handle, &connector).await;

    peer.send_error(biosensor_sync::TransportError::ReceiveFailed("reset".into()));
    let snapshot = wait_for(&handle, "transport error", |s| !s.is_connected).await;
    assert_eq!(snapshot.error.as_deref(), Some("WebSocket connection error"));

    let snapshot = wait_for(&handle, "reconnect", |s| s.is_connected).await;
    assert_eq!(snapshot.error, None);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_is_retried() {
    let connector = MockConnector::new();
    connector.fail_next_connect("connection refused");
    let source = MockRangeSource::new();

    let handle = spawn(&connector, &source, None);
    wait_for(&handle, "second attempt", |s| s.is_connected).await;
    assert_eq!(connector.attempts(), 2);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_reconnect() {
    let connector = MockConnector::new();
    let source = MockRangeSource::new();

    let handle = spawn(&connector, &source, None);
    let peer = connected(&handle, &connector).await;

    peer.close();
    wait_for(&handle, "disconnect", |s| !s.is_connected).await;
    handle.shutdown().await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(source.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_socket_and_discards_in_flight_fetch() {
    let connector = MockConnector::new();
    let source = MockRangeSource::new();
    let release = source.hold_next();

    let handle = spawn(&connector, &source, None);
    wait_for_requests(&source, 1).await;
    let updates = handle.subscribe();
    let peer = connector.last_peer().expect("socket opened");

    handle.shutdown().await;
    assert!(peer.is_closed());

    let _ = release.send(Ok(FetchResult::from_records(vec![hr(0, 60.0)], 10_000)));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(updates.borrow().dataset.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_record_limit_warns_but_still_updates() {
    let connector = MockConnector::new();
    let source = MockRangeSource::new();
    let records: Vec<Measurement> = (0..10_000).map(|i| hr(i, 60.0)).collect();
    source.respond_with(Ok(FetchResult::from_response(
        RangeResponse {
            data: records,
            count: Some(10_000),
            limit: Some(10_000),
        },
        10_000,
    )));

    let handle = spawn(&connector, &source, None);
    let snapshot = wait_for(&handle, "truncated dataset", |s| s.warning.is_some()).await;

    assert_eq!(snapshot.dataset.len(), 10_000);
    assert_eq!(
        snapshot.warning,
        Some(LimitWarning {
            count: 10_000,
            limit: 10_000
        })
    );
    assert_eq!(snapshot.error, None);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_message_keeps_connection() {
    let connector = MockConnector::new();
    let source = MockRangeSource::new();

    let handle = spawn(&connector, &source, None);
    let peer = connected(&handle, &connector).await;

    peer.send_text("{not json");
    let snapshot = wait_for(&handle, "protocol error", |s| s.error.is_some()).await;
    assert!(snapshot.is_connected);
    assert_eq!(snapshot.error.as_deref(), Some("Failed to parse WebSocket message"));

    source.respond_with_records(vec![hr(0, 60.0)]);
    peer.send_text(r#"{"type":"ouratimeseries_update"}"#);
    let snapshot = wait_for(&handle, "refetch after bad message", |s| s.dataset.len() == 1).await;
    assert_eq!(snapshot.error, None);
    assert_eq!(connector.attempts(), 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_direct_data_bypasses_fetch() {
    let connector = MockConnector::new();
    let source = MockRangeSource::new();

    let handle = spawn(&connector, &source, None);
    let peer = connected(&handle, &connector).await;

    peer.send_text(
        r#"{"data":[
            {"timestamp":"2026-01-04T22:18:21.700Z","measurement_type":"hrv","measurement_value":"45"},
            {"timestamp":null,"measurement_type":"hrv","measurement_value":44}
        ]}"#,
    );
    let snapshot = wait_for(&handle, "direct data", |s| s.dataset.len() == 1).await;
    assert_eq!(snapshot.generation, 2);
    assert_eq!(snapshot.dataset.records()[0].value, Some(45.0));

    peer.send_text(r#"[{"timestamp":"2026-01-04T22:19:00Z","measurement_value":46}]"#);
    wait_for(&handle, "bare array", |s| s.generation == 3).await;

    peer.send_text(r#"{"type":"pong","message":"hello"}"#);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.request_count(), 1);
    assert_eq!(handle.snapshot().generation, 3);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_non_record_arrays_leave_dataset_untouched() {
    let connector = MockConnector::new();
    let source = MockRangeSource::new();
    source.respond_with_records(vec![hr(0, 60.0), hr(1, 61.0)]);

    let handle = spawn(&connector, &source, None);
    let peer = connected(&handle, &connector).await;
    assert_eq!(handle.snapshot().dataset.len(), 2);

    peer.send_text("[1,2,3]");
    peer.send_text(r#"[{"foo":1}]"#);
    peer.send_text(r#"{"type":"snapshot","data":[{"foo":1}]}"#);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.dataset.len(), 2);
    assert_eq!(snapshot.generation, 1);
    assert_eq!(snapshot.error, None);
    assert!(snapshot.is_connected);
    assert_eq!(source.request_count(), 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_mode_switch_is_visible_before_fetch_returns() {
    let range = TimeRange::new(t0() - chrono::Duration::hours(6), t0());
    let connector = MockConnector::new();
    let source = MockRangeSource::new();

    let handle = spawn(&connector, &source, None);
    connected(&handle, &connector).await;

    let _release = source.hold_next();
    assert!(handle.set_mode(Mode::Fixed(range)));
    let snapshot = wait_for(&handle, "mode change", |s| s.mode == Mode::Fixed(range)).await;
    assert_eq!(snapshot.generation, 2);
    assert!(snapshot.dataset.is_empty());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_retries_on_next_trigger() {
    let connector = MockConnector::new();
    let source = MockRangeSource::new();
    source.respond_with(Err(FetchError::Status {
        status: 503,
        body: "unavailable".to_string(),
    }));
    source.respond_with_records(vec![hr(0, 60.0)]);

    let handle = spawn(&connector, &source, None);
    let snapshot = wait_for(&handle, "fetch error", |s| s.error.is_some()).await;
    assert!(snapshot.dataset.is_empty());
    assert!(snapshot.is_connected);

    assert!(handle.refresh());
    let snapshot = wait_for(&handle, "retry", |s| s.dataset.len() == 1).await;
    assert_eq!(snapshot.error, None);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_stops_client() {
    let connector = MockConnector::new();
    let source = MockRangeSource::new();

    let handle = spawn(&connector, &source, None);
    let peer = connected(&handle, &connector).await;
    drop(handle);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !peer.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("socket closed after handle dropped");
}
