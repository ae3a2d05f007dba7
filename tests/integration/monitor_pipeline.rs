//! Integration tests for the full sweep pipeline
//!
//! These tests verify that the pieces work correctly together:
//! - Monitor → panel fetch → evaluation → store → dispatcher → Telegram
//! - Edge triggering across consecutive sweeps
//! - Per-VPS overrides and suspension events riding one sweep

use std::sync::Arc;

use panel_monitoring::actors::{DispatcherHandle, MonitorHandle};
use panel_monitoring::notify::TelegramNotifier;
use panel_monitoring::panel::VirtualizorClient;
use panel_monitoring::storage::{MemoryStore, Store};
use panel_monitoring::{Metric, MetricThresholds, UsageLevel, VpsRef};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_breach_flows_to_telegram() {
    // Panel with one VPS at 90% disk
    let panel = MockServer::start().await;
    mount_list(&panel, vps_list_body(&[("101", "web01", "203.0.113.10")])).await;
    mount_details(&panel, "101", vps_details_body("101", 90.0, 100.0, 10.0, 100.0, "0")).await;

    // Real Telegram notifier against a mocked Bot API
    let telegram = MockServer::start().await;
    mount_telegram_ok(&telegram).await;

    let store = Arc::new(MemoryStore::new());
    seed_profile(store.as_ref(), &panel.uri(), 42, "prod panel").await;

    let dispatcher = DispatcherHandle::spawn(Arc::new(TelegramNotifier::with_api_base(
        telegram.uri(),
        "test-token",
    )));
    let monitor = MonitorHandle::spawn(
        &test_config(),
        store.clone(),
        Arc::new(VirtualizorClient::new()),
        dispatcher.clone(),
    );

    let stats = monitor.tick_now().await.unwrap();
    assert_eq!(stats.panels_failed, 0);

    // The sendMessage call carries the owner chat id and the rendered text
    let requests = wait_for_requests(&telegram, 1).await;
    assert_eq!(requests.len(), 1, "expected exactly one delivery");

    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["chat_id"], 42);
    let text = body["text"].as_str().unwrap();
    assert!(text.contains("Disk WARN"), "unexpected text: {text}");
    assert!(text.contains("web01"), "unexpected text: {text}");
    assert!(text.contains("90%"), "unexpected text: {text}");

    // State persisted alongside the notification
    let state = store
        .get_state(&VpsRef::new(1, "101"), Metric::Disk)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.last_level, UsageLevel::Warn);

    monitor.shutdown().await.unwrap();
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_recovery_sends_resolved_after_breach() {
    let panel = MockServer::start().await;
    mount_list(&panel, vps_list_body(&[("101", "web01", "203.0.113.10")])).await;

    // First detail fetch breaches, the next one recovers
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("act", "managevs"))
        .and(query_param("vpsid", "101"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(vps_details_body("101", 90.0, 100.0, 10.0, 100.0, "0")),
        )
        .up_to_n_times(1)
        .mount(&panel)
        .await;
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("act", "managevs"))
        .and(query_param("vpsid", "101"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(vps_details_body("101", 50.0, 100.0, 10.0, 100.0, "0")),
        )
        .mount(&panel)
        .await;

    let store = Arc::new(MemoryStore::new());
    seed_profile(store.as_ref(), &panel.uri(), 7, "prod panel").await;

    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = DispatcherHandle::spawn(notifier.clone());
    let monitor = MonitorHandle::spawn(
        &test_config(),
        store.clone(),
        Arc::new(VirtualizorClient::new()),
        dispatcher,
    );

    monitor.tick_now().await.unwrap();
    monitor.tick_now().await.unwrap();

    let sent = wait_for_sent(&notifier, 2).await;
    assert_eq!(sent.len(), 2, "breach then recovery: {sent:?}");
    assert!(sent[0].1.contains("Disk WARN"), "first: {}", sent[0].1);
    assert!(sent[1].1.contains("Disk recovered"), "second: {}", sent[1].1);

    let state = store
        .get_state(&VpsRef::new(1, "101"), Metric::Disk)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.last_level, UsageLevel::None);
    assert_eq!(state.last_pct, 50);

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_vps_override_tightens_threshold() {
    let panel = MockServer::start().await;
    mount_list(&panel, vps_list_body(&[("101", "web01", "203.0.113.10")])).await;
    mount_details(&panel, "101", vps_details_body("101", 60.0, 100.0, 10.0, 100.0, "0")).await;

    let store = Arc::new(MemoryStore::new());
    let panel_id = seed_profile(store.as_ref(), &panel.uri(), 7, "prod panel").await;

    // 60% is quiet under the default warn of 80, loud under this override
    store
        .put_override(
            &VpsRef::new(panel_id, "101"),
            Metric::Disk,
            MetricThresholds::new(50, 100).unwrap(),
        )
        .await
        .unwrap();

    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = DispatcherHandle::spawn(notifier.clone());
    let monitor = MonitorHandle::spawn(
        &test_config(),
        store.clone(),
        Arc::new(VirtualizorClient::new()),
        dispatcher,
    );

    monitor.tick_now().await.unwrap();

    let sent = wait_for_sent(&notifier, 1).await;
    assert_eq!(sent.len(), 1, "only the overridden metric alerts: {sent:?}");
    assert!(sent[0].1.contains("Disk WARN"), "text: {}", sent[0].1);
    assert!(sent[0].1.contains("60%"), "text: {}", sent[0].1);

    // Bandwidth keeps the default thresholds and stays quiet
    let bw = store
        .get_state(&VpsRef::new(panel_id, "101"), Metric::Bandwidth)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bw.last_level, UsageLevel::None);

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_suspension_and_breach_ride_one_sweep() {
    let panel = MockServer::start().await;
    mount_list(&panel, vps_list_body(&[("101", "web01", "203.0.113.10")])).await;
    mount_details(&panel, "101", vps_details_body("101", 90.0, 100.0, 10.0, 100.0, "1")).await;

    let store = Arc::new(MemoryStore::new());
    seed_profile(store.as_ref(), &panel.uri(), 7, "prod panel").await;

    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = DispatcherHandle::spawn(notifier.clone());
    let monitor = MonitorHandle::spawn(
        &test_config(),
        store.clone(),
        Arc::new(VirtualizorClient::new()),
        dispatcher,
    );

    monitor.tick_now().await.unwrap();

    // Usage events come before the suspension event
    let sent = wait_for_sent(&notifier, 2).await;
    assert_eq!(sent.len(), 2, "breach and suspension: {sent:?}");
    assert!(sent[0].1.contains("Disk WARN"), "first: {}", sent[0].1);
    assert!(sent[1].1.contains("VPS suspended"), "second: {}", sent[1].1);

    // A second sweep repeats neither
    monitor.tick_now().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(notifier.sent.lock().await.len(), 2);

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_two_panels_same_owner_alert_independently() {
    let panel_a = MockServer::start().await;
    mount_list(&panel_a, vps_list_body(&[("101", "web01", "203.0.113.10")])).await;
    mount_details(&panel_a, "101", vps_details_body("101", 90.0, 100.0, 10.0, 100.0, "0")).await;

    let panel_b = MockServer::start().await;
    mount_list(&panel_b, vps_list_body(&[("201", "db01", "203.0.113.20")])).await;
    mount_details(&panel_b, "201", vps_details_body("201", 85.0, 100.0, 10.0, 100.0, "0")).await;

    let store = Arc::new(MemoryStore::new());
    let id_a = seed_profile(store.as_ref(), &panel_a.uri(), 7, "panel a").await;
    let id_b = seed_profile(store.as_ref(), &panel_b.uri(), 7, "panel b").await;
    assert_ne!(id_a, id_b);

    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = DispatcherHandle::spawn(notifier.clone());
    let monitor = MonitorHandle::spawn(
        &test_config(),
        store.clone(),
        Arc::new(VirtualizorClient::new()),
        dispatcher,
    );

    monitor.tick_now().await.unwrap();

    let sent = wait_for_sent(&notifier, 2).await;
    assert_eq!(sent.len(), 2, "one alert per panel: {sent:?}");
    assert!(sent.iter().all(|(recipient, _)| *recipient == 7));

    let names: Vec<&str> = sent
        .iter()
        .map(|(_, text)| {
            if text.contains("web01") {
                "web01"
            } else if text.contains("db01") {
                "db01"
            } else {
                "?"
            }
        })
        .collect();
    assert!(names.contains(&"web01"), "texts: {sent:?}");
    assert!(names.contains(&"db01"), "texts: {sent:?}");

    // Both tuples tracked under their own panel id
    for (panel_id, vps_id) in [(id_a, "101"), (id_b, "201")] {
        let state = store
            .get_state(&VpsRef::new(panel_id, vps_id), Metric::Disk)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.last_level, UsageLevel::Warn);
    }

    monitor.shutdown().await.unwrap();
}
