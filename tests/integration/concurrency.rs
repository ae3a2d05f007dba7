//! Concurrency and race condition tests
//!
//! These tests verify thread-safety and concurrent operation:
//! - The semaphore bound on parallel panel sweeps
//! - Overlap protection for slow panels
//! - Concurrent commands from cloned handles
//! - Alert dedup under parallel sweeps

use std::sync::Arc;
use std::time::{Duration, Instant};

use panel_monitoring::actors::{DispatcherHandle, MonitorHandle};
use panel_monitoring::config::Config;
use panel_monitoring::panel::VirtualizorClient;
use panel_monitoring::storage::MemoryStore;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_semaphore_bounds_concurrent_panel_sweeps() {
    // Every listing takes 200ms, six panels, two permits: the tick
    // cannot finish in fewer than three batches
    let panel = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("act", "vs"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "vs": {} }))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&panel)
        .await;

    let store = Arc::new(MemoryStore::new());
    for i in 0..6 {
        seed_profile(store.as_ref(), &panel.uri(), 7, &format!("panel {i}")).await;
    }

    let config: Config = serde_json::from_str(
        r#"{ "check_interval_secs": 3600, "max_concurrent_panels": 2 }"#,
    )
    .unwrap();

    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = DispatcherHandle::spawn(notifier.clone());

    let start = Instant::now();
    let monitor = MonitorHandle::spawn(
        &config,
        store.clone(),
        Arc::new(VirtualizorClient::new()),
        dispatcher,
    );

    let stats = monitor.tick_now().await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(stats.panels_swept, 6, "all panels swept: {stats:?}");
    assert!(
        elapsed >= Duration::from_millis(550),
        "two permits cannot sweep six delayed panels this fast: {elapsed:?}"
    );

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_slow_panel_is_not_polled_twice() {
    // One panel whose listing takes 500ms
    let panel = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("act", "vs"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "vs": {} }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&panel)
        .await;

    let store = Arc::new(MemoryStore::new());
    seed_profile(store.as_ref(), &panel.uri(), 7, "slow panel").await;

    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = DispatcherHandle::spawn(notifier.clone());
    let monitor = MonitorHandle::spawn(
        &test_config(),
        store.clone(),
        Arc::new(VirtualizorClient::new()),
        dispatcher,
    );

    // The startup sweep is still inside the 500ms listing when this
    // tick arrives, so the panel must be skipped rather than re-swept
    tokio::time::sleep(Duration::from_millis(150)).await;
    let stats = monitor.tick_now().await.unwrap();

    assert_eq!(stats.panels_skipped, 1, "overlap was not skipped: {stats:?}");
    assert_eq!(stats.panels_swept, 1, "startup sweep still completes: {stats:?}");

    let requests = panel.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1, "panel was polled concurrently with itself");

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_ticks_from_cloned_handles() {
    let panel = MockServer::start().await;
    mount_list(&panel, vps_list_body(&[("101", "web01", "203.0.113.10")])).await;
    mount_details(&panel, "101", vps_details_body("101", 90.0, 100.0, 10.0, 100.0, "0")).await;

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

    // Fire ticks from two clones at once; commands serialize in the actor
    let m1 = monitor.clone();
    let m2 = monitor.clone();
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { m1.tick_now().await }),
        tokio::spawn(async move { m2.tick_now().await }),
    );
    r1.unwrap().unwrap();
    r2.unwrap().unwrap();

    // However the ticks interleave, the breach alerts exactly once
    let sent = wait_for_sent(&notifier, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let sent_after = notifier.sent.lock().await.clone();
    assert_eq!(sent.len(), 1, "got: {sent:?}");
    assert_eq!(sent_after.len(), 1, "got: {sent_after:?}");

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_parallel_panel_sweeps_produce_no_duplicate_alerts() {
    // Three breaching panels swept in parallel, two ticks
    let mut servers = Vec::new();
    let store = Arc::new(MemoryStore::new());

    for i in 0..3 {
        let panel = MockServer::start().await;
        let vpsid = format!("10{i}");
        mount_list(
            &panel,
            vps_list_body(&[(vpsid.as_str(), "web01", "203.0.113.10")]),
        )
        .await;
        mount_details(
            &panel,
            &vpsid,
            vps_details_body(&vpsid, 90.0, 100.0, 10.0, 100.0, "0"),
        )
        .await;
        seed_profile(store.as_ref(), &panel.uri(), 7, &format!("panel {i}")).await;
        servers.push(panel);
    }

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

    // One alert per panel, none lost, none repeated
    let sent = wait_for_sent(&notifier, 3).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let sent_after = notifier.sent.lock().await.clone();
    assert_eq!(sent.len(), 3, "got: {sent:?}");
    assert_eq!(sent_after.len(), 3, "got: {sent_after:?}");
    assert!(sent.iter().all(|(_, text)| text.contains("Disk WARN")));

    monitor.shutdown().await.unwrap();
}
