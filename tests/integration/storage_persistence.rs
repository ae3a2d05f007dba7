//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Alert state survives a process restart, so alerts are not repeated
//! - A level change that happened while the process was down still alerts
//! - Policies and overrides round-trip through SQLite

use std::sync::Arc;

use panel_monitoring::actors::{DispatcherHandle, MonitorHandle};
use panel_monitoring::panel::VirtualizorClient;
use panel_monitoring::storage::Store;
use panel_monitoring::storage::sqlite::SqliteStore;
use panel_monitoring::{AlertPolicy, Metric, MetricThresholds, UsageLevel, VpsRef};
use tempfile::tempdir;
use wiremock::MockServer;

use crate::helpers::*;

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_alert_state_survives_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("panelmon.db");

    let panel = MockServer::start().await;
    mount_list(&panel, vps_list_body(&[("101", "web01", "203.0.113.10")])).await;
    mount_details(&panel, "101", vps_details_body("101", 90.0, 100.0, 10.0, 100.0, "0")).await;

    // First run: breach alerts once
    let panel_id;
    {
        let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());
        panel_id = seed_profile(store.as_ref(), &panel.uri(), 7, "prod panel").await;

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
        assert_eq!(sent.len(), 1, "got: {sent:?}");
        assert!(sent[0].1.contains("Disk WARN"), "got: {}", sent[0].1);

        monitor.shutdown().await.unwrap();
        store.close().await.unwrap();
    }

    // Second run on the same database: profile and state are still there
    let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());

    let profiles = store.list_profiles().await.unwrap();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].id, panel_id);

    let state = store
        .get_state(&VpsRef::new(panel_id, "101"), Metric::Disk)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.last_level, UsageLevel::Warn);
    assert_eq!(state.last_pct, 90);

    // The unchanged breach must not alert again
    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = DispatcherHandle::spawn(notifier.clone());
    let monitor = MonitorHandle::spawn(
        &test_config(),
        store.clone(),
        Arc::new(VirtualizorClient::new()),
        dispatcher,
    );

    monitor.tick_now().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert_eq!(
        notifier.sent.lock().await.len(),
        0,
        "restart must not repeat a delivered alert"
    );

    monitor.shutdown().await.unwrap();
    store.close().await.unwrap();
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_recovery_during_downtime_alerts_after_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("panelmon.db");

    let panel = MockServer::start().await;
    mount_list(&panel, vps_list_body(&[("101", "web01", "203.0.113.10")])).await;
    mount_details(&panel, "101", vps_details_body("101", 90.0, 100.0, 10.0, 100.0, "0")).await;

    // First run records the breach
    {
        let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());
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
        let sent = wait_for_sent(&notifier, 1).await;
        assert_eq!(sent.len(), 1, "got: {sent:?}");

        monitor.shutdown().await.unwrap();
        store.close().await.unwrap();
    }

    // Usage drops while the process is down
    panel.reset().await;
    mount_list(&panel, vps_list_body(&[("101", "web01", "203.0.113.10")])).await;
    mount_details(&panel, "101", vps_details_body("101", 50.0, 100.0, 10.0, 100.0, "0")).await;

    // Second run sees warn -> none and sends the recovery
    let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());
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
    assert_eq!(sent.len(), 1, "got: {sent:?}");
    assert!(sent[0].1.contains("Disk recovered"), "got: {}", sent[0].1);

    let state = store
        .get_state(&VpsRef::new(1, "101"), Metric::Disk)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.last_level, UsageLevel::None);
    assert_eq!(state.last_pct, 50);

    monitor.shutdown().await.unwrap();
    store.close().await.unwrap();
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_policies_and_overrides_round_trip() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("panelmon.db");

    let policy = AlertPolicy {
        user_id: 9,
        enabled: false,
        disk: MetricThresholds::new(70, 90).unwrap(),
        bandwidth: MetricThresholds::new(60, 80).unwrap(),
        suspend_alerts: false,
    };
    let vps_ref = VpsRef::new(3, "vm-77");
    let override_thresholds = MetricThresholds::new(40, 55).unwrap();

    {
        let store = SqliteStore::new(&db_path).await.unwrap();
        store.upsert_policy(&policy).await.unwrap();
        store
            .put_override(&vps_ref, Metric::Bandwidth, override_thresholds)
            .await
            .unwrap();
        store.close().await.unwrap();
    }

    // Reopen runs the migrations again and reads everything back
    let store = SqliteStore::new(&db_path).await.unwrap();

    let loaded = store.get_policy(9).await.unwrap().unwrap();
    assert_eq!(loaded.user_id, policy.user_id);
    assert_eq!(loaded.enabled, policy.enabled);
    assert_eq!(loaded.disk, policy.disk);
    assert_eq!(loaded.bandwidth, policy.bandwidth);
    assert_eq!(loaded.suspend_alerts, policy.suspend_alerts);

    let loaded_override = store
        .get_override(&vps_ref, Metric::Bandwidth)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded_override, override_thresholds);

    // The other metric has no override
    assert_eq!(store.get_override(&vps_ref, Metric::Disk).await.unwrap(), None);

    store.close().await.unwrap();
}
