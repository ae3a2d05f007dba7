//! Helper functions for integration tests

use async_trait::async_trait;
use panel_monitoring::PanelProfile;
use panel_monitoring::config::Config;
use panel_monitoring::notify::{Notifier, NotifyResult};
use panel_monitoring::storage::Store;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Notifier fake that records every delivery.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(i64, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipient: i64, text: &str) -> NotifyResult<()> {
        self.sent.lock().await.push((recipient, text.to_string()));
        Ok(())
    }
}

/// Config with a sweep interval long enough that only the startup sweep
/// and explicit ticks ever run during a test.
pub fn test_config() -> Config {
    serde_json::from_str(r#"{ "check_interval_secs": 3600 }"#).unwrap()
}

pub async fn seed_profile(store: &dyn Store, base_url: &str, owner: i64, title: &str) -> i64 {
    store
        .insert_profile(&PanelProfile {
            id: 0,
            owner_user_id: owner,
            title: title.to_string(),
            base_url: base_url.to_string(),
            api_key: "k".to_string(),
            api_pass: "p".to_string(),
            verify_tls: true,
        })
        .await
        .unwrap()
}

/// act=vs listing with one entry per (vpsid, hostname, ip).
pub fn vps_list_body(entries: &[(&str, &str, &str)]) -> Value {
    let mut vs = serde_json::Map::new();
    for (vpsid, hostname, ip) in entries {
        vs.insert(
            vpsid.to_string(),
            json!({ "vpsid": vpsid, "hostname": hostname, "primary_ip": ip }),
        );
    }
    json!({ "vs": vs })
}

/// act=managevs detail payload for one VPS.
pub fn vps_details_body(
    vpsid: &str,
    disk_used: f64,
    disk_total: f64,
    bw_used: f64,
    bw_total: f64,
    suspended: &str,
) -> Value {
    json!({
        "info": {
            "vpsid": vpsid,
            "hostname": format!("vps-{vpsid}"),
            "primary_ip": "203.0.113.10",
            "disk_used": disk_used,
            "disk": disk_total,
            "bandwidth_used": bw_used,
            "bandwidth": bw_total,
            "suspended": suspended
        }
    })
}

pub async fn mount_list(server: &MockServer, body: Value) {
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("act", "vs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn mount_details(server: &MockServer, vpsid: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path("/index.php"))
        .and(query_param("act", "managevs"))
        .and(query_param("vpsid", vpsid))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Telegram Bot API mock that accepts every sendMessage call.
pub async fn mount_telegram_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/bottest-token/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(server)
        .await;
}

/// Wait until the notifier recorded at least `count` deliveries.
///
/// Delivery runs through the dispatcher queue, so tests poll instead of
/// asserting immediately after a tick.
pub async fn wait_for_sent(notifier: &RecordingNotifier, count: usize) -> Vec<(i64, String)> {
    for _ in 0..100 {
        {
            let sent = notifier.sent.lock().await;
            if sent.len() >= count {
                return sent.clone();
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    notifier.sent.lock().await.clone()
}

/// Wait until the mock server saw at least `count` requests.
pub async fn wait_for_requests(server: &MockServer, count: usize) -> Vec<wiremock::Request> {
    for _ in 0..100 {
        let requests = server.received_requests().await.unwrap_or_default();
        if requests.len() >= count {
            return requests;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    server.received_requests().await.unwrap_or_default()
}
