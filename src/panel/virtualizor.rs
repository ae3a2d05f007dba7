//! Virtualizor enduser API adapter
//!
//! Speaks the JSON flavor of the Virtualizor enduser API: every call is
//! a request to `{base_url}/index.php` with `act`, `api=json` and the
//! profile's key pair as query parameters. Listing uses `act=vs`,
//! details `act=managevs&vpsid=<id>`, power operations POST
//! `act=managevs` with an `action` parameter.
//!
//! Real installations disagree about where in the response the VPS data
//! lives and what the usage fields are called, so extraction is
//! deliberately tolerant: well-known container keys first, then a
//! bounded deep scan, with alias tables for every field.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::{MetricReading, PanelProfile, PowerAction, ResourceUsage, VpsRef, VpsSummary};

use super::{PanelClient, PanelError, PanelResult, normalize_base_url};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bounds for the deep scan so a pathological payload cannot spin.
const DEEP_SCAN_NODE_LIMIT: usize = 5000;
const DEEP_SCAN_RESULT_LIMIT: usize = 500;

const LIST_CONTAINER_KEYS: [&str; 4] = ["vs", "vps", "data", "result"];
const DETAIL_CONTAINER_KEYS: [&str; 5] = ["info", "vps", "vs", "data", "result"];

const VPS_ID_KEYS: [&str; 3] = ["vpsid", "vps_id", "id"];
const HOSTNAME_KEYS: [&str; 3] = ["hostname", "name", "vps_name"];
const IP_KEYS: [&str; 3] = ["primary_ip", "ip", "ipaddress"];
const DISK_USED_KEYS: [&str; 4] = ["disk_used", "used_disk", "hdd_used", "used_hdd"];
const DISK_TOTAL_KEYS: [&str; 4] = ["disk", "vps_disk", "hdd", "total_hdd"];
const BANDWIDTH_USED_KEYS: [&str; 4] = ["bandwidth_used", "bw_used", "used_bandwidth", "used_bw"];
const BANDWIDTH_TOTAL_KEYS: [&str; 4] = ["bandwidth", "bw", "total_bandwidth", "total_bw"];
const SUSPENDED_KEYS: [&str; 2] = ["suspended", "is_suspended"];

/// Production panel adapter for Virtualizor
///
/// Holds two HTTP clients so a profile with `verify_tls = false` (a
/// self-signed panel) can opt out of certificate validation without
/// affecting other profiles.
pub struct VirtualizorClient {
    client: reqwest::Client,
    insecure_client: reqwest::Client,
}

impl VirtualizorClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            insecure_client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .danger_accept_invalid_certs(true)
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    fn http(&self, profile: &PanelProfile) -> &reqwest::Client {
        if profile.verify_tls {
            &self.client
        } else {
            &self.insecure_client
        }
    }

    async fn api_request(
        &self,
        profile: &PanelProfile,
        act: &str,
        extra: &[(&str, &str)],
        method: Method,
    ) -> PanelResult<Value> {
        let endpoint = format!("{}/index.php", normalize_base_url(&profile.base_url));

        let mut query: Vec<(&str, &str)> = vec![
            ("act", act),
            ("api", "json"),
            ("apikey", profile.api_key.as_str()),
            ("apipass", profile.api_pass.as_str()),
        ];
        query.extend_from_slice(extra);

        debug!(panel = profile.id, act, "panel api request");

        let request = if method == Method::POST {
            self.http(profile).post(&endpoint)
        } else {
            self.http(profile).get(&endpoint)
        };

        let response = request
            .query(&query)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(PanelError::Unauthorized(format!("panel returned {status}")));
        }
        if status.is_server_error() {
            return Err(PanelError::Unreachable(format!("panel returned {status}")));
        }

        let body = response.text().await.map_err(map_transport_error)?;
        let payload: Value = serde_json::from_str(&body).map_err(|_| {
            PanelError::MalformedResponse("response body is not json".to_string())
        })?;

        // Virtualizor reports auth failures as HTTP 200 with an error field
        if let Some(error) = api_error_text(&payload) {
            if looks_like_auth_error(&error) {
                return Err(PanelError::Unauthorized(error));
            }
            warn!(panel = profile.id, act, "panel reported error: {}", error);
        }

        Ok(payload)
    }
}

impl Default for VirtualizorClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PanelClient for VirtualizorClient {
    #[instrument(skip(self, profile), fields(panel = profile.id))]
    async fn list_vps(&self, profile: &PanelProfile) -> PanelResult<Vec<VpsSummary>> {
        let payload = self.api_request(profile, "vs", &[], Method::GET).await?;

        let entries = pick_vps_list(&payload);
        let summaries: Vec<VpsSummary> = entries
            .iter()
            .filter_map(|entry| {
                let vps_id = vps_id_of(entry)?;
                Some(VpsSummary {
                    vps_ref: VpsRef::new(profile.id, vps_id),
                    hostname: string_field(entry, &HOSTNAME_KEYS),
                    ip: ip_field(entry),
                })
            })
            .collect();

        debug!(panel = profile.id, count = summaries.len(), "vps list fetched");
        Ok(summaries)
    }

    #[instrument(skip(self, profile), fields(panel = profile.id, vps = %vps_ref.vps_id))]
    async fn fetch_metrics(
        &self,
        profile: &PanelProfile,
        vps_ref: &VpsRef,
    ) -> PanelResult<MetricReading> {
        let payload = self
            .api_request(
                profile,
                "managevs",
                &[("vpsid", vps_ref.vps_id.as_str())],
                Method::GET,
            )
            .await?;

        let info = pick_vps_details(&payload);
        if info.is_empty() {
            return Err(PanelError::MalformedResponse(
                "no vps details in response".to_string(),
            ));
        }

        let disk = ResourceUsage::new(
            numeric_field(&info, &DISK_USED_KEYS).unwrap_or(0.0),
            numeric_field(&info, &DISK_TOTAL_KEYS).unwrap_or(0.0),
        );
        let bandwidth = ResourceUsage::new(
            numeric_field(&info, &BANDWIDTH_USED_KEYS).unwrap_or(0.0),
            numeric_field(&info, &BANDWIDTH_TOTAL_KEYS).unwrap_or(0.0),
        );
        let suspended = flag_field(&info, &SUSPENDED_KEYS).unwrap_or(false);

        Ok(MetricReading {
            vps_ref: vps_ref.clone(),
            timestamp: Utc::now(),
            disk,
            bandwidth,
            suspended,
            hostname: string_field(&info, &HOSTNAME_KEYS),
            ip: ip_field(&info),
        })
    }

    #[instrument(skip(self, profile), fields(panel = profile.id, vps = %vps_ref.vps_id, action = %action))]
    async fn power_action(
        &self,
        profile: &PanelProfile,
        vps_ref: &VpsRef,
        action: PowerAction,
    ) -> PanelResult<()> {
        self.api_request(
            profile,
            "managevs",
            &[
                ("vpsid", vps_ref.vps_id.as_str()),
                ("action", action.as_str()),
            ],
            Method::POST,
        )
        .await?;

        debug!("power action accepted");
        Ok(())
    }
}

fn map_transport_error(err: reqwest::Error) -> PanelError {
    // Drop the URL before stringifying; it carries the credentials as
    // query parameters
    let err = err.without_url();
    PanelError::Unreachable(err.to_string())
}

/// Collect the `error` field into displayable text, whatever its shape.
fn api_error_text(payload: &Value) -> Option<String> {
    let error = payload.as_object()?.get("error")?;
    let text = match error {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join("; "),
        Value::Object(map) => map
            .values()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join("; "),
        _ => return None,
    };

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn looks_like_auth_error(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["auth", "key", "unauthorized"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Find the VPS list in a response.
///
/// Panels differ: the list may sit under one of the common container
/// keys, as an array or as a map keyed by id. The bounded deep scan is
/// the fallback for everything else.
fn pick_vps_list(payload: &Value) -> Vec<Map<String, Value>> {
    if let Some(root) = payload.as_object() {
        for key in LIST_CONTAINER_KEYS {
            let entries = match root.get(key) {
                Some(Value::Array(items)) => collect_vps_like(items.iter()),
                Some(Value::Object(map)) => collect_vps_like(map.values()),
                _ => Vec::new(),
            };
            if !entries.is_empty() {
                return entries;
            }
        }
    }

    deep_find_vps_list(payload)
}

fn collect_vps_like<'a>(items: impl Iterator<Item = &'a Value>) -> Vec<Map<String, Value>> {
    items
        .filter_map(Value::as_object)
        .filter(|item| looks_like_vps(item))
        .cloned()
        .collect()
}

/// An object is VPS-shaped when it carries a vps id, or a
/// hostname/name/ip without looking like a user record.
fn looks_like_vps(item: &Map<String, Value>) -> bool {
    if VPS_ID_KEYS.iter().any(|key| item.contains_key(*key)) {
        return true;
    }

    let named = ["hostname", "name", "primary_ip", "ip"]
        .iter()
        .any(|key| item.contains_key(*key));
    named && !item.contains_key("uid")
}

/// Walk arbitrarily nested payloads looking for a collection of
/// VPS-shaped objects. Stops at the first plausible collection per
/// branch and dedupes by vps id.
fn deep_find_vps_list(payload: &Value) -> Vec<Map<String, Value>> {
    let mut found = Vec::new();
    let mut visited = 0usize;
    walk(payload, &mut found, &mut visited);

    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for item in &found {
        if let Some(id) = vps_id_of(item) {
            if seen.insert(id) {
                unique.push(item.clone());
            }
        }
    }

    // A panel that never exposes ids still gets its entries through
    if unique.is_empty() { found } else { unique }
}

fn walk(node: &Value, found: &mut Vec<Map<String, Value>>, visited: &mut usize) {
    if *visited > DEEP_SCAN_NODE_LIMIT || found.len() > DEEP_SCAN_RESULT_LIMIT {
        return;
    }
    *visited += 1;

    match node {
        Value::Array(items) => {
            if !items.is_empty() && items.iter().all(Value::is_object) {
                let hits = collect_vps_like(items.iter());
                if !hits.is_empty() {
                    found.extend(hits);
                    return;
                }
            }
            for item in items {
                walk(item, found, visited);
            }
        }
        Value::Object(map) => {
            if !map.is_empty() && map.values().all(Value::is_object) {
                let hits = collect_vps_like(map.values());
                if !hits.is_empty() {
                    found.extend(hits);
                    return;
                }
            }
            for value in map.values() {
                walk(value, found, visited);
            }
        }
        _ => {}
    }
}

/// Find the detail object in a managevs response. Falls back to the
/// top-level object when no known container matches.
fn pick_vps_details(payload: &Value) -> Map<String, Value> {
    if let Some(root) = payload.as_object() {
        for key in DETAIL_CONTAINER_KEYS {
            if let Some(Value::Object(map)) = root.get(key) {
                let marker_keys = ["vpsid", "hostname", "name", "primary_ip", "ip"];
                if marker_keys.iter().any(|k| map.contains_key(*k)) {
                    return map.clone();
                }
            }
        }
        return root.clone();
    }

    Map::new()
}

fn vps_id_of(item: &Map<String, Value>) -> Option<String> {
    for key in VPS_ID_KEYS {
        match item.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn string_field(item: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    for alias in aliases {
        match item.get(*alias) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Numeric fields arrive as numbers or numeric strings depending on the
/// panel version.
fn numeric_field(item: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    for alias in aliases {
        match item.get(*alias) {
            Some(Value::Number(n)) => {
                if let Some(value) = n.as_f64() {
                    return Some(value);
                }
            }
            Some(Value::String(s)) => {
                if let Ok(value) = s.trim().parse::<f64>() {
                    return Some(value);
                }
            }
            _ => {}
        }
    }
    None
}

fn flag_field(item: &Map<String, Value>, aliases: &[&str]) -> Option<bool> {
    aliases
        .iter()
        .find_map(|alias| item.get(*alias).and_then(parse_flag))
}

fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "" | "0" | "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// The ip may be a plain string or the first entry of a list/map of
/// addresses.
fn ip_field(item: &Map<String, Value>) -> Option<String> {
    for alias in IP_KEYS {
        match item.get(alias) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(Value::Array(items)) => {
                if let Some(ip) = items.iter().find_map(as_ip_string) {
                    return Some(ip);
                }
            }
            Some(Value::Object(map)) => {
                if let Some(ip) = map.values().find_map(as_ip_string) {
                    return Some(ip);
                }
            }
            _ => {}
        }
    }
    None
}

fn as_ip_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}
