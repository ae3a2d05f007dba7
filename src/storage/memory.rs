//! In-memory store (no persistence)
//!
//! This store keeps all state in process memory. It's useful for:
//! - Testing without database dependencies
//! - Builds with the `storage-sqlite` feature disabled
//!
//! ## Limitations
//!
//! - **No persistence**: restart loses all dedup state, so standing
//!   breaches re-alert on the first sweep after a restart

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::panel::is_valid_base_url;
use crate::{AlertPolicy, AlertState, Metric, MetricThresholds, PanelProfile, VpsRef};

use super::error::{StorageError, StorageResult};
use super::store::Store;

type StateKey = (VpsRef, Metric);

/// In-memory store backed by hash maps
///
/// Locks are held only for synchronous map operations, never across an
/// await point.
pub struct MemoryStore {
    states: RwLock<HashMap<StateKey, AlertState>>,
    profiles: RwLock<HashMap<i64, PanelProfile>>,
    policies: RwLock<HashMap<i64, AlertPolicy>>,
    overrides: RwLock<HashMap<StateKey, MetricThresholds>>,
    next_profile_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            profiles: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
            overrides: RwLock::new(HashMap::new()),
            next_profile_id: AtomicI64::new(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_state(
        &self,
        vps_ref: &VpsRef,
        metric: Metric,
    ) -> StorageResult<Option<AlertState>> {
        let states = self.states.read().await;
        Ok(states.get(&(vps_ref.clone(), metric)).cloned())
    }

    async fn put_state(&self, state: &AlertState) -> StorageResult<()> {
        let mut states = self.states.write().await;
        states.insert((state.vps_ref.clone(), state.metric), state.clone());
        Ok(())
    }

    async fn list_profiles(&self) -> StorageResult<Vec<PanelProfile>> {
        let profiles = self.profiles.read().await;
        let mut list: Vec<PanelProfile> = profiles.values().cloned().collect();
        list.sort_by_key(|p| p.id);
        Ok(list)
    }

    async fn get_profile(&self, id: i64) -> StorageResult<Option<PanelProfile>> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(&id).cloned())
    }

    async fn insert_profile(&self, profile: &PanelProfile) -> StorageResult<i64> {
        if !is_valid_base_url(&profile.base_url) {
            return Err(StorageError::InvalidRecord(format!(
                "not an http(s) url: {}",
                profile.base_url
            )));
        }

        let id = self.next_profile_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = profile.clone();
        stored.id = id;

        let mut profiles = self.profiles.write().await;
        profiles.insert(id, stored);
        Ok(id)
    }

    async fn delete_profile(&self, id: i64) -> StorageResult<bool> {
        let existed = {
            let mut profiles = self.profiles.write().await;
            profiles.remove(&id).is_some()
        };

        // Cascade: drop everything keyed under the panel
        let mut states = self.states.write().await;
        states.retain(|(vps_ref, _), _| vps_ref.panel_id != id);
        drop(states);

        let mut overrides = self.overrides.write().await;
        overrides.retain(|(vps_ref, _), _| vps_ref.panel_id != id);

        Ok(existed)
    }

    async fn get_policy(&self, user_id: i64) -> StorageResult<Option<AlertPolicy>> {
        let policies = self.policies.read().await;
        Ok(policies.get(&user_id).cloned())
    }

    async fn upsert_policy(&self, policy: &AlertPolicy) -> StorageResult<()> {
        policy.disk.validate()?;
        policy.bandwidth.validate()?;

        let mut policies = self.policies.write().await;
        policies.insert(policy.user_id, policy.clone());
        Ok(())
    }

    async fn get_override(
        &self,
        vps_ref: &VpsRef,
        metric: Metric,
    ) -> StorageResult<Option<MetricThresholds>> {
        let overrides = self.overrides.read().await;
        Ok(overrides.get(&(vps_ref.clone(), metric)).copied())
    }

    async fn put_override(
        &self,
        vps_ref: &VpsRef,
        metric: Metric,
        thresholds: MetricThresholds,
    ) -> StorageResult<()> {
        thresholds.validate()?;

        let mut overrides = self.overrides.write().await;
        overrides.insert((vps_ref.clone(), metric), thresholds);
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory store (no-op)");
        Ok(())
    }
}
