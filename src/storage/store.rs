//! Store trait definition
//!
//! This module defines the core `Store` trait that all durable state
//! implementations must implement.

use async_trait::async_trait;

use crate::{AlertPolicy, AlertState, Metric, MetricThresholds, PanelProfile, VpsRef};

use super::error::StorageResult;

/// Trait for durable state stores
///
/// The store carries everything that must survive a restart: registered
/// panel profiles, per-user alert policies, per-VPS threshold overrides
/// and the per-(panel, VPS, metric) alert state.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared across
/// concurrent sweep tasks. Alert state keys are partitioned by
/// (panel, VPS, metric), so concurrent writers never touch the same row.
///
/// ## Error Handling
///
/// Methods return `StorageResult<T>` which wraps `StorageError`.
/// Implementations should convert backend-specific errors to
/// `StorageError` variants.
#[async_trait]
pub trait Store: Send + Sync {
    /// Load the alert state for one (tuple, metric) key
    ///
    /// Returns `None` for a key that has never been written; callers
    /// substitute [`AlertState::initial`].
    async fn get_state(&self, vps_ref: &VpsRef, metric: Metric)
    -> StorageResult<Option<AlertState>>;

    /// Replace the alert state for one key (last-writer-wins upsert)
    ///
    /// The write must be atomic: a crash mid-call leaves either the old
    /// or the new row, never a mix. Callers persist state *before*
    /// handing the matching events to the dispatcher, so a failure here
    /// suppresses the notification rather than losing tracking.
    async fn put_state(&self, state: &AlertState) -> StorageResult<()>;

    /// List every registered panel profile
    async fn list_profiles(&self) -> StorageResult<Vec<PanelProfile>>;

    /// Fetch a single profile by id
    async fn get_profile(&self, id: i64) -> StorageResult<Option<PanelProfile>>;

    /// Register a new panel profile
    ///
    /// The `id` field of the argument is ignored; the store assigns the
    /// next free id and returns it.
    async fn insert_profile(&self, profile: &PanelProfile) -> StorageResult<i64>;

    /// Remove a profile and everything keyed under it
    ///
    /// Deletes the profile row, its threshold overrides and its alert
    /// state. Returns whether the profile existed.
    async fn delete_profile(&self, id: i64) -> StorageResult<bool>;

    /// Fetch the alert policy for a user
    ///
    /// Returns `None` for users that never stored one; callers fall back
    /// to the built-in defaults.
    async fn get_policy(&self, user_id: i64) -> StorageResult<Option<AlertPolicy>>;

    /// Insert or replace a user's alert policy
    ///
    /// Threshold invariants are validated before the write; an invalid
    /// policy is rejected with `StorageError::InvalidRecord`.
    async fn upsert_policy(&self, policy: &AlertPolicy) -> StorageResult<()>;

    /// Fetch the per-VPS threshold override for one (tuple, metric) key
    async fn get_override(
        &self,
        vps_ref: &VpsRef,
        metric: Metric,
    ) -> StorageResult<Option<MetricThresholds>>;

    /// Insert or replace a per-VPS threshold override
    ///
    /// Validated the same way as policies.
    async fn put_override(
        &self,
        vps_ref: &VpsRef,
        metric: Metric,
        thresholds: MetricThresholds,
    ) -> StorageResult<()>;

    /// Close the store and release resources
    async fn close(&self) -> StorageResult<()>;
}
