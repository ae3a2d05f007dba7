//! SQLite store implementation
//!
//! This module provides a SQLite-based implementation of the `Store`
//! trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Reads stay fast while a sweep writes state
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Characteristics
//!
//! The write rate is low (one upsert per monitored VPS metric per
//! sweep), so a single SQLite file comfortably covers hundreds of
//! panels. The important property is durability: the dedup state must
//! survive restarts, or every standing breach re-alerts.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use crate::panel::is_valid_base_url;
use crate::{AlertPolicy, AlertState, Metric, MetricThresholds, PanelProfile, VpsRef};

use super::error::{StorageError, StorageResult};
use super::schema::{AlertStateRow, OverrideRow, PolicyRow};
use super::store::Store;

/// SQLite-backed store
///
/// Keeps profiles, policies, overrides and alert state in a single
/// local database file.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path`
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for concurrent access (WAL mode, busy timeout)
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("opening sqlite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_state(
        &self,
        vps_ref: &VpsRef,
        metric: Metric,
    ) -> StorageResult<Option<AlertState>> {
        let row = sqlx::query(
            r#"
            SELECT panel_id, vps_id, metric, last_pct, last_level,
                   last_suspended, last_notified_at
            FROM alert_state
            WHERE panel_id = ? AND vps_id = ? AND metric = ?
            "#,
        )
        .bind(vps_ref.panel_id)
        .bind(&vps_ref.vps_id)
        .bind(metric.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        match row {
            Some(row) => {
                let state = AlertStateRow {
                    panel_id: row.get("panel_id"),
                    vps_id: row.get("vps_id"),
                    metric: row.get("metric"),
                    last_pct: row.get("last_pct"),
                    last_level: row.get("last_level"),
                    last_suspended: row.get("last_suspended"),
                    last_notified_at: row.get("last_notified_at"),
                }
                .into_state()?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, state), fields(vps = %state.vps_ref, metric = %state.metric))]
    async fn put_state(&self, state: &AlertState) -> StorageResult<()> {
        let row = AlertStateRow::from_state(state);

        sqlx::query(
            r#"
            INSERT INTO alert_state (
                panel_id, vps_id, metric, last_pct, last_level,
                last_suspended, last_notified_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (panel_id, vps_id, metric) DO UPDATE SET
                last_pct = excluded.last_pct,
                last_level = excluded.last_level,
                last_suspended = excluded.last_suspended,
                last_notified_at = excluded.last_notified_at
            "#,
        )
        .bind(row.panel_id)
        .bind(&row.vps_id)
        .bind(&row.metric)
        .bind(row.last_pct)
        .bind(&row.last_level)
        .bind(row.last_suspended)
        .bind(row.last_notified_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        debug!("alert state persisted");
        Ok(())
    }

    async fn list_profiles(&self) -> StorageResult<Vec<PanelProfile>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_user_id, title, base_url, api_key, api_pass, verify_tls
            FROM panel_profiles
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| PanelProfile {
                id: row.get("id"),
                owner_user_id: row.get("owner_user_id"),
                title: row.get("title"),
                base_url: row.get("base_url"),
                api_key: row.get("api_key"),
                api_pass: row.get("api_pass"),
                verify_tls: row.get("verify_tls"),
            })
            .collect())
    }

    async fn get_profile(&self, id: i64) -> StorageResult<Option<PanelProfile>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_user_id, title, base_url, api_key, api_pass, verify_tls
            FROM panel_profiles
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(row.map(|row| PanelProfile {
            id: row.get("id"),
            owner_user_id: row.get("owner_user_id"),
            title: row.get("title"),
            base_url: row.get("base_url"),
            api_key: row.get("api_key"),
            api_pass: row.get("api_pass"),
            verify_tls: row.get("verify_tls"),
        }))
    }

    #[instrument(skip(self, profile), fields(owner = profile.owner_user_id))]
    async fn insert_profile(&self, profile: &PanelProfile) -> StorageResult<i64> {
        if !is_valid_base_url(&profile.base_url) {
            return Err(StorageError::InvalidRecord(format!(
                "not an http(s) url: {}",
                profile.base_url
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO panel_profiles (
                owner_user_id, title, base_url, api_key, api_pass, verify_tls
            )
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(profile.owner_user_id)
        .bind(&profile.title)
        .bind(&profile.base_url)
        .bind(&profile.api_key)
        .bind(&profile.api_pass)
        .bind(profile.verify_tls)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let id = result.last_insert_rowid();
        info!("panel profile {} registered", id);
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn delete_profile(&self, id: i64) -> StorageResult<bool> {
        // One transaction so the profile and everything keyed under it
        // disappear together
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        sqlx::query("DELETE FROM alert_state WHERE panel_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        sqlx::query("DELETE FROM threshold_overrides WHERE panel_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let result = sqlx::query("DELETE FROM panel_profiles WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let existed = result.rows_affected() > 0;
        if existed {
            info!("panel profile {} deleted", id);
        }
        Ok(existed)
    }

    async fn get_policy(&self, user_id: i64) -> StorageResult<Option<AlertPolicy>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, enabled, disk_warn_pct, disk_critical_pct,
                   bandwidth_warn_pct, bandwidth_critical_pct, suspend_alerts
            FROM alert_policies
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        match row {
            Some(row) => {
                let policy = PolicyRow {
                    user_id: row.get("user_id"),
                    enabled: row.get("enabled"),
                    disk_warn_pct: row.get("disk_warn_pct"),
                    disk_critical_pct: row.get("disk_critical_pct"),
                    bandwidth_warn_pct: row.get("bandwidth_warn_pct"),
                    bandwidth_critical_pct: row.get("bandwidth_critical_pct"),
                    suspend_alerts: row.get("suspend_alerts"),
                }
                .into_policy()?;
                Ok(Some(policy))
            }
            None => Ok(None),
        }
    }

    async fn upsert_policy(&self, policy: &AlertPolicy) -> StorageResult<()> {
        policy.disk.validate()?;
        policy.bandwidth.validate()?;

        let row = PolicyRow::from_policy(policy);

        sqlx::query(
            r#"
            INSERT INTO alert_policies (
                user_id, enabled, disk_warn_pct, disk_critical_pct,
                bandwidth_warn_pct, bandwidth_critical_pct, suspend_alerts
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                enabled = excluded.enabled,
                disk_warn_pct = excluded.disk_warn_pct,
                disk_critical_pct = excluded.disk_critical_pct,
                bandwidth_warn_pct = excluded.bandwidth_warn_pct,
                bandwidth_critical_pct = excluded.bandwidth_critical_pct,
                suspend_alerts = excluded.suspend_alerts
            "#,
        )
        .bind(row.user_id)
        .bind(row.enabled)
        .bind(row.disk_warn_pct)
        .bind(row.disk_critical_pct)
        .bind(row.bandwidth_warn_pct)
        .bind(row.bandwidth_critical_pct)
        .bind(row.suspend_alerts)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    async fn get_override(
        &self,
        vps_ref: &VpsRef,
        metric: Metric,
    ) -> StorageResult<Option<MetricThresholds>> {
        let row = sqlx::query(
            r#"
            SELECT panel_id, vps_id, metric, warn_pct, critical_pct
            FROM threshold_overrides
            WHERE panel_id = ? AND vps_id = ? AND metric = ?
            "#,
        )
        .bind(vps_ref.panel_id)
        .bind(&vps_ref.vps_id)
        .bind(metric.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        match row {
            Some(row) => {
                let thresholds = OverrideRow {
                    panel_id: row.get("panel_id"),
                    vps_id: row.get("vps_id"),
                    metric: row.get("metric"),
                    warn_pct: row.get("warn_pct"),
                    critical_pct: row.get("critical_pct"),
                }
                .into_thresholds()?;
                Ok(Some(thresholds))
            }
            None => Ok(None),
        }
    }

    async fn put_override(
        &self,
        vps_ref: &VpsRef,
        metric: Metric,
        thresholds: MetricThresholds,
    ) -> StorageResult<()> {
        thresholds.validate()?;

        sqlx::query(
            r#"
            INSERT INTO threshold_overrides (panel_id, vps_id, metric, warn_pct, critical_pct)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (panel_id, vps_id, metric) DO UPDATE SET
                warn_pct = excluded.warn_pct,
                critical_pct = excluded.critical_pct
            "#,
        )
        .bind(vps_ref.panel_id)
        .bind(&vps_ref.vps_id)
        .bind(metric.as_str())
        .bind(i64::from(thresholds.warn_pct))
        .bind(i64::from(thresholds.critical_pct))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing sqlite store");
        self.pool.close().await;
        Ok(())
    }
}
