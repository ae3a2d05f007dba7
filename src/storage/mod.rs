//! Durable state stores
//!
//! This module provides a trait-based abstraction over everything the
//! engine must remember across restarts: registered panel profiles,
//! per-user alert policies, per-VPS threshold overrides and the
//! per-(panel, VPS, metric) alert state that dedups notifications.
//!
//! ## Design
//!
//! - **Trait-based**: the `Store` trait allows swapping implementations
//! - **Async**: all operations are async for compatibility with Tokio actors
//! - **Keyed upserts**: alert state writes are single-row atomic replaces,
//!   so a cancelled sweep never leaves a half-written record
//!
//! ## Implementations
//!
//! - **SQLite** (default): embedded database behind the `storage-sqlite`
//!   feature
//! - **In-Memory**: no persistence, for tests and feature-off builds
//!
//! ## Usage
//!
//! ```no_run
//! use panel_monitoring::storage::sqlite::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./panelmon.db").await?;
//!     // Share behind an Arc with the monitor actor
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use store::Store;
