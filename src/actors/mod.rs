//! Actor-based monitoring pipeline
//!
//! Each actor runs as an independent async task communicating via Tokio
//! channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!                  ┌─────────────────┐
//!                  │   Hub (main)    │
//!                  └────────┬────────┘
//!                           │ spawns
//!              ┌────────────┴────────────┐
//!              │                         │
//!      ┌───────▼────────┐       ┌────────▼────────┐
//!      │  MonitorActor  │       │ DispatcherActor │
//!      │  (sweep timer) │       │ (delivery)      │
//!      └───────┬────────┘       └────────▲────────┘
//!              │ spawns                  │ mpsc (AlertEvent)
//!      ┌───────▼────────┐               │
//!      │ sweep task per │───────────────┘
//!      │ panel (bounded)│
//!      └───────┬────────┘
//!              │ upsert before dispatch
//!      ┌───────▼────────┐
//!      │  Alert Store   │
//!      └────────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **MonitorActor**: Owns the sweep timer, enumerates panel profiles and
//!   spawns bounded per-panel sweep tasks that fetch, evaluate and persist
//! - **DispatcherActor**: Renders queued alert events and delivers them
//!   through the configured notifier
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Events**: Sweep tasks queue alert events onto the dispatcher channel
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod dispatcher;
pub mod messages;
pub mod monitor;

pub use dispatcher::{DispatcherActor, DispatcherHandle};
pub use messages::{DispatcherCommand, MonitorCommand, MonitorStats, SweepStats};
pub use monitor::{MonitorActor, MonitorHandle};
