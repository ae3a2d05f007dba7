//! Panel client abstraction
//!
//! A panel is the remote virtualization control plane that knows about
//! the user's VPS instances. The `PanelClient` trait is the seam
//! between the monitoring engine and any concrete panel API; the
//! production implementation speaks the Virtualizor enduser API
//! (`virtualizor` module).
//!
//! ## Error taxonomy
//!
//! Every adapter failure collapses into one of three kinds so the
//! scheduler can pick the right reaction:
//!
//! - `Unauthorized`: credentials rejected; surfaced to the owner,
//!   rate-limited per panel
//! - `Unreachable`: transient transport failure; retried next tick
//! - `MalformedResponse`: the panel answered something unusable; treated
//!   as a fetch failure, state untouched

use std::fmt;

use async_trait::async_trait;
use regex::Regex;

use crate::{MetricReading, PanelProfile, PowerAction, VpsRef, VpsSummary};

pub mod virtualizor;

pub use virtualizor::VirtualizorClient;

/// Result type alias for panel operations
pub type PanelResult<T> = Result<T, PanelError>;

/// Errors produced by panel adapters
#[derive(Debug)]
pub enum PanelError {
    /// The panel rejected the profile's credentials
    Unauthorized(String),

    /// Transport-level failure (timeout, connect error, 5xx)
    Unreachable(String),

    /// The panel answered, but the body was not usable
    MalformedResponse(String),
}

impl fmt::Display for PanelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanelError::Unauthorized(msg) => {
                write!(f, "panel rejected the credentials: {}", msg)
            }
            PanelError::Unreachable(msg) => write!(f, "panel unreachable: {}", msg),
            PanelError::MalformedResponse(msg) => {
                write!(f, "malformed panel response: {}", msg)
            }
        }
    }
}

impl std::error::Error for PanelError {}

/// Trait for panel API adapters
///
/// Implementations must be `Send + Sync`; one client instance is shared
/// across all sweep tasks and receives the profile per call, so a single
/// adapter serves any number of registered panels.
#[async_trait]
pub trait PanelClient: Send + Sync {
    /// Enumerate the VPS instances visible to the profile's credentials
    ///
    /// An account without instances yields an empty list, not an error.
    async fn list_vps(&self, profile: &PanelProfile) -> PanelResult<Vec<VpsSummary>>;

    /// Fetch the current resource snapshot for one VPS
    async fn fetch_metrics(
        &self,
        profile: &PanelProfile,
        vps_ref: &VpsRef,
    ) -> PanelResult<MetricReading>;

    /// Pass a one-shot power operation through to the panel
    async fn power_action(
        &self,
        profile: &PanelProfile,
        vps_ref: &VpsRef,
        action: PowerAction,
    ) -> PanelResult<()>;
}

/// Strip surrounding whitespace and any trailing slash from a panel URL.
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// A usable panel URL starts with an http or https scheme.
pub fn is_valid_base_url(url: &str) -> bool {
    match Regex::new(r"(?i)^https?://") {
        Ok(re) => re.is_match(url.trim()),
        Err(_) => false,
    }
}
