//! Power API trait and shared power types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Reset types accepted by the power API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetType {
    On,
    GracefulShutdown,
    GracefulRestart,
    ForceOff,
}

impl std::fmt::Display for ResetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::On => write!(f, "On"),
            Self::GracefulShutdown => write!(f, "GracefulShutdown"),
            Self::GracefulRestart => write!(f, "GracefulRestart"),
            Self::ForceOff => write!(f, "ForceOff"),
        }
    }
}

/// Machine power state derived from the node's OBM backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Running,
    Stopped,
    Unknown,
}

impl PowerState {
    /// Map a power API state string, ignoring case.
    #[must_use]
    pub fn from_power_string(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "online" | "up" | "on" => Self::Running,
            "offline" | "down" | "off" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Direct power management keyed by node identity.
#[async_trait]
pub trait PowerClient: Send + Sync {
    /// Liveness probe.
    async fn list_roles(&self) -> Result<(), ClientError>;

    /// Raw power state string of a node's system.
    async fn power_state(&self, node_id: &str) -> Result<String, ClientError>;

    /// Issue a synchronous reset action.
    async fn reset(&self, node_id: &str, reset_type: ResetType) -> Result<(), ClientError>;
}
