//! Driver configuration.
//!
//! [`DriverConfig`] is the resolved set of options the driver operates on. The
//! CLI builds one from flags and environment variables; tests build one
//! directly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connectivity::ProbePolicy;
use crate::error::{DriverError, DriverResult};
use crate::workflow::WorkflowTiming;

/// Default RackHD endpoint.
pub const DEFAULT_ENDPOINT: &str = "localhost:8080";

/// Default SSH user and password for freshly installed nodes.
pub const DEFAULT_SSH_USER: &str = "root";
pub const DEFAULT_SSH_PASSWORD: &str = "root";

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default workflow poll interval in seconds.
pub const DEFAULT_WORKFLOW_POLL_SECS: u64 = 15;

/// Default workflow timeout in minutes.
pub const DEFAULT_WORKFLOW_TIMEOUT_MINS: u64 = 60;

/// Default number of connection attempts per address.
pub const DEFAULT_SSH_ATTEMPTS: u32 = 10;

/// Default SSH dial timeout / retry backoff in seconds.
pub const DEFAULT_SSH_TIMEOUT_SECS: u64 = 15;

/// API transport scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Http,
    Https,
}

impl Transport {
    /// URL scheme for this transport.
    #[must_use]
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl std::str::FromStr for Transport {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(DriverError::Config(format!(
                "transport must be http or https, got '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Which node the driver should operate on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeTarget {
    /// A specific node by ID, MAC address or IP address.
    Node(String),
    /// Any free node from the SKU with this ID.
    SkuId(String),
    /// Any free node from the SKU with this name.
    SkuName(String),
}

impl NodeTarget {
    /// Build a target from the three mutually exclusive selector options.
    ///
    /// Empty strings count as absent.
    ///
    /// # Errors
    /// Returns [`DriverError::Config`] unless exactly one selector is given.
    pub fn from_options(
        node_id: Option<String>,
        sku_id: Option<String>,
        sku_name: Option<String>,
    ) -> DriverResult<Self> {
        let present = |v: Option<String>| v.filter(|s| !s.is_empty());
        match (present(node_id), present(sku_id), present(sku_name)) {
            (None, None, None) => Err(DriverError::Config(
                "rackhd driver requires either the --node-id or --sku-[id/name] option".into(),
            )),
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(DriverError::Config(
                "rackhd driver accepts either the --node-id or --sku-[id/name] option, not both"
                    .into(),
            )),
            (None, Some(_), Some(_)) => Err(DriverError::Config(
                "rackhd driver accepts either the --sku-id or --sku-name option, not both".into(),
            )),
            (Some(id), None, None) => Ok(Self::Node(id)),
            (None, Some(id), None) => Ok(Self::SkuId(id)),
            (None, None, Some(name)) => Ok(Self::SkuName(name)),
        }
    }
}

/// Mechanism used for lifecycle actions on nodes with a managed OBM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerMechanism {
    /// Submit `Graph.*.Node` power workflows.
    #[default]
    Workflow,
    /// Issue Redfish `ComputerSystem.Reset` actions.
    Redfish,
}

impl std::str::FromStr for PowerMechanism {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "workflow" => Ok(Self::Workflow),
            "redfish" => Ok(Self::Redfish),
            other => Err(DriverError::Config(format!(
                "power mechanism must be workflow or redfish, got '{other}'"
            ))),
        }
    }
}

/// How reachability of a candidate address is probed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    /// One dial per address with the SSH timeout.
    Single,
    /// Up to `ssh_attempts` dials per address, sleeping the SSH timeout between them.
    #[default]
    Retry,
}

impl std::str::FromStr for ProbeMode {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "retry" => Ok(Self::Retry),
            other => Err(DriverError::Config(format!(
                "probe mode must be single or retry, got '{other}'"
            ))),
        }
    }
}

/// Resolved driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Machine name, used to namespace local state.
    pub machine_name: String,
    /// Root directory for local machine state.
    pub store_path: PathBuf,
    /// RackHD `host:port`.
    pub endpoint: String,
    /// API transport scheme.
    pub transport: Transport,
    /// Node or SKU selector.
    pub target: NodeTarget,
    /// Workflow to run after the node is chosen.
    pub workflow_name: Option<String>,
    /// SSH user.
    pub ssh_user: String,
    /// SSH password used to install the generated key.
    pub ssh_password: String,
    /// SSH port.
    pub ssh_port: u16,
    /// Existing private key; when set no key is generated or installed.
    pub ssh_key_path: Option<PathBuf>,
    /// Workflow timeout in minutes.
    pub workflow_timeout_mins: u64,
    /// Workflow poll interval in seconds.
    pub workflow_poll_secs: u64,
    /// Connection attempts per address.
    pub ssh_attempts: u32,
    /// Dial timeout / retry backoff in seconds.
    pub ssh_timeout_secs: u64,
    /// Mechanism for lifecycle actions on managed nodes.
    pub power_mechanism: PowerMechanism,
    /// Reachability probe policy.
    pub probe_mode: ProbeMode,
}

impl DriverConfig {
    /// Create a configuration with defaults for everything but the target.
    #[must_use]
    pub fn new(
        machine_name: impl Into<String>,
        store_path: impl Into<PathBuf>,
        target: NodeTarget,
    ) -> Self {
        Self {
            machine_name: machine_name.into(),
            store_path: store_path.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            transport: Transport::Http,
            target,
            workflow_name: None,
            ssh_user: DEFAULT_SSH_USER.to_string(),
            ssh_password: DEFAULT_SSH_PASSWORD.to_string(),
            ssh_port: DEFAULT_SSH_PORT,
            ssh_key_path: None,
            workflow_timeout_mins: DEFAULT_WORKFLOW_TIMEOUT_MINS,
            workflow_poll_secs: DEFAULT_WORKFLOW_POLL_SECS,
            ssh_attempts: DEFAULT_SSH_ATTEMPTS,
            ssh_timeout_secs: DEFAULT_SSH_TIMEOUT_SECS,
            power_mechanism: PowerMechanism::Workflow,
            probe_mode: ProbeMode::Retry,
        }
    }

    /// Check options that can only be verified at runtime.
    ///
    /// # Errors
    /// Returns [`DriverError::Config`] for a missing key file or zero timings.
    pub fn validate(&self) -> DriverResult<()> {
        if let Some(key) = &self.ssh_key_path {
            if !key.exists() {
                return Err(DriverError::Config(format!(
                    "SSH key does not exist: {}",
                    key.display()
                )));
            }
        }
        if self.workflow_poll_secs == 0 || self.workflow_timeout_mins == 0 {
            return Err(DriverError::Config(
                "workflow timeout and poll interval must be positive".into(),
            ));
        }
        if self.ssh_attempts == 0 {
            return Err(DriverError::Config("ssh attempts must be positive".into()));
        }
        Ok(())
    }

    /// Node ID when the target names one directly.
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        match &self.target {
            NodeTarget::Node(id) => Some(id),
            NodeTarget::SkuId(_) | NodeTarget::SkuName(_) => None,
        }
    }

    /// Monorail API base URL, e.g. `http://localhost:8080/api/1.1/`.
    #[must_use]
    pub fn monorail_base(&self) -> String {
        format!("{}://{}/api/1.1/", self.transport, self.endpoint)
    }

    /// Redfish API base URL, e.g. `http://localhost:8080/redfish/v1/`.
    #[must_use]
    pub fn redfish_base(&self) -> String {
        format!("{}://{}/redfish/v1/", self.transport, self.endpoint)
    }

    /// Timing for the user-specified provisioning workflow.
    #[must_use]
    pub fn workflow_timing(&self) -> WorkflowTiming {
        WorkflowTiming::from_minutes_and_secs(self.workflow_timeout_mins, self.workflow_poll_secs)
    }

    /// Reachability probe policy derived from the SSH options.
    #[must_use]
    pub fn probe_policy(&self) -> ProbePolicy {
        let timeout = Duration::from_secs(self.ssh_timeout_secs);
        match self.probe_mode {
            ProbeMode::Single => ProbePolicy::SingleDial { timeout },
            ProbeMode::Retry => ProbePolicy::Retry {
                attempts: self.ssh_attempts,
                dial_timeout: timeout,
                backoff: timeout,
            },
        }
    }

    /// Directory holding this machine's local state.
    #[must_use]
    pub fn machine_dir(&self) -> PathBuf {
        machine_dir(&self.store_path, &self.machine_name)
    }

    /// Private key path: the configured one, or the generated `id_rsa`.
    #[must_use]
    pub fn private_key_path(&self) -> PathBuf {
        self.ssh_key_path
            .clone()
            .unwrap_or_else(|| self.machine_dir().join("id_rsa"))
    }
}

/// Directory for a named machine under a store path.
#[must_use]
pub fn machine_dir(store_path: &Path, machine_name: &str) -> PathBuf {
    store_path.join("machines").join(machine_name)
}
