//! Inventory Service trait and the records the driver reads from it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// OBM service name used by nodes without real out-of-band management.
pub const NOOP_OBM_SERVICE: &str = "noop-obm-service";

/// A named pool of interchangeable nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sku {
    /// SKU identifier.
    pub id: String,
    /// Human-readable SKU name.
    #[serde(default)]
    pub name: String,
}

/// A node as listed by the Inventory Service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node identifier.
    pub id: String,
    /// Node name, if the service reports one.
    #[serde(default)]
    pub name: Option<String>,
    /// Tags currently applied to the node.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Node {
    /// Whether the node carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Out-of-band management descriptor of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObmDescriptor {
    /// OBM service kind, e.g. `ipmi-obm-service` or `noop-obm-service`.
    pub service: String,
}

impl ObmDescriptor {
    /// Whether this descriptor stands for "no real OBM".
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.service == NOOP_OBM_SERVICE
    }
}

/// One record returned by a lookup query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRecord {
    /// IP address bound to one of the node's interfaces.
    #[serde(default)]
    pub ip_address: Option<String>,
    /// MAC address of the interface.
    #[serde(default)]
    pub mac_address: Option<String>,
    /// Node the record belongs to.
    #[serde(default)]
    pub node: Option<String>,
}

/// Workflow instance status as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    /// Raw status string (`running`, `succeeded`, `failed`, ...).
    #[serde(alias = "_status")]
    pub status: String,
}

/// Operations the driver needs from the Inventory Service.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Liveness probe.
    async fn get_config(&self) -> Result<(), ClientError>;

    /// List every SKU.
    async fn list_skus(&self) -> Result<Vec<Sku>, ClientError>;

    /// List the nodes belonging to a SKU.
    async fn list_sku_nodes(&self, sku_id: &str) -> Result<Vec<Node>, ClientError>;

    /// Add a tag to a node.
    async fn tag_node(&self, node_id: &str, tag: &str) -> Result<(), ClientError>;

    /// Delete a node from the inventory.
    async fn delete_node(&self, node_id: &str) -> Result<(), ClientError>;

    /// Submit a named workflow against a node, returning the instance ID.
    async fn submit_workflow(&self, node_id: &str, name: &str) -> Result<String, ClientError>;

    /// Current status of a workflow instance.
    async fn workflow_status(&self, instance_id: &str) -> Result<WorkflowStatus, ClientError>;

    /// OBM descriptors configured for a node.
    async fn node_obms(&self, node_id: &str) -> Result<Vec<ObmDescriptor>, ClientError>;

    /// Lookup records matching a node ID, MAC or IP.
    async fn lookup(&self, query: &str) -> Result<Vec<LookupRecord>, ClientError>;
}
