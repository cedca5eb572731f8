//! Error types for the RackHD driver.
//!
//! [`ClientError`] is what the HTTP collaborators return. [`DriverError`] is the
//! taxonomy the orchestration core surfaces to its callers; collaborator
//! failures are carried as the source of the variant that describes what the
//! core was doing when they happened.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the Inventory Service and power API clients.
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Response body lacked a field the caller needs.
    #[error("Response is missing field '{0}'")]
    MissingField(&'static str),

    /// Endpoint could not be turned into a URL.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by the driver core.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Caller supplied conflicting or missing options.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Liveness probe against one of the APIs failed.
    #[error("The {api} API endpoint {endpoint} is not accessible")]
    ServiceUnreachable {
        api: &'static str,
        endpoint: String,
        #[source]
        source: ClientError,
    },

    /// No SKU with the requested name.
    #[error("No matching SKU found for name '{0}'")]
    NotFound(String),

    /// Every node in the pool already carries the reservation tag.
    #[error("No suitable node found in SKU {sku_id}: all {pool_size} nodes are tagged '{tag}'")]
    NoAvailableNode {
        sku_id: String,
        tag: String,
        pool_size: usize,
    },

    /// Workflow submission was rejected.
    #[error("Failed to submit workflow {workflow} to node {node_id}")]
    SubmitFailed {
        node_id: String,
        workflow: String,
        #[source]
        source: ClientError,
    },

    /// A status poll failed at the transport or protocol level.
    #[error("Failed to poll status of workflow instance {instance_id}")]
    PollError {
        instance_id: String,
        #[source]
        source: ClientError,
    },

    /// Workflow reached a terminal status other than `succeeded`.
    #[error("Workflow instance {instance_id} appears to have failed (status '{status}')")]
    WorkflowFailed { instance_id: String, status: String },

    /// No terminal status observed before the deadline.
    #[error(
        "Timeout after {timeout:?} waiting for workflow instance {instance_id} \
         (last status: {last_status})"
    )]
    WorkflowTimeout {
        instance_id: String,
        timeout: Duration,
        last_status: String,
    },

    /// Node has no out-of-band management descriptor.
    #[error("No OBM detected for node {0}")]
    NoObmDetected(String),

    /// Lifecycle verb does not apply to the node's OBM backend.
    #[error("OBM {service} type not supported for {action} (node {node_id})")]
    UnsupportedOperation {
        node_id: String,
        service: String,
        action: &'static str,
    },

    /// Address lookup produced no IP addresses, or no candidates were given.
    #[error(
        "No IP addresses are associated with {}",
        .node_id.as_ref().map_or_else(|| "the request".to_string(), |id| format!("node {id}"))
    )]
    NoAddressesFound { node_id: Option<String> },

    /// None of the candidate addresses accepted a connection.
    #[error("None of {candidates:?} accepted connections on port {port}")]
    Unreachable { candidates: Vec<String>, port: u16 },

    /// A remote key-installation step failed.
    #[error("SSH bootstrap step '{step}' failed on {host}: {message}")]
    BootstrapFailed {
        host: String,
        step: &'static str,
        message: String,
    },

    /// Direct power action or query failed.
    #[error("Power API error for node {node_id}")]
    Power {
        node_id: String,
        #[source]
        source: ClientError,
    },

    /// Node could not be removed from the inventory.
    #[error("Failed to remove node {node_id} from RackHD")]
    DeleteFailed {
        node_id: String,
        #[source]
        source: ClientError,
    },

    /// Local key pair could not be created or read.
    #[error("SSH key error: {0}")]
    Key(String),

    /// Any other Inventory Service failure.
    #[error("Inventory Service error: {0}")]
    Inventory(#[from] ClientError),
}

/// Convenience alias used throughout the driver core.
pub type DriverResult<T> = Result<T, DriverError>;
