//! Lifecycle actions across OBM backends.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::traits::{PowerClient, PowerState, ResetType};
use crate::config::PowerMechanism;
use crate::error::{DriverError, DriverResult};
use crate::inventory::{InventoryClient, NOOP_OBM_SERVICE};
use crate::workflow::{WorkflowRunner, WorkflowTiming};

/// Power lifecycle primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    PowerOn,
    GracefulShutdown,
    Reboot,
    ForceOff,
}

impl LifecycleAction {
    /// Power workflow implementing this action.
    #[must_use]
    pub fn workflow_name(self) -> &'static str {
        match self {
            Self::PowerOn => "Graph.PowerOn.Node",
            Self::GracefulShutdown | Self::ForceOff => "Graph.PowerOff.Node",
            Self::Reboot => "Graph.Reboot.Node",
        }
    }

    /// Reset type implementing this action.
    #[must_use]
    pub fn reset_type(self) -> ResetType {
        match self {
            Self::PowerOn => ResetType::On,
            Self::GracefulShutdown => ResetType::GracefulShutdown,
            Self::Reboot => ResetType::GracefulRestart,
            Self::ForceOff => ResetType::ForceOff,
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Self::PowerOn => "starting",
            Self::GracefulShutdown => "stopping",
            Self::Reboot => "restarting",
            Self::ForceOff => "killing",
        }
    }
}

/// OBM backend of a node, resolved per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerBackend {
    /// No real OBM (virtual or simulated node).
    NoOp,
    /// Managed OBM driven through power workflows.
    WorkflowDriven,
    /// Managed OBM driven through direct reset actions.
    DirectReset,
}

/// One way of carrying out lifecycle actions.
#[async_trait]
pub trait PowerStrategy: Send + Sync {
    /// Run `action` against `node_id`.
    async fn apply(&self, node_id: &str, action: LifecycleAction) -> DriverResult<()>;

    /// Current power state; never fails.
    async fn state(&self, node_id: &str) -> PowerState;
}

struct NoOpStrategy;

#[async_trait]
impl PowerStrategy for NoOpStrategy {
    async fn apply(&self, node_id: &str, action: LifecycleAction) -> DriverResult<()> {
        Err(DriverError::UnsupportedOperation {
            node_id: node_id.to_string(),
            service: NOOP_OBM_SERVICE.to_string(),
            action: action.verb(),
        })
    }

    async fn state(&self, _node_id: &str) -> PowerState {
        PowerState::Running
    }
}

struct WorkflowStrategy {
    runner: WorkflowRunner,
    power: Arc<dyn PowerClient>,
}

#[async_trait]
impl PowerStrategy for WorkflowStrategy {
    async fn apply(&self, node_id: &str, action: LifecycleAction) -> DriverResult<()> {
        self.runner
            .run(node_id, action.workflow_name(), WorkflowTiming::POWER_ACTION)
            .await
            .map(|_| ())
    }

    async fn state(&self, node_id: &str) -> PowerState {
        live_state(self.power.as_ref(), node_id).await
    }
}

struct DirectResetStrategy {
    power: Arc<dyn PowerClient>,
}

#[async_trait]
impl PowerStrategy for DirectResetStrategy {
    async fn apply(&self, node_id: &str, action: LifecycleAction) -> DriverResult<()> {
        self.power
            .reset(node_id, action.reset_type())
            .await
            .map_err(|source| DriverError::Power {
                node_id: node_id.to_string(),
                source,
            })
    }

    async fn state(&self, node_id: &str) -> PowerState {
        live_state(self.power.as_ref(), node_id).await
    }
}

async fn live_state(power: &dyn PowerClient, node_id: &str) -> PowerState {
    match power.power_state(node_id).await {
        Ok(raw) => {
            let state = PowerState::from_power_string(&raw);
            debug!(node_id, raw = %raw, state = %state, "Queried power state");
            state
        }
        Err(e) => {
            debug!(node_id, error = %e, "Power state query failed");
            PowerState::Unknown
        }
    }
}

/// Runs lifecycle verbs against whatever OBM backend a node has.
pub struct PowerController {
    inventory: Arc<dyn InventoryClient>,
    power: Arc<dyn PowerClient>,
    mechanism: PowerMechanism,
}

impl PowerController {
    /// Create a controller.
    ///
    /// `mechanism` decides how nodes with a managed OBM are driven.
    #[must_use]
    pub fn new(
        inventory: Arc<dyn InventoryClient>,
        power: Arc<dyn PowerClient>,
        mechanism: PowerMechanism,
    ) -> Self {
        Self {
            inventory,
            power,
            mechanism,
        }
    }

    /// Resolve the node's backend from its first OBM descriptor.
    ///
    /// # Errors
    /// Returns [`DriverError::NoObmDetected`] if the node has no OBM entry.
    pub async fn resolve_backend(&self, node_id: &str) -> DriverResult<PowerBackend> {
        let obms = self.inventory.node_obms(node_id).await?;
        let first = obms
            .first()
            .ok_or_else(|| DriverError::NoObmDetected(node_id.to_string()))?;

        let backend = if first.is_noop() {
            PowerBackend::NoOp
        } else {
            match self.mechanism {
                PowerMechanism::Workflow => PowerBackend::WorkflowDriven,
                PowerMechanism::Redfish => PowerBackend::DirectReset,
            }
        };
        debug!(node_id, service = %first.service, ?backend, "Resolved OBM backend");
        Ok(backend)
    }

    /// Strategy implementing a backend.
    #[must_use]
    pub fn strategy(&self, backend: PowerBackend) -> Box<dyn PowerStrategy> {
        match backend {
            PowerBackend::NoOp => Box::new(NoOpStrategy),
            PowerBackend::WorkflowDriven => Box::new(WorkflowStrategy {
                runner: WorkflowRunner::new(self.inventory.clone()),
                power: self.power.clone(),
            }),
            PowerBackend::DirectReset => Box::new(DirectResetStrategy {
                power: self.power.clone(),
            }),
        }
    }

    /// Run a lifecycle action.
    ///
    /// # Errors
    /// [`DriverError::NoObmDetected`], [`DriverError::UnsupportedOperation`] on
    /// a no-op backend, or whatever the backend's mechanism reports.
    pub async fn perform(&self, node_id: &str, action: LifecycleAction) -> DriverResult<()> {
        debug!(node_id, ?action, "Attempting power action");
        let backend = self.resolve_backend(node_id).await?;
        self.strategy(backend).apply(node_id, action).await?;
        info!(node_id, ?action, "Power action completed");
        Ok(())
    }

    /// Power the node on.
    ///
    /// # Errors
    /// See [`Self::perform`].
    pub async fn start(&self, node_id: &str) -> DriverResult<()> {
        self.perform(node_id, LifecycleAction::PowerOn).await
    }

    /// Shut the node down gracefully.
    ///
    /// # Errors
    /// See [`Self::perform`].
    pub async fn stop(&self, node_id: &str) -> DriverResult<()> {
        self.perform(node_id, LifecycleAction::GracefulShutdown).await
    }

    /// Reboot the node.
    ///
    /// # Errors
    /// See [`Self::perform`].
    pub async fn restart(&self, node_id: &str) -> DriverResult<()> {
        self.perform(node_id, LifecycleAction::Reboot).await
    }

    /// Force the node off.
    ///
    /// # Errors
    /// See [`Self::perform`].
    pub async fn kill(&self, node_id: &str) -> DriverResult<()> {
        self.perform(node_id, LifecycleAction::ForceOff).await
    }

    /// Power the node off if possible, then delete it from the inventory.
    ///
    /// Power-off failures are logged and ignored.
    ///
    /// # Errors
    /// Returns [`DriverError::DeleteFailed`] if the delete call fails.
    pub async fn remove(&self, node_id: &str) -> DriverResult<()> {
        match self.perform(node_id, LifecycleAction::GracefulShutdown).await {
            Ok(()) => {}
            Err(e @ (DriverError::UnsupportedOperation { .. } | DriverError::NoObmDetected(_))) => {
                info!(node_id, reason = %e, "Skipping power off before removal");
            }
            Err(e) => {
                warn!(node_id, error = %e, "There was an issue shutting down the server");
            }
        }

        debug!(node_id, "Removing node from RackHD");
        self.inventory
            .delete_node(node_id)
            .await
            .map_err(|source| DriverError::DeleteFailed {
                node_id: node_id.to_string(),
                source,
            })?;
        info!(node_id, "Successfully removed node from RackHD");
        Ok(())
    }

    /// Current power state of the node.
    ///
    /// # Errors
    /// Only if the OBM descriptors cannot be read; a failing live power query
    /// yields [`PowerState::Unknown`].
    pub async fn state(&self, node_id: &str) -> DriverResult<PowerState> {
        match self.resolve_backend(node_id).await {
            Ok(backend) => Ok(self.strategy(backend).state(node_id).await),
            Err(DriverError::NoObmDetected(_)) => Ok(PowerState::Unknown),
            Err(e) => Err(e),
        }
    }
}
