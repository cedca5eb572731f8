//! Machine lifecycle on top of the orchestration components.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::DriverConfig;
use crate::connectivity::{
    BootstrapOutcome, BootstrapRequest, ConnectivityBootstrapper, KeySource, PortProbe,
    RemoteShell, Ssh2Shell, TcpProbe,
};
use crate::error::{DriverError, DriverResult};
use crate::inventory::{InventoryClient, Monorail};
use crate::machine::MachineRecord;
use crate::power::{PowerClient, PowerController, PowerState, Redfish};
use crate::selector::NodeSelector;
use crate::workflow::{WorkflowRunner, WorkflowTiming};

/// Port the Docker daemon listens on once the node is provisioned.
pub const DOCKER_PORT: u16 = 2376;

/// One machine backed by one RackHD node.
pub struct Driver {
    config: DriverConfig,
    node_id: Option<String>,
    ip_address: Option<String>,
    ssh_key_path: Option<PathBuf>,
    inventory: Arc<dyn InventoryClient>,
    power: Arc<dyn PowerClient>,
    shell: Arc<dyn RemoteShell>,
    probe: Arc<dyn PortProbe>,
}

impl Driver {
    /// Create a driver talking to the configured RackHD endpoint.
    ///
    /// # Errors
    /// Returns [`DriverError::Config`] if the endpoint does not form a valid URL.
    pub fn new(config: DriverConfig) -> DriverResult<Self> {
        let inventory = Monorail::new(&config.monorail_base())
            .map_err(|e| DriverError::Config(format!("invalid RackHD endpoint: {e}")))?;
        let power = Redfish::new(&config.redfish_base())
            .map_err(|e| DriverError::Config(format!("invalid RackHD endpoint: {e}")))?;

        Ok(Self::with_clients(
            config,
            Arc::new(inventory),
            Arc::new(power),
            Arc::new(Ssh2Shell),
        ))
    }

    /// Create a driver from explicit collaborators.
    #[must_use]
    pub fn with_clients(
        config: DriverConfig,
        inventory: Arc<dyn InventoryClient>,
        power: Arc<dyn PowerClient>,
        shell: Arc<dyn RemoteShell>,
    ) -> Self {
        let node_id = config.node_id().map(str::to_string);
        Self {
            config,
            node_id,
            ip_address: None,
            ssh_key_path: None,
            inventory,
            power,
            shell,
            probe: Arc::new(TcpProbe),
        }
    }

    /// Replace the reachability probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn PortProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Restore a driver for a previously created machine.
    ///
    /// # Errors
    /// See [`Self::new`].
    pub fn from_record(record: MachineRecord) -> DriverResult<Self> {
        let mut driver = Self::new(record.config)?;
        driver.node_id = record.node_id.or(driver.node_id);
        driver.ip_address = record.ip_address;
        driver.ssh_key_path = record.ssh_key_path;
        Ok(driver)
    }

    /// Snapshot of what must survive between invocations.
    #[must_use]
    pub fn record(&self) -> MachineRecord {
        let mut record = MachineRecord::new(self.config.clone());
        record.node_id.clone_from(&self.node_id);
        record.ip_address.clone_from(&self.ip_address);
        record.ssh_key_path.clone_from(&self.ssh_key_path);
        record
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Resolved node, or an error before selection.
    ///
    /// # Errors
    /// Returns [`DriverError::Config`] if no node has been selected yet.
    pub fn node_id(&self) -> DriverResult<&str> {
        self.node_id
            .as_deref()
            .ok_or_else(|| DriverError::Config("no node has been selected".into()))
    }

    /// Validate the configuration, check both APIs answer and pick a node.
    ///
    /// # Errors
    /// - [`DriverError::Config`] for invalid options
    /// - [`DriverError::ServiceUnreachable`] if either API is down
    /// - any selection error from [`Self::select_node`]
    pub async fn pre_create_check(&mut self) -> DriverResult<()> {
        self.config.validate()?;

        self.inventory.get_config().await.map_err(|source| {
            DriverError::ServiceUnreachable {
                api: "Monorail",
                endpoint: self.config.monorail_base(),
                source,
            }
        })?;
        self.power.list_roles().await.map_err(|source| {
            DriverError::ServiceUnreachable {
                api: "Redfish",
                endpoint: self.config.redfish_base(),
                source,
            }
        })?;
        debug!(endpoint = %self.config.endpoint, "RackHD APIs are reachable");

        if self.config.ssh_key_path.is_none() {
            info!(
                user = %self.config.ssh_user,
                "No SSH key specified, will generate and install one"
            );
        }

        self.select_node().await?;
        Ok(())
    }

    /// Resolve the target to a node, reserving it from a SKU if needed.
    ///
    /// A node already resolved is returned without touching the inventory.
    ///
    /// # Errors
    /// See [`NodeSelector::select`].
    pub async fn select_node(&mut self) -> DriverResult<String> {
        if let Some(id) = &self.node_id {
            return Ok(id.clone());
        }
        let id = NodeSelector::new(self.inventory.clone())
            .select(&self.config.target)
            .await?;
        info!(node_id = %id, "Selected node");
        self.node_id = Some(id.clone());
        Ok(id)
    }

    /// Run a workflow against the node and wait for it.
    ///
    /// # Errors
    /// See [`WorkflowRunner::run`].
    pub async fn run_workflow(&self, name: &str, timing: WorkflowTiming) -> DriverResult<String> {
        let node_id = self.node_id()?;
        WorkflowRunner::new(self.inventory.clone())
            .run(node_id, name, timing)
            .await
    }

    /// Bootstrap SSH access on one of `candidates`.
    ///
    /// # Errors
    /// See [`ConnectivityBootstrapper::bootstrap`].
    pub async fn bootstrap(
        &self,
        candidates: &[String],
        request: &BootstrapRequest,
    ) -> DriverResult<BootstrapOutcome> {
        self.bootstrapper().bootstrap(candidates, request).await
    }

    /// Provision the node: optional workflow, then SSH bootstrap.
    ///
    /// # Errors
    /// Any selection, workflow or connectivity error.
    pub async fn create(&mut self) -> DriverResult<()> {
        let node_id = self.select_node().await?;

        if let Some(workflow) = self.config.workflow_name.clone() {
            info!(node_id = %node_id, workflow = %workflow, "Running provisioning workflow");
            self.run_workflow(&workflow, self.config.workflow_timing())
                .await?;
        }

        let request = self.bootstrap_request();
        let outcome = self.bootstrapper().connect(&node_id, &request).await?;

        info!(
            node_id = %node_id,
            address = %outcome.address,
            key_installed = outcome.key_installed,
            "Machine is reachable"
        );
        self.ip_address = Some(outcome.address);
        self.ssh_key_path = Some(outcome.key_path);
        Ok(())
    }

    /// Power the node on.
    ///
    /// # Errors
    /// See [`PowerController::start`].
    pub async fn start(&self) -> DriverResult<()> {
        self.power_controller().start(self.node_id()?).await
    }

    /// Shut the node down gracefully.
    ///
    /// # Errors
    /// See [`PowerController::stop`].
    pub async fn stop(&self) -> DriverResult<()> {
        self.power_controller().stop(self.node_id()?).await
    }

    /// Reboot the node.
    ///
    /// # Errors
    /// See [`PowerController::restart`].
    pub async fn restart(&self) -> DriverResult<()> {
        self.power_controller().restart(self.node_id()?).await
    }

    /// Force the node off.
    ///
    /// # Errors
    /// See [`PowerController::kill`].
    pub async fn kill(&self) -> DriverResult<()> {
        self.power_controller().kill(self.node_id()?).await
    }

    /// Power the node off and delete it from RackHD.
    ///
    /// # Errors
    /// See [`PowerController::remove`].
    pub async fn remove(&self) -> DriverResult<()> {
        self.power_controller().remove(self.node_id()?).await
    }

    /// Current power state.
    ///
    /// # Errors
    /// See [`PowerController::state`].
    pub async fn state(&self) -> DriverResult<PowerState> {
        self.power_controller().state(self.node_id()?).await
    }

    /// Address SSH was reached on.
    ///
    /// # Errors
    /// Returns [`DriverError::Config`] before a successful [`Self::create`].
    pub fn ip(&self) -> DriverResult<&str> {
        self.ip_address
            .as_deref()
            .ok_or_else(|| DriverError::Config("machine has no IP address yet".into()))
    }

    /// Docker daemon URL.
    ///
    /// # Errors
    /// See [`Self::ip`].
    pub fn url(&self) -> DriverResult<String> {
        Ok(format!("tcp://{}:{DOCKER_PORT}", self.ip()?))
    }

    /// Host to SSH into.
    ///
    /// # Errors
    /// See [`Self::ip`].
    pub fn ssh_hostname(&self) -> DriverResult<&str> {
        self.ip()
    }

    /// Private key to SSH in with.
    #[must_use]
    pub fn ssh_key_path(&self) -> PathBuf {
        self.ssh_key_path
            .clone()
            .unwrap_or_else(|| self.config.private_key_path())
    }

    fn bootstrap_request(&self) -> BootstrapRequest {
        let key = match &self.config.ssh_key_path {
            Some(path) => KeySource::Existing(path.clone()),
            None => KeySource::Generate(self.config.private_key_path()),
        };
        BootstrapRequest {
            ssh_user: self.config.ssh_user.clone(),
            ssh_password: self.config.ssh_password.clone(),
            ssh_port: self.config.ssh_port,
            policy: self.config.probe_policy(),
            key,
        }
    }

    fn bootstrapper(&self) -> ConnectivityBootstrapper {
        ConnectivityBootstrapper::new(self.inventory.clone(), self.shell.clone())
            .with_probe(self.probe.clone())
    }

    fn power_controller(&self) -> PowerController {
        PowerController::new(
            self.inventory.clone(),
            self.power.clone(),
            self.config.power_mechanism,
        )
    }
}
