//! In-memory collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::connectivity::{PortProbe, RemoteShell, ShellError, ShellSession, SshEndpoint};
use crate::error::ClientError;
use crate::inventory::{InventoryClient, LookupRecord, Node, ObmDescriptor, Sku, WorkflowStatus};
use crate::power::{PowerClient, ResetType};

fn unavailable() -> ClientError {
    ClientError::Api {
        status: 503,
        message: "service unavailable".into(),
    }
}

#[derive(Default)]
struct InventoryState {
    skus: Vec<Sku>,
    sku_nodes: HashMap<String, Vec<Node>>,
    obms: HashMap<String, Vec<ObmDescriptor>>,
    lookups: HashMap<String, Vec<LookupRecord>>,
    statuses: VecDeque<String>,
    submitted: Vec<(String, String)>,
    tagged: Vec<(String, String)>,
    deleted: Vec<String>,
    status_polls: usize,
    down: bool,
    reject_submissions: bool,
    fail_status: bool,
    fail_delete: bool,
}

/// Scriptable [`InventoryClient`].
#[derive(Default)]
pub(crate) struct FakeInventory {
    state: Mutex<InventoryState>,
}

impl FakeInventory {
    pub fn add_sku(&self, id: &str, name: &str, nodes: Vec<Node>) {
        let mut state = self.state.lock().unwrap();
        state.skus.push(Sku {
            id: id.into(),
            name: name.into(),
        });
        state.sku_nodes.insert(id.into(), nodes);
    }

    pub fn set_obm(&self, node_id: &str, services: &[&str]) {
        let obms = services
            .iter()
            .map(|s| ObmDescriptor {
                service: (*s).to_string(),
            })
            .collect();
        self.state.lock().unwrap().obms.insert(node_id.into(), obms);
    }

    pub fn set_addresses(&self, node_id: &str, addresses: &[&str]) {
        let records = addresses
            .iter()
            .map(|a| LookupRecord {
                ip_address: Some((*a).to_string()),
                mac_address: Some("52:54:00:00:00:01".into()),
                node: Some(node_id.into()),
            })
            .collect();
        self.state.lock().unwrap().lookups.insert(node_id.into(), records);
    }

    /// Statuses returned by successive polls; the last one repeats.
    pub fn set_statuses(&self, statuses: &[&str]) {
        self.state.lock().unwrap().statuses = statuses.iter().map(|s| (*s).to_string()).collect();
    }

    pub fn go_down(&self) {
        self.state.lock().unwrap().down = true;
    }

    pub fn reject_submissions(&self) {
        self.state.lock().unwrap().reject_submissions = true;
    }

    pub fn fail_status_queries(&self) {
        self.state.lock().unwrap().fail_status = true;
    }

    pub fn fail_deletes(&self) {
        self.state.lock().unwrap().fail_delete = true;
    }

    pub fn status_polls(&self) -> usize {
        self.state.lock().unwrap().status_polls
    }

    pub fn submitted(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn tagged(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().tagged.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn node_tags(&self, node_id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .sku_nodes
            .values()
            .flatten()
            .find(|n| n.id == node_id)
            .map(|n| n.tags.clone())
            .unwrap_or_default()
    }
}

pub(crate) fn node(id: &str, tags: &[&str]) -> Node {
    Node {
        id: id.into(),
        name: None,
        tags: tags.iter().map(|t| (*t).to_string()).collect(),
    }
}

#[async_trait]
impl InventoryClient for FakeInventory {
    async fn get_config(&self) -> Result<(), ClientError> {
        if self.state.lock().unwrap().down {
            return Err(unavailable());
        }
        Ok(())
    }

    async fn list_skus(&self) -> Result<Vec<Sku>, ClientError> {
        Ok(self.state.lock().unwrap().skus.clone())
    }

    async fn list_sku_nodes(&self, sku_id: &str) -> Result<Vec<Node>, ClientError> {
        self.state
            .lock()
            .unwrap()
            .sku_nodes
            .get(sku_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(sku_id.into()))
    }

    async fn tag_node(&self, node_id: &str, tag: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        for node in state.sku_nodes.values_mut().flatten() {
            if node.id == node_id && !node.has_tag(tag) {
                node.tags.push(tag.into());
            }
        }
        state.tagged.push((node_id.into(), tag.into()));
        Ok(())
    }

    async fn delete_node(&self, node_id: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_delete {
            return Err(unavailable());
        }
        state.deleted.push(node_id.into());
        Ok(())
    }

    async fn submit_workflow(&self, node_id: &str, name: &str) -> Result<String, ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.reject_submissions {
            return Err(ClientError::Api {
                status: 400,
                message: format!("unknown graph {name}"),
            });
        }
        state.submitted.push((node_id.into(), name.into()));
        Ok(format!("instance-{}", state.submitted.len()))
    }

    async fn workflow_status(&self, _instance_id: &str) -> Result<WorkflowStatus, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.status_polls += 1;
        if state.fail_status {
            return Err(unavailable());
        }
        let status = if state.statuses.len() > 1 {
            state.statuses.pop_front().unwrap_or_default()
        } else {
            state
                .statuses
                .front()
                .cloned()
                .unwrap_or_else(|| "running".into())
        };
        Ok(WorkflowStatus { status })
    }

    async fn node_obms(&self, node_id: &str) -> Result<Vec<ObmDescriptor>, ClientError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .obms
            .get(node_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn lookup(&self, query: &str) -> Result<Vec<LookupRecord>, ClientError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .lookups
            .get(query)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
struct PowerStateInner {
    power_state: Option<String>,
    resets: Vec<(String, ResetType)>,
    fail_resets: bool,
    down: bool,
}

/// Scriptable [`PowerClient`].
#[derive(Default)]
pub(crate) struct FakePower {
    state: Mutex<PowerStateInner>,
}

impl FakePower {
    /// Power string reported for every node; `None` makes queries fail.
    pub fn set_power_state(&self, raw: Option<&str>) {
        self.state.lock().unwrap().power_state = raw.map(str::to_string);
    }

    pub fn fail_resets(&self) {
        self.state.lock().unwrap().fail_resets = true;
    }

    pub fn go_down(&self) {
        self.state.lock().unwrap().down = true;
    }

    pub fn resets(&self) -> Vec<(String, ResetType)> {
        self.state.lock().unwrap().resets.clone()
    }
}

#[async_trait]
impl PowerClient for FakePower {
    async fn list_roles(&self) -> Result<(), ClientError> {
        if self.state.lock().unwrap().down {
            return Err(unavailable());
        }
        Ok(())
    }

    async fn power_state(&self, node_id: &str) -> Result<String, ClientError> {
        self.state
            .lock()
            .unwrap()
            .power_state
            .clone()
            .ok_or_else(|| ClientError::NotFound(node_id.into()))
    }

    async fn reset(&self, node_id: &str, reset_type: ResetType) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_resets {
            return Err(unavailable());
        }
        state.resets.push((node_id.into(), reset_type));
        Ok(())
    }
}

#[derive(Default)]
struct ProbeState {
    open: Vec<String>,
    open_after: HashMap<String, usize>,
    dials: Vec<String>,
}

/// [`PortProbe`] with a fixed set of open hosts.
#[derive(Default)]
pub(crate) struct FakeProbe {
    state: Mutex<ProbeState>,
}

impl FakeProbe {
    pub fn open(hosts: &[&str]) -> Self {
        let probe = Self::default();
        probe.state.lock().unwrap().open = hosts.iter().map(|h| (*h).to_string()).collect();
        probe
    }

    /// `host` accepts from its `n`th dial on.
    pub fn open_after(&self, host: &str, n: usize) {
        self.state.lock().unwrap().open_after.insert(host.into(), n);
    }

    pub fn dials(&self) -> Vec<String> {
        self.state.lock().unwrap().dials.clone()
    }
}

#[async_trait]
impl PortProbe for FakeProbe {
    async fn dial(&self, host: &str, _port: u16, _timeout: Duration) -> bool {
        let mut state = self.state.lock().unwrap();
        state.dials.push(host.into());
        let count = state.dials.iter().filter(|h| h.as_str() == host).count();
        state.open.iter().any(|h| h == host)
            || state.open_after.get(host).is_some_and(|n| count >= *n)
    }
}

#[derive(Default)]
struct ShellState {
    hosts: Vec<String>,
    commands: Vec<String>,
    fail_on: Option<String>,
    refuse_login: bool,
}

/// [`RemoteShell`] that records what it is asked to run.
#[derive(Default)]
pub(crate) struct FakeShell {
    state: Arc<Mutex<ShellState>>,
}

impl FakeShell {
    /// Commands containing `needle` exit non-zero.
    pub fn fail_on(&self, needle: &str) {
        self.state.lock().unwrap().fail_on = Some(needle.into());
    }

    pub fn refuse_login(&self) {
        self.state.lock().unwrap().refuse_login = true;
    }

    pub fn hosts(&self) -> Vec<String> {
        self.state.lock().unwrap().hosts.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }
}

struct FakeSession {
    state: Arc<Mutex<ShellState>>,
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn open(&self, endpoint: &SshEndpoint) -> Result<Box<dyn ShellSession>, ShellError> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_login {
            return Err(ShellError::AuthRejected(endpoint.user.clone()));
        }
        state.hosts.push(endpoint.host.clone());
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
        }))
    }
}

#[async_trait]
impl ShellSession for FakeSession {
    async fn exec(&mut self, command: &str) -> Result<String, ShellError> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.into());
        if state
            .fail_on
            .as_deref()
            .is_some_and(|needle| command.contains(needle))
        {
            return Err(ShellError::ExitStatus {
                code: 1,
                stderr: "operation not permitted".into(),
            });
        }
        Ok(String::new())
    }
}
