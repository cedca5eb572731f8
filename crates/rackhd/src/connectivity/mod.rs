//! Network readiness and SSH credential bootstrap.
//!
//! After a node is chosen (and optionally reinstalled) the driver needs an
//! address it can reach and a key it can log in with. This module finds the
//! node's addresses through the Inventory Service lookups, waits for one of
//! them to accept connections on the SSH port, and installs a generated public
//! key over a password-authenticated session.
//!
//! Key installation is a fixed sequence of remote commands. A failing step
//! stops the sequence; steps already applied stay applied.

mod keys;
mod probe;
mod shell;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

pub use keys::{ensure_key_pair, public_key_path};
pub use probe::{first_reachable, PortProbe, ProbePolicy, TcpProbe};
pub use shell::{RemoteShell, ShellError, ShellSession, Ssh2Shell, SshEndpoint};

use crate::error::{DriverError, DriverResult};
use crate::inventory::InventoryClient;

/// Where the login key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Caller-supplied key, assumed to be authorised on the node already.
    Existing(PathBuf),
    /// Generate (or reuse) a pair at this private key path and install it.
    Generate(PathBuf),
}

/// Parameters of one bootstrap run.
#[derive(Debug, Clone)]
pub struct BootstrapRequest {
    pub ssh_user: String,
    pub ssh_password: String,
    pub ssh_port: u16,
    pub policy: ProbePolicy,
    pub key: KeySource,
}

/// Result of a successful bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOutcome {
    /// Address that accepted the connection.
    pub address: String,
    /// Private key to log in with.
    pub key_path: PathBuf,
    /// Whether a public key was installed during this run.
    pub key_installed: bool,
}

/// Home directory of `user` on the node.
#[must_use]
pub fn remote_home(user: &str) -> String {
    if user == "root" {
        "/root".to_string()
    } else {
        format!("/home/{user}")
    }
}

/// Named commands that authorise `public_key` for `user`.
#[must_use]
pub fn key_install_commands(user: &str, public_key: &str) -> Vec<(&'static str, String)> {
    let ssh_dir = format!("{}/.ssh", remote_home(user));
    vec![
        ("create ssh directory", format!("mkdir -p {ssh_dir}")),
        (
            "write authorized_keys",
            format!("echo '{public_key}' > {ssh_dir}/authorized_keys"),
        ),
        ("restrict ssh directory", format!("chmod 700 {ssh_dir}")),
        (
            "restrict authorized_keys",
            format!("chmod 600 {ssh_dir}/authorized_keys"),
        ),
    ]
}

/// Finds a reachable address for a node and installs SSH access.
pub struct ConnectivityBootstrapper {
    inventory: Arc<dyn InventoryClient>,
    shell: Arc<dyn RemoteShell>,
    probe: Arc<dyn PortProbe>,
}

impl ConnectivityBootstrapper {
    /// Create a bootstrapper probing with real TCP connects.
    #[must_use]
    pub fn new(inventory: Arc<dyn InventoryClient>, shell: Arc<dyn RemoteShell>) -> Self {
        Self {
            inventory,
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

    /// Every IP address the Inventory Service knows for `node_id`, in order.
    ///
    /// # Errors
    /// Returns [`DriverError::NoAddressesFound`] if the lookup has none.
    pub async fn discover_addresses(&self, node_id: &str) -> DriverResult<Vec<String>> {
        let records = self.inventory.lookup(node_id).await?;

        let mut addresses: Vec<String> = Vec::new();
        for ip in records.into_iter().filter_map(|r| r.ip_address) {
            if !addresses.contains(&ip) {
                debug!(node_id, ip = %ip, "Found IP address for node");
                addresses.push(ip);
            }
        }

        if addresses.is_empty() {
            return Err(DriverError::NoAddressesFound {
                node_id: Some(node_id.to_string()),
            });
        }
        Ok(addresses)
    }

    /// Pick the first reachable candidate and, if needed, install a key on it.
    ///
    /// # Errors
    /// - [`DriverError::NoAddressesFound`] for an empty candidate list
    /// - [`DriverError::Unreachable`] if no candidate accepts connections
    /// - [`DriverError::Key`] / [`DriverError::BootstrapFailed`] from key installation
    pub async fn bootstrap(
        &self,
        candidates: &[String],
        request: &BootstrapRequest,
    ) -> DriverResult<BootstrapOutcome> {
        if candidates.is_empty() {
            return Err(DriverError::NoAddressesFound { node_id: None });
        }

        let address =
            first_reachable(self.probe.as_ref(), candidates, request.ssh_port, request.policy)
                .await
                .ok_or_else(|| DriverError::Unreachable {
                    candidates: candidates.to_vec(),
                    port: request.ssh_port,
                })?;
        info!(address = %address, port = request.ssh_port, "Connection succeeded");

        match &request.key {
            KeySource::Existing(path) => Ok(BootstrapOutcome {
                address,
                key_path: path.clone(),
                key_installed: false,
            }),
            KeySource::Generate(path) => {
                let public_key = ensure_key_pair(path).await?;
                self.install_public_key(&address, request, &public_key).await?;
                Ok(BootstrapOutcome {
                    address,
                    key_path: path.clone(),
                    key_installed: true,
                })
            }
        }
    }

    /// Discover the node's addresses, then [`Self::bootstrap`].
    ///
    /// # Errors
    /// See [`Self::discover_addresses`] and [`Self::bootstrap`].
    pub async fn connect(
        &self,
        node_id: &str,
        request: &BootstrapRequest,
    ) -> DriverResult<BootstrapOutcome> {
        let candidates = self.discover_addresses(node_id).await?;
        self.bootstrap(&candidates, request).await
    }

    /// Authorise `public_key` for the SSH user on `host`.
    ///
    /// # Errors
    /// Returns [`DriverError::BootstrapFailed`] naming the step that failed.
    pub async fn install_public_key(
        &self,
        host: &str,
        request: &BootstrapRequest,
        public_key: &str,
    ) -> DriverResult<()> {
        let failed = |step: &'static str, e: ShellError| DriverError::BootstrapFailed {
            host: host.to_string(),
            step,
            message: e.to_string(),
        };

        info!(host, user = %request.ssh_user, "Copying public SSH key");
        let endpoint = SshEndpoint {
            host: host.to_string(),
            port: request.ssh_port,
            user: request.ssh_user.clone(),
            password: request.ssh_password.clone(),
            connect_timeout: request.policy.dial_timeout().max(Duration::from_secs(1)),
        };
        let mut session = self
            .shell
            .open(&endpoint)
            .await
            .map_err(|e| failed("open session", e))?;

        for (step, command) in key_install_commands(&request.ssh_user, public_key) {
            debug!(host, step, "Executing SSH command");
            session.exec(&command).await.map_err(|e| failed(step, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeInventory, FakeProbe, FakeShell};
    use tempfile::TempDir;

    fn request(key: KeySource) -> BootstrapRequest {
        BootstrapRequest {
            ssh_user: "root".into(),
            ssh_password: "root".into(),
            ssh_port: 22,
            policy: ProbePolicy::SingleDial {
                timeout: Duration::from_secs(1),
            },
            key,
        }
    }

    fn key_dir() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let key = temp.path().join("id_rsa");
        std::fs::write(&key, "PRIVATE").unwrap();
        std::fs::write(public_key_path(&key), "ssh-rsa AAAA test\n").unwrap();
        (temp, key)
    }

    struct Fixture {
        inventory: Arc<FakeInventory>,
        shell: Arc<FakeShell>,
        probe: Arc<FakeProbe>,
        bootstrapper: ConnectivityBootstrapper,
    }

    fn fixture(open: &[&str]) -> Fixture {
        let inventory = Arc::new(FakeInventory::default());
        let shell = Arc::new(FakeShell::default());
        let probe = Arc::new(FakeProbe::open(open));
        let bootstrapper = ConnectivityBootstrapper::new(inventory.clone(), shell.clone())
            .with_probe(probe.clone());
        Fixture {
            inventory,
            shell,
            probe,
            bootstrapper,
        }
    }

    #[tokio::test]
    async fn test_discover_collects_all_addresses() {
        let fx = fixture(&[]);
        fx.inventory
            .set_addresses("n1", &["10.0.0.1", "10.0.0.2", "10.0.0.1"]);

        let addresses = fx.bootstrapper.discover_addresses("n1").await.unwrap();
        assert_eq!(addresses, vec!["10.0.0.1", "10.0.0.2"]);

        let err = fx.bootstrapper.discover_addresses("n2").await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::NoAddressesFound { node_id: Some(ref id) } if id == "n2"
        ));
        assert_eq!(err.to_string(), "No IP addresses are associated with node n2");
    }

    #[tokio::test]
    async fn test_selects_reachable_address_and_installs_key_there() {
        let fx = fixture(&["10.0.0.2"]);
        fx.inventory.set_addresses("n1", &["10.0.0.1", "10.0.0.2"]);
        let (_temp, key) = key_dir();

        let outcome = fx
            .bootstrapper
            .connect("n1", &request(KeySource::Generate(key.clone())))
            .await
            .unwrap();

        assert_eq!(outcome.address, "10.0.0.2");
        assert_eq!(outcome.key_path, key);
        assert!(outcome.key_installed);
        assert_eq!(fx.shell.hosts(), vec!["10.0.0.2".to_string()]);
        assert_eq!(
            fx.shell.commands(),
            vec![
                "mkdir -p /root/.ssh".to_string(),
                "echo 'ssh-rsa AAAA test' > /root/.ssh/authorized_keys".to_string(),
                "chmod 700 /root/.ssh".to_string(),
                "chmod 600 /root/.ssh/authorized_keys".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_candidates_means_no_dial() {
        let fx = fixture(&["10.0.0.1"]);
        let err = fx
            .bootstrapper
            .bootstrap(&[], &request(KeySource::Existing("/k".into())))
            .await
            .unwrap_err();

        assert!(matches!(err, DriverError::NoAddressesFound { node_id: None }));
        assert_eq!(err.to_string(), "No IP addresses are associated with the request");
        assert!(fx.probe.dials().is_empty());
        assert!(fx.shell.hosts().is_empty());
    }

    #[tokio::test]
    async fn test_first_reachable_wins_and_later_addresses_are_not_probed() {
        let fx = fixture(&["10.0.0.1", "10.0.0.2"]);
        let candidates = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];

        let outcome = fx
            .bootstrapper
            .bootstrap(&candidates, &request(KeySource::Existing("/k".into())))
            .await
            .unwrap();

        assert_eq!(outcome.address, "10.0.0.1");
        assert!(!outcome.key_installed);
        assert_eq!(fx.probe.dials(), vec!["10.0.0.1".to_string()]);
        assert!(fx.shell.hosts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_policy_budget() {
        let fx = fixture(&[]);
        let candidates = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        let mut req = request(KeySource::Existing("/k".into()));
        req.policy = ProbePolicy::Retry {
            attempts: 3,
            dial_timeout: Duration::from_secs(1),
            backoff: Duration::from_secs(15),
        };

        let start = tokio::time::Instant::now();
        let err = fx.bootstrapper.bootstrap(&candidates, &req).await.unwrap_err();

        assert!(matches!(err, DriverError::Unreachable { port: 22, .. }));
        assert_eq!(fx.probe.dials().len(), 6);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_tolerates_late_sshd() {
        let fx = fixture(&[]);
        fx.probe.open_after("10.0.0.1", 3);
        let mut req = request(KeySource::Existing("/k".into()));
        req.policy = ProbePolicy::Retry {
            attempts: 5,
            dial_timeout: Duration::from_secs(1),
            backoff: Duration::from_secs(15),
        };

        let outcome = fx
            .bootstrapper
            .bootstrap(&["10.0.0.1".to_string()], &req)
            .await
            .unwrap();
        assert_eq!(outcome.address, "10.0.0.1");
        assert_eq!(fx.probe.dials().len(), 3);
    }

    #[tokio::test]
    async fn test_failing_step_aborts_sequence() {
        let fx = fixture(&["10.0.0.1"]);
        fx.shell.fail_on("chmod 700");
        let (_temp, key) = key_dir();

        let err = fx
            .bootstrapper
            .bootstrap(&["10.0.0.1".to_string()], &request(KeySource::Generate(key)))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DriverError::BootstrapFailed { step: "restrict ssh directory", ref host, .. }
                if host == "10.0.0.1"
        ));
        assert_eq!(fx.shell.commands().len(), 3);
    }

    #[tokio::test]
    async fn test_rejected_login_runs_no_commands() {
        let fx = fixture(&["10.0.0.1"]);
        fx.shell.refuse_login();
        let (_temp, key) = key_dir();

        let err = fx
            .bootstrapper
            .bootstrap(&["10.0.0.1".to_string()], &request(KeySource::Generate(key)))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DriverError::BootstrapFailed { step: "open session", ref host, .. }
                if host == "10.0.0.1"
        ));
        assert!(fx.shell.hosts().is_empty());
        assert!(fx.shell.commands().is_empty());
    }

    #[test]
    fn test_remote_home() {
        assert_eq!(remote_home("root"), "/root");
        assert_eq!(remote_home("core"), "/home/core");
    }
}
