//! RackHD CLI - provision and manage bare metal nodes through RackHD.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rackhd::config::{
    DEFAULT_ENDPOINT, DEFAULT_SSH_ATTEMPTS, DEFAULT_SSH_PASSWORD, DEFAULT_SSH_PORT,
    DEFAULT_SSH_TIMEOUT_SECS, DEFAULT_SSH_USER, DEFAULT_WORKFLOW_POLL_SECS,
    DEFAULT_WORKFLOW_TIMEOUT_MINS,
};
use rackhd::{
    Driver, DriverConfig, MachineRecord, NodeTarget, PowerMechanism, ProbeMode, Transport,
};

/// RackHD CLI - bare metal nodes as remote compute targets.
#[derive(Parser)]
#[command(name = "rackhd")]
#[command(about = "Provision and manage RackHD nodes")]
struct Cli {
    /// Machine name used for local state.
    #[arg(long, env = "RACKHD_MACHINE_NAME", default_value = "default")]
    machine_name: String,

    /// Directory for local machine state (defaults to `~/.rackhd`).
    #[arg(long, env = "RACKHD_STORAGE_PATH")]
    storage_path: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reserve a node, run the optional workflow and install SSH access.
    Create(CreateArgs),

    /// Power the node on.
    Start,

    /// Shut the node down gracefully.
    Stop,

    /// Reboot the node.
    Restart,

    /// Force the node off.
    Kill,

    /// Power the node off and delete it from RackHD.
    Remove,

    /// Show the node's power state.
    Status,

    /// Print the address SSH was reached on.
    Ip,

    /// Print the Docker daemon URL.
    Url,
}

#[derive(Args)]
struct CreateArgs {
    /// RackHD `host:port`.
    #[arg(long, env = "RACKHD_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// API transport (http or https).
    #[arg(long, env = "RACKHD_TRANSPORT", default_value = "http")]
    transport: Transport,

    /// Node ID, MAC address or IP address of a specific node.
    #[arg(long, env = "RACKHD_NODE_ID")]
    node_id: Option<String>,

    /// SKU ID to pick a free node from.
    #[arg(long, env = "RACKHD_SKU_ID")]
    sku_id: Option<String>,

    /// SKU name to pick a free node from.
    #[arg(long, env = "RACKHD_SKU_NAME")]
    sku_name: Option<String>,

    /// Workflow to run after the node is chosen (e.g. Graph.InstallUbuntu).
    #[arg(long, env = "RACKHD_WORKFLOW_NAME")]
    workflow_name: Option<String>,

    /// SSH user.
    #[arg(long, env = "RACKHD_SSH_USER", default_value = DEFAULT_SSH_USER)]
    ssh_user: String,

    /// SSH password used to install the generated key.
    #[arg(long, env = "RACKHD_SSH_PASSWORD", default_value = DEFAULT_SSH_PASSWORD)]
    ssh_password: String,

    /// SSH port.
    #[arg(long, env = "RACKHD_SSH_PORT", default_value_t = DEFAULT_SSH_PORT)]
    ssh_port: u16,

    /// Existing private key already authorised on the node.
    #[arg(long, env = "RACKHD_SSH_KEY")]
    ssh_key: Option<PathBuf>,

    /// Workflow timeout in minutes.
    #[arg(long, env = "RACKHD_WORKFLOW_TIMEOUT", default_value_t = DEFAULT_WORKFLOW_TIMEOUT_MINS)]
    workflow_timeout: u64,

    /// Workflow poll interval in seconds.
    #[arg(long, env = "RACKHD_WORKFLOW_POLL", default_value_t = DEFAULT_WORKFLOW_POLL_SECS)]
    workflow_poll: u64,

    /// Connection attempts per address.
    #[arg(long, env = "RACKHD_SSH_ATTEMPTS", default_value_t = DEFAULT_SSH_ATTEMPTS)]
    ssh_attempts: u32,

    /// Dial timeout and retry backoff in seconds.
    #[arg(long, env = "RACKHD_SSH_TIMEOUT", default_value_t = DEFAULT_SSH_TIMEOUT_SECS)]
    ssh_timeout: u64,

    /// Power mechanism for managed nodes (workflow or redfish).
    #[arg(long, env = "RACKHD_POWER_MECHANISM", default_value = "workflow")]
    power_mechanism: PowerMechanism,

    /// Reachability probe mode (single or retry).
    #[arg(long, env = "RACKHD_PROBE_MODE", default_value = "retry")]
    probe_mode: ProbeMode,
}

impl CreateArgs {
    fn into_config(self, machine_name: String, store_path: PathBuf) -> Result<DriverConfig> {
        let target = NodeTarget::from_options(self.node_id, self.sku_id, self.sku_name)?;

        let mut config = DriverConfig::new(machine_name, store_path, target);
        config.endpoint = self.endpoint;
        config.transport = self.transport;
        config.workflow_name = self.workflow_name.filter(|w| !w.is_empty());
        config.ssh_user = self.ssh_user;
        config.ssh_password = self.ssh_password;
        config.ssh_port = self.ssh_port;
        config.ssh_key_path = self.ssh_key;
        config.workflow_timeout_mins = self.workflow_timeout;
        config.workflow_poll_secs = self.workflow_poll;
        config.ssh_attempts = self.ssh_attempts;
        config.ssh_timeout_secs = self.ssh_timeout;
        config.power_mechanism = self.power_mechanism;
        config.probe_mode = self.probe_mode;
        Ok(config)
    }
}

fn default_storage_path() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
        .join(".rackhd")
}

fn load_driver(store_path: &std::path::Path, machine_name: &str) -> Result<Driver> {
    let record = MachineRecord::load(store_path, machine_name)?
        .with_context(|| format!("Machine '{machine_name}' does not exist, run create first"))?;
    Ok(Driver::from_record(record)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store_path = cli.storage_path.unwrap_or_else(default_storage_path);
    let machine_name = cli.machine_name;

    match cli.command {
        Commands::Create(args) => {
            let config = args.into_config(machine_name.clone(), store_path)?;
            let mut driver = Driver::new(config)?;

            driver
                .pre_create_check()
                .await
                .context("Pre-create check failed")?;

            // Persist the reservation before the long-running part
            driver.record().save()?;

            driver.create().await.context("Failed to create machine")?;
            driver.record().save()?;

            println!("\n✅ Machine created!");
            println!("  Name:    {machine_name}");
            println!("  Node:    {}", driver.node_id()?);
            println!("  IP:      {}", driver.ip()?);
            println!("  SSH key: {}", driver.ssh_key_path().display());
        }

        Commands::Start => {
            load_driver(&store_path, &machine_name)?.start().await?;
            println!("\n✅ Machine started: {machine_name}");
        }

        Commands::Stop => {
            load_driver(&store_path, &machine_name)?.stop().await?;
            println!("\n✅ Machine stopped: {machine_name}");
        }

        Commands::Restart => {
            load_driver(&store_path, &machine_name)?.restart().await?;
            println!("\n✅ Machine restarted: {machine_name}");
        }

        Commands::Kill => {
            load_driver(&store_path, &machine_name)?.kill().await?;
            println!("\n✅ Machine killed: {machine_name}");
        }

        Commands::Remove => {
            let driver = load_driver(&store_path, &machine_name)?;
            driver.remove().await?;
            driver.record().delete()?;
            info!(machine = %machine_name, "Removed local machine state");
            println!("\n✅ Machine removed: {machine_name}");
        }

        Commands::Status => {
            let state = load_driver(&store_path, &machine_name)?.state().await?;
            println!("{state}");
        }

        Commands::Ip => {
            let driver = load_driver(&store_path, &machine_name)?;
            println!("{}", driver.ip()?);
        }

        Commands::Url => {
            let driver = load_driver(&store_path, &machine_name)?;
            println!("{}", driver.url()?);
        }
    }

    Ok(())
}
