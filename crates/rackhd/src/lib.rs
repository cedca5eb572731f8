//! Bare metal node driver for RackHD.
//!
//! This crate leases a node from a RackHD server, optionally reinstalls it
//! through a workflow, and bootstraps SSH access so the node can be used as a
//! remote compute target. Lifecycle verbs are mapped onto whichever
//! out-of-band management backend the node has.
//!
//! # Example
//!
//! ```rust,ignore
//! use rackhd::{Driver, DriverConfig, NodeTarget};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let target = NodeTarget::SkuName("small".into());
//!     let config = DriverConfig::new("worker-1", "/var/lib/rackhd", target);
//!     let mut driver = Driver::new(config)?;
//!
//!     // Check both APIs and reserve a node from the SKU pool
//!     driver.pre_create_check().await?;
//!
//!     // Wait for an address and install an SSH key
//!     driver.create().await?;
//!     println!("{}", driver.url()?);
//!
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connectivity;
pub mod driver;
pub mod error;
pub mod inventory;
pub mod machine;
pub mod power;
pub mod selector;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use config::{DriverConfig, NodeTarget, PowerMechanism, ProbeMode, Transport};
pub use driver::Driver;
pub use error::{ClientError, DriverError, DriverResult};
pub use machine::MachineRecord;
pub use power::PowerState;
