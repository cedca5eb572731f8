//! Out-of-band power management.
//!
//! [`PowerClient`] is the direct power API seam and [`Redfish`] its HTTP
//! implementation. [`PowerController`] picks a backend per node and runs
//! lifecycle actions through it.

mod controller;
mod redfish;
mod traits;

pub use controller::{LifecycleAction, PowerBackend, PowerController, PowerStrategy};
pub use redfish::Redfish;
pub use traits::{PowerClient, PowerState, ResetType};
