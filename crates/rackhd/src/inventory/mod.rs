//! RackHD Inventory Service (Monorail API).
//!
//! [`InventoryClient`] is the seam the orchestration core talks through;
//! [`Monorail`] is the HTTP implementation.

mod monorail;
mod traits;

pub use monorail::Monorail;
pub use traits::{
    InventoryClient, LookupRecord, Node, ObmDescriptor, Sku, WorkflowStatus, NOOP_OBM_SERVICE,
};
