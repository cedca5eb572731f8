//! Node selection and reservation from a SKU pool.
//!
//! Reservation is a tag on the node. The Inventory Service offers no
//! compare-and-set on tags, so two selectors running at the same time can
//! both see a node as free and both claim it. Callers that provision
//! concurrently from one pool must serialise selection themselves.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::NodeTarget;
use crate::error::{DriverError, DriverResult};
use crate::inventory::InventoryClient;

/// Tag marking a node as claimed by this driver.
pub const RESERVATION_TAG: &str = "dockermachine";

/// Picks and reserves a free node.
pub struct NodeSelector {
    inventory: Arc<dyn InventoryClient>,
    tag: String,
}

impl NodeSelector {
    /// Create a selector using [`RESERVATION_TAG`].
    #[must_use]
    pub fn new(inventory: Arc<dyn InventoryClient>) -> Self {
        Self {
            inventory,
            tag: RESERVATION_TAG.to_string(),
        }
    }

    /// Use a different reservation tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Resolve a SKU name to its ID; the first exact match wins.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] if no SKU has that name.
    pub async fn resolve_sku(&self, name: &str) -> DriverResult<String> {
        debug!(sku_name = name, "Looking up SKU ID by name");
        let skus = self.inventory.list_skus().await?;

        skus.into_iter()
            .find(|sku| sku.name == name)
            .map(|sku| sku.id)
            .ok_or_else(|| DriverError::NotFound(name.to_string()))
    }

    /// Choose the first untagged node of a SKU and tag it.
    ///
    /// # Errors
    /// Returns [`DriverError::NoAvailableNode`] if every node is already tagged.
    pub async fn reserve_from_sku(&self, sku_id: &str) -> DriverResult<String> {
        info!(sku_id, "Looking for available node within SKU");
        let nodes = self.inventory.list_sku_nodes(sku_id).await?;
        let pool_size = nodes.len();

        let chosen = nodes
            .into_iter()
            .find(|node| !node.has_tag(&self.tag))
            .ok_or_else(|| DriverError::NoAvailableNode {
                sku_id: sku_id.to_string(),
                tag: self.tag.clone(),
                pool_size,
            })?;

        self.inventory.tag_node(&chosen.id, &self.tag).await?;
        info!(sku_id, node_id = %chosen.id, "Found a free node within SKU");
        Ok(chosen.id)
    }

    /// Resolve any [`NodeTarget`] to a node ID.
    ///
    /// A direct node target is returned unchanged and is not tagged.
    ///
    /// # Errors
    /// Any error from [`Self::resolve_sku`] or [`Self::reserve_from_sku`].
    pub async fn select(&self, target: &NodeTarget) -> DriverResult<String> {
        match target {
            NodeTarget::Node(id) => Ok(id.clone()),
            NodeTarget::SkuId(sku_id) => self.reserve_from_sku(sku_id).await,
            NodeTarget::SkuName(name) => {
                let sku_id = self.resolve_sku(name).await?;
                self.reserve_from_sku(&sku_id).await
            }
        }
    }
}
