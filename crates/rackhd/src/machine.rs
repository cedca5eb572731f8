//! Machine record persistence.
//!
//! Lifecycle commands run in separate processes from `create`, so the
//! resolved node identity and chosen address are written next to the
//! generated key and read back by later commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{machine_dir, DriverConfig};

/// What the driver knows about a created machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineRecord {
    /// Configuration the machine was created with.
    pub config: DriverConfig,
    /// Node chosen for the machine.
    pub node_id: Option<String>,
    /// Address SSH was reached on.
    pub ip_address: Option<String>,
    /// Private key used to log in.
    pub ssh_key_path: Option<PathBuf>,
    /// Timestamp of last update.
    pub updated_at: String,
}

impl MachineRecord {
    /// Create a record for a machine that has no node yet.
    #[must_use]
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            node_id: None,
            ip_address: None,
            ssh_key_path: None,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Path of the record for `machine_name` under `store_path`.
    #[must_use]
    pub fn record_file(store_path: &Path, machine_name: &str) -> PathBuf {
        machine_dir(store_path, machine_name).join("rackhd.json")
    }

    /// Load the record if one exists.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(store_path: &Path, machine_name: &str) -> Result<Option<Self>> {
        let path = Self::record_file(store_path, machine_name);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path).context("Failed to read machine record")?;
        let record: Self =
            serde_json::from_str(&content).context("Failed to parse machine record")?;

        debug!(machine = machine_name, node_id = ?record.node_id, "Loaded machine record");
        Ok(Some(record))
    }

    /// Save the record.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&mut self) -> Result<()> {
        self.updated_at = chrono::Utc::now().to_rfc3339();

        let dir = self.config.machine_dir();
        std::fs::create_dir_all(&dir).context("Failed to create machine directory")?;

        let path = Self::record_file(&self.config.store_path, &self.config.machine_name);
        let content = serde_json::to_string_pretty(self).context("Failed to serialize record")?;
        std::fs::write(&path, content).context("Failed to write machine record")?;

        info!(path = %path.display(), "Saved machine record");
        Ok(())
    }

    /// Delete the machine directory, including any generated key.
    ///
    /// # Errors
    /// Returns an error if the directory exists but cannot be removed.
    pub fn delete(&self) -> Result<()> {
        let dir = self.config.machine_dir();
        if dir.exists() {
            std::fs::remove_dir_all(&dir).context("Failed to remove machine directory")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeTarget;
    use tempfile::TempDir;

    #[test]
    fn test_missing_record_is_none() {
        let temp = TempDir::new().unwrap();
        assert!(MachineRecord::load(temp.path(), "nope").unwrap().is_none());
    }

    #[test]
    fn test_save_load_delete() {
        let temp = TempDir::new().unwrap();
        let config = DriverConfig::new("m1", temp.path(), NodeTarget::SkuName("small".into()));
        let mut record = MachineRecord::new(config);
        record.node_id = Some("5a1b2c".into());
        record.ip_address = Some("10.0.0.2".into());
        record.save().unwrap();

        let loaded = MachineRecord::load(temp.path(), "m1").unwrap().unwrap();
        assert_eq!(loaded.node_id.as_deref(), Some("5a1b2c"));
        assert_eq!(loaded.ip_address.as_deref(), Some("10.0.0.2"));
        assert_eq!(loaded.config.target, NodeTarget::SkuName("small".into()));

        loaded.delete().unwrap();
        assert!(MachineRecord::load(temp.path(), "m1").unwrap().is_none());
    }
}
