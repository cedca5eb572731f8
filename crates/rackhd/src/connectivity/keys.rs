//! Local SSH key pair generation.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{DriverError, DriverResult};

/// Public key path for a private key path (`<key>.pub`).
#[must_use]
pub fn public_key_path(private_key: &Path) -> PathBuf {
    let mut path = private_key.as_os_str().to_owned();
    path.push(".pub");
    PathBuf::from(path)
}

/// Make sure a key pair exists at `private_key` and return the public key.
///
/// An existing pair is reused. Otherwise an RSA pair without passphrase is
/// generated with `ssh-keygen`.
///
/// # Errors
/// Returns [`DriverError::Key`] if `ssh-keygen` fails or the public key
/// cannot be read.
pub async fn ensure_key_pair(private_key: &Path) -> DriverResult<String> {
    let public_key = public_key_path(private_key);

    if private_key.exists() && public_key.exists() {
        debug!(path = %private_key.display(), "Reusing existing SSH key pair");
    } else {
        generate(private_key).await?;
    }

    let contents = fs::read_to_string(&public_key).await.map_err(|e| {
        DriverError::Key(format!("Failed to read {}: {e}", public_key.display()))
    })?;
    Ok(contents.trim().to_string())
}

async fn generate(private_key: &Path) -> DriverResult<()> {
    if let Some(parent) = private_key.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| DriverError::Key(format!("Failed to create key directory: {e}")))?;
    }

    info!(path = %private_key.display(), "Creating SSH key");
    let output = Command::new("ssh-keygen")
        .args(["-t", "rsa", "-b", "2048", "-N", "", "-q", "-f"])
        .arg(private_key)
        .output()
        .await
        .map_err(|e| DriverError::Key(format!("Failed to run ssh-keygen: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DriverError::Key(format!("ssh-keygen failed: {stderr}")));
    }
    Ok(())
}
