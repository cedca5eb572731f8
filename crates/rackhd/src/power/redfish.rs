//! RackHD Redfish API client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use super::traits::{PowerClient, ResetType};
use crate::error::ClientError;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Subset of a Redfish `ComputerSystem` resource.
#[derive(Debug, Deserialize)]
struct ComputerSystem {
    #[serde(rename = "PowerState", default)]
    power_state: Option<String>,
}

/// RackHD Redfish API client.
#[derive(Clone)]
pub struct Redfish {
    /// HTTP client.
    client: Client,
    /// Base URL ending in `/redfish/v1/`.
    base: Url,
}

impl Redfish {
    /// Create a new Redfish client.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base: Url::parse(base_url)?,
        })
    }

    async fn get_json(&self, path: &str) -> Result<Value, ClientError> {
        let url = self.base.join(path)?;
        debug!(url = %url, "GET request");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            Ok(serde_json::from_str(&text)?)
        } else if status == StatusCode::NOT_FOUND {
            Err(ClientError::NotFound(text))
        } else {
            Err(ClientError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }
}

#[async_trait]
impl PowerClient for Redfish {
    async fn list_roles(&self) -> Result<(), ClientError> {
        self.get_json("AccountService/Roles").await?;
        Ok(())
    }

    async fn power_state(&self, node_id: &str) -> Result<String, ClientError> {
        let body = self.get_json(&format!("Systems/{node_id}")).await?;
        let system: ComputerSystem = serde_json::from_value(body)?;
        system.power_state.ok_or(ClientError::MissingField("PowerState"))
    }

    async fn reset(&self, node_id: &str, reset_type: ResetType) -> Result<(), ClientError> {
        let url = self
            .base
            .join(&format!("Systems/{node_id}/Actions/ComputerSystem.Reset"))?;
        debug!(url = %url, reset_type = %reset_type, "POST request");

        let response = self
            .client
            .post(url)
            .json(&json!({ "reset_type": reset_type }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(ClientError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }
}
