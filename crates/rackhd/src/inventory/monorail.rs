//! Monorail (RackHD API 1.1) client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use super::traits::{InventoryClient, LookupRecord, Node, ObmDescriptor, Sku, WorkflowStatus};
use crate::error::ClientError;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// RackHD Monorail API client.
#[derive(Clone)]
pub struct Monorail {
    /// HTTP client.
    client: Client,
    /// Base URL ending in `/api/1.1/`.
    base: Url,
}

impl Monorail {
    /// Create a new Monorail client.
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. `http://localhost:8080/api/1.1/`
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

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base.join(path)?)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.url(path)?;
        debug!(url = %url, "GET request");

        let response = self.client.get(url).send().await?;
        Self::handle_response(response).await
    }

    /// Turn a response into `T`, or the matching error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "Failed to parse response");
                ClientError::Serialization(e)
            })
        } else if status == StatusCode::NOT_FOUND {
            Err(ClientError::NotFound(text))
        } else {
            Err(ClientError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Check status only, discarding the body.
    async fn expect_success(response: reqwest::Response) -> Result<(), ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
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
impl InventoryClient for Monorail {
    async fn get_config(&self) -> Result<(), ClientError> {
        let _: Value = self.get("config").await?;
        Ok(())
    }

    async fn list_skus(&self) -> Result<Vec<Sku>, ClientError> {
        self.get("skus").await
    }

    async fn list_sku_nodes(&self, sku_id: &str) -> Result<Vec<Node>, ClientError> {
        self.get(&format!("skus/{sku_id}/nodes")).await
    }

    async fn tag_node(&self, node_id: &str, tag: &str) -> Result<(), ClientError> {
        let url = self.url(&format!("nodes/{node_id}/tags"))?;
        debug!(url = %url, tag, "PATCH request");

        let response = self
            .client
            .patch(url)
            .json(&json!({ "tags": [tag] }))
            .send()
            .await?;
        Self::expect_success(response).await
    }

    async fn delete_node(&self, node_id: &str) -> Result<(), ClientError> {
        let url = self.url(&format!("nodes/{node_id}"))?;
        debug!(url = %url, "DELETE request");

        let response = self.client.delete(url).send().await?;
        Self::expect_success(response).await
    }

    async fn submit_workflow(&self, node_id: &str, name: &str) -> Result<String, ClientError> {
        let url = self.url(&format!("nodes/{node_id}/workflows"))?;
        debug!(url = %url, workflow = name, "POST request");

        let response = self
            .client
            .post(url)
            .query(&[("name", name)])
            .send()
            .await?;
        let payload: Value = Self::handle_response(response).await?;

        payload
            .get("instanceId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ClientError::MissingField("instanceId"))
    }

    async fn workflow_status(&self, instance_id: &str) -> Result<WorkflowStatus, ClientError> {
        self.get(&format!("workflows/{instance_id}")).await
    }

    async fn node_obms(&self, node_id: &str) -> Result<Vec<ObmDescriptor>, ClientError> {
        self.get(&format!("nodes/{node_id}/obm")).await
    }

    async fn lookup(&self, query: &str) -> Result<Vec<LookupRecord>, ClientError> {
        let mut url = self.url("lookups")?;
        url.query_pairs_mut().append_pair("q", query);
        debug!(url = %url, "GET request");

        let response = self.client.get(url).send().await?;
        Self::handle_response(response).await
    }
}
