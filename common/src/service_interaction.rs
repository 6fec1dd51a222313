use crate::{ProcessedAgentData, PROCESSED_AGENT_DATA_PATH};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error};
use reqwest::{Client, StatusCode};

/// Destination for batches of processed agent data.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Persists the batch, returning true only when the store accepted it.
    async fn save_data(&self, processed_agent_data_batch: &[ProcessedAgentData]) -> bool;
}

/// Talks to the store service over its HTTP API.
#[derive(Clone, Debug)]
pub struct StoreApiAdapter {
    api_base_url: String,
    client: Client,
}

impl StoreApiAdapter {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self::with_client(api_base_url, Client::new())
    }

    pub fn with_client(api_base_url: impl Into<String>, client: Client) -> Self {
        let api_base_url = api_base_url.into().trim_end_matches('/').to_string();
        StoreApiAdapter {
            api_base_url,
            client,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.api_base_url, PROCESSED_AGENT_DATA_PATH)
    }

    async fn post_batch(&self, batch: &[ProcessedAgentData]) -> Result<StatusCode> {
        let response = self
            .client
            .post(self.endpoint())
            .json(batch)
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.endpoint()))?;
        Ok(response.status())
    }
}

#[async_trait]
impl StoreGateway for StoreApiAdapter {
    async fn save_data(&self, processed_agent_data_batch: &[ProcessedAgentData]) -> bool {
        debug!(
            "Sending {} processed agent data items to {}",
            processed_agent_data_batch.len(),
            self.endpoint()
        );

        match self.post_batch(processed_agent_data_batch).await {
            Ok(StatusCode::OK) => true,
            Ok(status) => {
                error!("Store API rejected the batch with status {}", status);
                false
            }
            Err(e) => {
                error!("Error saving data to Store API: {:#}", e);
                false
            }
        }
    }
}
