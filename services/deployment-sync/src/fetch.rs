//! Request/response access to the deployments API

use std::sync::Arc;

use async_trait::async_trait;

use crate::deployment::{DeploymentList, DeploymentRecord, RenameRequest};
use crate::io::HttpClient;

/// Read and write operations over deployments
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait FetchService: Send + Sync {
    /// Read the full deployment list
    async fn list_deployments(&self) -> crate::Result<Vec<DeploymentRecord>>;

    /// Write a new name for deployment `id`
    async fn rename_deployment(&self, id: i64, name: &str) -> crate::Result<()>;
}

/// FetchService over the JSON REST API (`/api/v1/...`)
pub struct HttpFetchService {
    base_url: String,
    http: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for HttpFetchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetchService")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpFetchService {
    pub fn new(base_url: impl Into<String>, http: Arc<dyn HttpClient>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        tracing::debug!("Created HttpFetchService at {}", base_url);
        Self { base_url, http }
    }

    fn list_url(&self) -> String {
        format!("{}/api/v1/deployments", self.base_url)
    }

    fn deployment_url(&self, id: i64) -> String {
        format!("{}/api/v1/deployment/{}", self.base_url, id)
    }
}

#[async_trait]
impl FetchService for HttpFetchService {
    async fn list_deployments(&self) -> crate::Result<Vec<DeploymentRecord>> {
        let url = self.list_url();
        let response = self.http.get(&url).await?;

        if !response.is_success() {
            return Err(crate::SyncError::Transport(format!(
                "GET {} returned status {}: {}",
                url, response.status, response.body
            )));
        }

        let list: DeploymentList = serde_json::from_str(&response.body).map_err(|e| {
            crate::SyncError::Transport(format!("Invalid deployment list from {}: {}", url, e))
        })?;

        tracing::debug!("Fetched {} deployments", list.deployments.len());
        Ok(list.deployments)
    }

    async fn rename_deployment(&self, id: i64, name: &str) -> crate::Result<()> {
        let url = self.deployment_url(id);
        let body = serde_json::to_value(RenameRequest {
            name: name.to_string(),
        })?;
        let response = self.http.put_json(&url, &body).await?;

        if !response.is_success() {
            return Err(crate::SyncError::Transport(format!(
                "PUT {} returned status {}: {}",
                url, response.status, response.body
            )));
        }

        tracing::debug!("Renamed deployment {} to '{}'", id, name);
        Ok(())
    }
}
