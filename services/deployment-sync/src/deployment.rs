//! Deployment records and the synthetic records used to surface failures

use serde::{Deserialize, Serialize};

/// Status shown before the first fetch completes
pub const STATUS_FETCHING: &str = "fetching";

/// Status shown when the deployments API or push channel cannot be reached
pub const STATUS_UNABLE_TO_CONNECT: &str = "Unable to connect to server";

/// A single deployment as returned by the deployments API.
///
/// Every field is optional. The list carrying these records is ordered and
/// may contain duplicates; position is the only display key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl DeploymentRecord {
    /// A record carrying only a status line
    pub fn with_status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }

    /// A record carrying only a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn fetching() -> Self {
        Self::with_status(STATUS_FETCHING)
    }

    pub fn unable_to_connect() -> Self {
        Self::with_status(STATUS_UNABLE_TO_CONNECT)
    }
}

/// Body of `GET /api/v1/deployments`.
///
/// The `deployments` key is required; a body without it is not a list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentList {
    pub deployments: Vec<DeploymentRecord>,
}

/// Body of `PUT /api/v1/deployment/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}
