//! BDD test world for the deployment sync service

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cucumber::World;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use deployment_sync::fetch::FetchService;
use deployment_sync::io::{HttpClient, HttpResponse};
use deployment_sync::push::LocalPushChannel;
use deployment_sync::render::RenderSurface;
use deployment_sync::{
    Config, ControllerOptions, DeploymentRecord, SyncController, SyncError, SyncState,
};

/// Topic the controller subscribes to by default
pub const TOPIC: &str = "deployments";

/// How long `then` steps wait for asynchronous state changes
pub const WAIT: Duration = Duration::from_secs(3);

// --- Test doubles ---

/// In-memory deployments API
#[derive(Debug, Default)]
pub struct StubFetch {
    pub deployments: RwLock<Vec<DeploymentRecord>>,
    pub list_error: RwLock<Option<String>>,
    pub rename_error: RwLock<Option<String>>,
    pub list_calls: AtomicUsize,
    pub rename_calls: AtomicUsize,
    pub renames_hang: AtomicBool,
    pub renames: RwLock<Vec<(i64, String)>>,
}

impl StubFetch {
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn rename_calls(&self) -> usize {
        self.rename_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FetchService for StubFetch {
    async fn list_deployments(&self) -> deployment_sync::Result<Vec<DeploymentRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.list_error.read().await.clone() {
            return Err(SyncError::Transport(error));
        }
        Ok(self.deployments.read().await.clone())
    }

    async fn rename_deployment(&self, id: i64, name: &str) -> deployment_sync::Result<()> {
        self.rename_calls.fetch_add(1, Ordering::SeqCst);
        if self.renames_hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(error) = self.rename_error.read().await.clone() {
            return Err(SyncError::Transport(error));
        }
        self.renames.write().await.push((id, name.to_string()));
        Ok(())
    }
}

/// A recorded HTTP request
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

/// An HTTP client that records requests and answers with one canned response
#[derive(Debug)]
pub struct RecordingHttpClient {
    pub requests: RwLock<Vec<RecordedRequest>>,
    pub response: RwLock<Result<HttpResponse, String>>,
}

impl Default for RecordingHttpClient {
    fn default() -> Self {
        Self {
            requests: RwLock::new(Vec::new()),
            response: RwLock::new(Ok(HttpResponse {
                status: 200,
                body: r#"{"deployments": []}"#.to_string(),
            })),
        }
    }
}

impl RecordingHttpClient {
    async fn respond(&self) -> deployment_sync::Result<HttpResponse> {
        self.response
            .read()
            .await
            .clone()
            .map_err(SyncError::Transport)
    }
}

#[async_trait::async_trait]
impl HttpClient for RecordingHttpClient {
    async fn get(&self, url: &str) -> deployment_sync::Result<HttpResponse> {
        self.requests.write().await.push(RecordedRequest {
            method: "GET".to_string(),
            url: url.to_string(),
            body: None,
        });
        self.respond().await
    }

    async fn put_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> deployment_sync::Result<HttpResponse> {
        self.requests.write().await.push(RecordedRequest {
            method: "PUT".to_string(),
            url: url.to_string(),
            body: Some(body.clone()),
        });
        self.respond().await
    }
}

/// Render surface that keeps every snapshot it was handed
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    pub frames: Arc<std::sync::Mutex<Vec<SyncState>>>,
}

impl RecordingRenderer {
    pub fn frames(&self) -> Vec<SyncState> {
        self.frames.lock().unwrap().clone()
    }
}

impl RenderSurface for RecordingRenderer {
    fn render(&mut self, state: &SyncState) -> deployment_sync::Result<()> {
        self.frames.lock().unwrap().push(state.clone());
        Ok(())
    }
}

#[derive(Debug, Default, World)]
pub struct SyncWorld {
    // Collaborators shared by controller and service scenarios
    pub fetch: Arc<StubFetch>,
    pub push: LocalPushChannel,

    // Controller testing
    pub options: Option<ControllerOptions>,
    pub controller: Option<SyncController>,
    pub start_result: Option<deployment_sync::Result<()>>,
    pub submit_result: Option<deployment_sync::Result<()>>,

    // Fetch service testing
    pub http: Option<Arc<RecordingHttpClient>>,
    pub list_result: Option<deployment_sync::Result<Vec<DeploymentRecord>>>,
    pub rename_result: Option<deployment_sync::Result<()>>,

    // Service testing
    pub config: Option<Config>,
    pub input: Option<String>,
    pub cancel: Option<CancellationToken>,
    pub renderer: RecordingRenderer,
    pub service_result: Option<deployment_sync::Result<()>>,
}

impl SyncWorld {
    /// The controller under test, created on first use
    pub fn controller(&mut self) -> SyncController {
        if self.controller.is_none() {
            let options = self.options.clone().unwrap_or_default();
            self.controller = Some(SyncController::new(
                self.fetch.clone(),
                Arc::new(self.push.clone()),
                options,
            ));
        }
        self.controller
            .clone()
            .expect("controller was just created")
    }

    pub fn options_mut(&mut self) -> &mut ControllerOptions {
        self.options.get_or_insert_with(ControllerOptions::default)
    }
}

/// Parse a comma separated list of names (`""` is the empty list)
pub fn parse_names(names: &str) -> Vec<DeploymentRecord> {
    names
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(DeploymentRecord::named)
        .collect()
}
