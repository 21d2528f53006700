//! Deployment sync - keeps a local deployment list in step with a remote service
//!
//! Combines a request/response deployments API with a Socket.IO push channel:
//! every push notification triggers a full re-read of the list.

pub mod config;
pub mod controller;
pub mod deployment;
pub mod error;
pub mod fetch;
pub mod io;
pub mod push;
pub mod render;

pub use config::{load_config, Config};
pub use controller::{ControllerOptions, Lifecycle, SyncController, SyncState};
pub use deployment::DeploymentRecord;
pub use error::{Result, SyncError};

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::fetch::{FetchService, HttpFetchService};
use crate::io::{HttpClient, ReqwestHttpClient};
use crate::push::{PushChannel, WebSocketPushChannel};
use crate::render::{RenderSurface, TerminalRenderer};

type Input = Box<dyn AsyncBufRead + Send + Unpin>;

/// Builder for the deployment sync service.
///
/// Every collaborator defaults to the production implementation derived from
/// [`Config`]; tests swap them out with the `with_*` methods.
pub struct DeploymentSyncBuilder {
    config: Config,
    http: Option<Arc<dyn HttpClient>>,
    fetch: Option<Arc<dyn FetchService>>,
    push: Option<Arc<dyn PushChannel>>,
    renderer: Option<Box<dyn RenderSurface>>,
    input: Option<Input>,
    read_input: bool,
    cancel: Option<CancellationToken>,
}

impl DeploymentSyncBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            http: None,
            fetch: None,
            push: None,
            renderer: None,
            input: None,
            read_input: true,
            cancel: None,
        }
    }

    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// Replace the HTTP-backed fetch service entirely
    pub fn with_fetch_service(mut self, fetch: Arc<dyn FetchService>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn with_push_channel(mut self, push: Arc<dyn PushChannel>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn with_renderer(mut self, renderer: Box<dyn RenderSurface>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Read rename submissions from `input` instead of stdin
    pub fn with_input(mut self, input: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        self.input = Some(Box::new(input));
        self.read_input = true;
        self
    }

    /// Run without reading rename submissions; only cancellation ends the service
    pub fn without_input(mut self) -> Self {
        self.input = None;
        self.read_input = false;
        self
    }

    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<DeploymentSync> {
        let http: Arc<dyn HttpClient> = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestHttpClient::with_timeout(self.config.api.timeout())?),
        };
        let fetch = self.fetch.unwrap_or_else(|| {
            Arc::new(HttpFetchService::new(
                self.config.api.base_url.clone(),
                Arc::clone(&http),
            ))
        });
        let push = self
            .push
            .unwrap_or_else(|| Arc::new(WebSocketPushChannel::new(self.config.push.clone())));

        let controller =
            SyncController::new(fetch, push, ControllerOptions::from_config(&self.config));

        let input = if self.read_input {
            Some(
                self.input
                    .unwrap_or_else(|| Box::new(BufReader::new(tokio::io::stdin()))),
            )
        } else {
            None
        };

        debug!(
            "Built deployment sync service (api {}, push {})",
            self.config.api.base_url, self.config.push.base_url
        );

        Ok(DeploymentSync {
            controller,
            renderer: self
                .renderer
                .unwrap_or_else(|| Box::new(TerminalRenderer::stdout())),
            input,
            cancel: self.cancel.unwrap_or_else(CancellationToken::new),
            exit_on_push_failure: self.config.controller.exit_on_push_failure,
        })
    }
}

/// A built service, ready to start
pub struct DeploymentSync {
    controller: SyncController,
    renderer: Box<dyn RenderSurface>,
    input: Option<Input>,
    cancel: CancellationToken,
    exit_on_push_failure: bool,
}

impl std::fmt::Debug for DeploymentSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentSync")
            .field("controller", &self.controller)
            .field("reads_input", &self.input.is_some())
            .field("exit_on_push_failure", &self.exit_on_push_failure)
            .finish()
    }
}

impl DeploymentSync {
    pub fn controller(&self) -> SyncController {
        self.controller.clone()
    }

    /// Run until cancelled, interrupted with Ctrl-C, or the input closes
    pub async fn start(self) -> Result<()> {
        let DeploymentSync {
            controller,
            mut renderer,
            input,
            cancel,
            exit_on_push_failure,
        } = self;

        let mut states = controller.watch();
        let snapshot = states.borrow_and_update().clone();
        render(&mut *renderer, &snapshot);

        if let Err(e) = controller.start().await {
            let snapshot = states.borrow_and_update().clone();
            render(&mut *renderer, &snapshot);
            if exit_on_push_failure {
                controller.stop().await;
                return Err(e);
            }
            warn!("Continuing without push updates: {}", e);
        }

        let cancel_for_signal = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    cancel_for_signal.cancel();
                }
                Err(e) => error!("Failed to listen for ctrl-c: {}", e),
            }
        });

        let mut lines = input.map(|input| input.lines());
        // One rename in flight at a time; the next line is read once it completes
        let mut renaming: Option<JoinHandle<()>> = None;
        info!("Deployment sync running");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = states.borrow_and_update().clone();
                    render(&mut *renderer, &snapshot);
                }
                finished = rename_finished(&mut renaming), if renaming.is_some() => {
                    renaming = None;
                    if let Err(e) = finished {
                        warn!("Rename task failed: {}", e);
                    }
                }
                line = next_line(&mut lines), if lines.is_some() && renaming.is_none() => match line {
                    Ok(Some(line)) => {
                        let name = line.trim();
                        if !name.is_empty() {
                            controller.set_pending_name(name);
                            renaming = Some(tokio::spawn(submit(controller.clone())));
                        }
                    }
                    Ok(None) => {
                        info!("Input closed");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read input: {}", e);
                        break;
                    }
                },
            }
        }

        if let Some(rename) = renaming.take() {
            debug!("Abandoning in-flight rename");
            rename.abort();
        }
        controller.stop().await;
        if states.has_changed().unwrap_or(false) {
            let snapshot = states.borrow_and_update().clone();
            render(&mut *renderer, &snapshot);
        }
        info!("Deployment sync stopped");
        Ok(())
    }
}

async fn next_line(
    lines: &mut Option<tokio::io::Lines<Input>>,
) -> std::io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

async fn rename_finished(
    renaming: &mut Option<JoinHandle<()>>,
) -> std::result::Result<(), tokio::task::JoinError> {
    match renaming {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn submit(controller: SyncController) {
    if let Err(e) = controller.submit_rename().await {
        warn!("Rename not submitted: {}", e);
    }
}

fn render(renderer: &mut dyn RenderSurface, state: &SyncState) {
    if let Err(e) = renderer.render(state) {
        warn!("Failed to render state: {}", e);
    }
}
