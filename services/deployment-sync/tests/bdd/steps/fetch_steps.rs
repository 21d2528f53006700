//! BDD step definitions for the HTTP fetch service feature

use std::sync::Arc;

use cucumber::{given, then, when};
use deployment_sync::fetch::{FetchService, HttpFetchService};
use deployment_sync::io::{HttpClient, HttpResponse};
use deployment_sync::SyncError;

use crate::world::{parse_names, RecordingHttpClient, SyncWorld};

fn fetch_service(world: &mut SyncWorld) -> HttpFetchService {
    let http = world
        .http
        .get_or_insert_with(|| Arc::new(RecordingHttpClient::default()))
        .clone();
    HttpFetchService::new("http://deploy.local:5000/", http as Arc<dyn HttpClient>)
}

// --- Given steps ---

#[given(expr = "the server answers with status {int} and body {string}")]
async fn server_answers(world: &mut SyncWorld, status: u16, body: String) {
    let http = world
        .http
        .get_or_insert_with(|| Arc::new(RecordingHttpClient::default()));
    *http.response.write().await = Ok(HttpResponse { status, body });
}

#[given("the server cannot be reached")]
async fn server_unreachable(world: &mut SyncWorld) {
    let http = world
        .http
        .get_or_insert_with(|| Arc::new(RecordingHttpClient::default()));
    *http.response.write().await = Err("connection refused".to_string());
}

// --- When steps ---

#[when("the deployment list is requested")]
async fn list_requested(world: &mut SyncWorld) {
    let service = fetch_service(world);
    world.list_result = Some(service.list_deployments().await);
}

#[when(expr = "deployment {int} is renamed to {string}")]
async fn deployment_renamed(world: &mut SyncWorld, id: i64, name: String) {
    let service = fetch_service(world);
    world.rename_result = Some(service.rename_deployment(id, &name).await);
}

// --- Then steps ---

#[then(expr = "the fetched deployments should be {string}")]
fn fetched_deployments(world: &mut SyncWorld, names: String) {
    match world.list_result.as_ref().expect("list not requested") {
        Ok(deployments) => {
            let fetched: Vec<Option<String>> =
                deployments.iter().map(|d| d.name.clone()).collect();
            let expected: Vec<Option<String>> =
                parse_names(&names).into_iter().map(|d| d.name).collect();
            assert_eq!(fetched, expected);
        }
        Err(e) => panic!("list failed: {}", e),
    }
}

#[then("the list request should fail with a transport error")]
fn list_failed(world: &mut SyncWorld) {
    let result = world.list_result.as_ref().expect("list not requested");
    assert!(
        matches!(result, Err(SyncError::Transport(_))),
        "expected a transport error, got {:?}",
        result
    );
}

#[then("the rename should succeed")]
fn rename_succeeded(world: &mut SyncWorld) {
    let result = world.rename_result.as_ref().expect("rename not sent");
    assert!(result.is_ok(), "rename failed: {:?}", result);
}

#[then("the rename should fail with a transport error")]
fn rename_failed(world: &mut SyncWorld) {
    let result = world.rename_result.as_ref().expect("rename not sent");
    assert!(
        matches!(result, Err(SyncError::Transport(_))),
        "expected a transport error, got {:?}",
        result
    );
}

#[then(expr = "the server should have received a {word} to {string}")]
async fn server_received(world: &mut SyncWorld, method: String, path: String) {
    let http = world.http.as_ref().expect("no recording HTTP client");
    let requests = http.requests.read().await;
    let url = format!("http://deploy.local:5000{}", path);
    assert!(
        requests.iter().any(|r| r.method == method && r.url == url),
        "expected {} {}, got {:?}",
        method,
        url,
        *requests
    );
}

#[then(expr = "the request body should be {string}")]
async fn request_body(world: &mut SyncWorld, body: String) {
    let http = world.http.as_ref().expect("no recording HTTP client");
    let requests = http.requests.read().await;
    let expected: serde_json::Value = serde_json::from_str(&body).expect("invalid JSON in step");
    let last = requests.last().expect("no request recorded");
    assert_eq!(last.body.as_ref(), Some(&expected));
}
