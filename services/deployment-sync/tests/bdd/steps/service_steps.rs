//! BDD step definitions for the service builder and lifecycle feature

use std::sync::Arc;

use cucumber::{given, then, when};
use tokio_util::sync::CancellationToken;

use deployment_sync::push::PushChannel;
use deployment_sync::{Config, DeploymentSyncBuilder, SyncError};

use crate::world::{parse_names, SyncWorld, WAIT};

fn build_service_builder(world: &mut SyncWorld) -> DeploymentSyncBuilder {
    let config = world.config.clone().unwrap_or_default();
    let mut builder = DeploymentSyncBuilder::new(config)
        .with_fetch_service(world.fetch.clone())
        .with_push_channel(Arc::new(world.push.clone()) as Arc<dyn PushChannel>)
        .with_renderer(Box::new(world.renderer.clone()));

    builder = match world.input.take() {
        Some(input) => builder.with_input(std::io::Cursor::new(input.into_bytes())),
        None => builder.without_input(),
    };
    if let Some(cancel) = world.cancel.clone() {
        builder = builder.with_cancellation_token(cancel);
    }
    builder
}

// --- Given steps ---

#[given("a default service config")]
fn default_config(world: &mut SyncWorld) {
    world.config = Some(Config::default());
}

#[given("the service exits on push failure")]
fn exits_on_push_failure(world: &mut SyncWorld) {
    world
        .config
        .get_or_insert_with(Config::default)
        .controller
        .exit_on_push_failure = true;
}

#[given(expr = "the user types {string}")]
fn user_types(world: &mut SyncWorld, line: String) {
    let input = world.input.get_or_insert_with(String::new);
    input.push_str(&line);
    input.push('\n');
}

#[given("the deployments API never answers renames")]
fn renames_hang(world: &mut SyncWorld) {
    world
        .fetch
        .renames_hang
        .store(true, std::sync::atomic::Ordering::SeqCst);
}

#[given("a pre-cancelled cancellation token")]
fn pre_cancelled_token(world: &mut SyncWorld) {
    let token = CancellationToken::new();
    token.cancel();
    world.cancel = Some(token);
}

// --- When steps ---

#[when("the service runs")]
async fn service_runs(world: &mut SyncWorld) {
    let builder = build_service_builder(world);
    let result = match builder.build() {
        Ok(service) => tokio::time::timeout(WAIT, service.start())
            .await
            .expect("service did not finish"),
        Err(e) => Err(e),
    };
    world.service_result = Some(result);
}

#[when(expr = "the service runs until {string} is shown")]
async fn service_runs_until_shown(world: &mut SyncWorld, names: String) {
    let cancel = CancellationToken::new();
    world.cancel = Some(cancel.clone());
    let builder = build_service_builder(world);
    let service = builder.build().expect("service should build");
    let handle = tokio::spawn(service.start());

    let expected = parse_names(&names);
    let renderer = world.renderer.clone();
    let shown = tokio::time::timeout(WAIT, async {
        loop {
            if renderer.frames().iter().any(|f| f.deployments == expected) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;

    cancel.cancel();
    let result = tokio::time::timeout(WAIT, handle)
        .await
        .expect("service did not stop")
        .expect("service task panicked");
    assert!(shown.is_ok(), "{:?} was never rendered", names);
    world.service_result = Some(result);
}

#[when("the service is cancelled while a rename is in flight")]
async fn cancelled_during_rename(world: &mut SyncWorld) {
    let cancel = CancellationToken::new();
    world.cancel = Some(cancel.clone());
    let builder = build_service_builder(world);
    let service = builder.build().expect("service should build");
    let handle = tokio::spawn(service.start());

    let fetch = world.fetch.clone();
    let started = tokio::time::timeout(WAIT, async {
        while fetch.rename_calls() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(started.is_ok(), "rename was never sent");

    cancel.cancel();
    let result = tokio::time::timeout(WAIT, handle)
        .await
        .expect("service ignored cancellation during a rename")
        .expect("service task panicked");
    world.service_result = Some(result);
}

// --- Then steps ---

#[then("the service should finish successfully")]
fn service_finished(world: &mut SyncWorld) {
    let result = world.service_result.as_ref().expect("service not run");
    assert!(result.is_ok(), "service failed: {:?}", result);
}

#[then("the service should fail with a connection error")]
fn service_failed(world: &mut SyncWorld) {
    let result = world.service_result.as_ref().expect("service not run");
    assert!(
        matches!(result, Err(SyncError::Connection(_))),
        "expected a connection error, got {:?}",
        result
    );
}

#[then(expr = "the first rendered status should be {string}")]
fn first_rendered_status(world: &mut SyncWorld, status: String) {
    let frames = world.renderer.frames();
    let first = frames.first().expect("nothing rendered");
    assert_eq!(first.deployments.len(), 1);
    assert_eq!(first.deployments[0].status.as_deref(), Some(status.as_str()));
}

#[then(expr = "the last rendered status should be {string}")]
fn last_rendered_status(world: &mut SyncWorld, status: String) {
    let frames = world.renderer.frames();
    let last = frames.last().expect("nothing rendered");
    assert_eq!(last.deployments.len(), 1, "{:?}", last);
    assert_eq!(last.deployments[0].status.as_deref(), Some(status.as_str()));
}

#[then(expr = "the status {string} should have been rendered once")]
fn status_rendered_once(world: &mut SyncWorld, status: String) {
    let frames = world.renderer.frames();
    let count = frames
        .iter()
        .filter(|f| {
            f.deployments.len() == 1 && f.deployments[0].status.as_deref() == Some(status.as_str())
        })
        .count();
    assert_eq!(count, 1, "rendered frames: {:?}", frames);
}

#[then("the push channel should have no subscribers")]
async fn push_has_no_subscribers(world: &mut SyncWorld) {
    for _ in 0..100 {
        if world.push.subscriber_count() == 0 {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!(
        "push channel still has {} subscribers",
        world.push.subscriber_count()
    );
}
