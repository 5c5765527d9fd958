//! Tests for the relay loop and its public handle.

use std::sync::Arc;

use serial_test::serial;

use agent_relay::config::{OutputFormat, TimeoutConfig};
use agent_relay::orchestrator::job::JobId;
use agent_relay::orchestrator::session::SessionState;
use agent_relay::orchestrator::supervisor::CancelOutcome;
use agent_relay::relay::{Relay, RelayHandle};
use agent_relay::sink::BufferSinkFactory;
use agent_relay::{AppError, RelayConfig};

use super::test_helpers::{
    fake_agent, missing_agent, SLEEPING_AGENT, STREAMING_AGENT, TEST_TIMEOUT,
};

fn start(config: RelayConfig) -> (RelayHandle, BufferSinkFactory, tokio::task::JoinHandle<()>) {
    let factory = BufferSinkFactory::new();
    let (handle, task) = Relay::spawn(config, Arc::new(factory.clone()));
    (handle, factory, task)
}

async fn wait_for_job(handle: &RelayHandle, id: &JobId) {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while handle.active_jobs().await.expect("relay running").contains(id) {
        assert!(tokio::time::Instant::now() < deadline, "job {id} did not finish");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

#[tokio::test]
#[serial]
async fn streaming_job_through_handle() {
    let agent = fake_agent(STREAMING_AGENT);
    let (handle, factory, task) = start(agent.config.clone());

    assert!(handle.availability());
    let id = handle.start_streaming_job("hi").await.expect("job starts");
    wait_for_job(&handle, &id).await;

    let lines = factory.get(id.as_str()).expect("sink").lines();
    assert_eq!(lines[0], "Hello, world", "{lines:?}");

    handle.shutdown().await;
    task.await.expect("relay task");
}

#[tokio::test]
#[serial]
async fn one_shot_through_handle() {
    let agent = fake_agent(STREAMING_AGENT);
    let (handle, _factory, task) = start(agent.config.clone());

    let answer = handle
        .run_one_shot("hi", OutputFormat::StreamJson)
        .await
        .expect("run succeeds");
    assert_eq!(answer, "Hello, world");

    handle.shutdown().await;
    task.await.expect("relay task");
}

#[tokio::test]
async fn cancel_unknown_job_warns() {
    let (handle, _factory, task) = start(missing_agent());

    let outcome = handle
        .cancel(&JobId::from("job-7"))
        .await
        .expect("relay running");
    assert_eq!(outcome, CancelOutcome::UnknownJob(JobId::from("job-7")));
    assert!(handle.active_jobs().await.expect("relay running").is_empty());

    handle.shutdown().await;
    task.await.expect("relay task");
}

#[tokio::test]
async fn unavailable_agent_is_reported() {
    let (handle, factory, task) = start(missing_agent());

    assert!(!handle.availability());
    let err = handle
        .start_streaming_job("x")
        .await
        .expect_err("must fail");
    assert!(matches!(err, AppError::Unavailable(_)), "{err}");
    assert!(factory.get("job-1").is_none());

    handle.shutdown().await;
    task.await.expect("relay task");
}

#[tokio::test]
#[serial]
async fn cancel_through_handle_terminates_job() {
    let agent = fake_agent(SLEEPING_AGENT);
    let (handle, factory, task) = start(agent.config.clone());

    let id = handle.start_streaming_job("wait").await.expect("job starts");
    let outcome = handle.cancel(&id).await.expect("relay running");
    assert_eq!(outcome, CancelOutcome::Signalled(id.clone()));

    wait_for_job(&handle, &id).await;
    let contents = factory.get(id.as_str()).expect("sink").contents();
    assert!(contents.contains("[agent terminated by signal"), "{contents}");

    handle.shutdown().await;
    task.await.expect("relay task");
}

#[tokio::test]
#[serial]
async fn job_timeout_cancels_job() {
    let agent = fake_agent(SLEEPING_AGENT);
    let config = RelayConfig {
        timeouts: TimeoutConfig { job_seconds: 1 },
        ..agent.config.clone()
    };
    let (handle, factory, task) = start(config);

    let id = handle.start_streaming_job("wait").await.expect("job starts");
    wait_for_job(&handle, &id).await;

    let contents = factory.get(id.as_str()).expect("sink").contents();
    assert!(contents.contains("[agent terminated by signal"), "{contents}");

    handle.shutdown().await;
    task.await.expect("relay task");
}

#[tokio::test]
#[serial]
async fn shutdown_cancels_running_jobs() {
    let agent = fake_agent(SLEEPING_AGENT);
    let (handle, factory, task) = start(agent.config.clone());

    let id = handle.start_streaming_job("wait").await.expect("job starts");
    handle.shutdown().await;
    tokio::time::timeout(TEST_TIMEOUT, task)
        .await
        .expect("relay stops in time")
        .expect("relay task");

    let contents = factory.get(id.as_str()).expect("sink").contents();
    assert!(contents.contains("[agent terminated by signal"), "{contents}");

    let err = handle.active_jobs().await.expect_err("relay stopped");
    assert!(matches!(err, AppError::Closed(_)), "{err}");
}

#[tokio::test]
#[serial]
async fn session_through_handle() {
    let config = RelayConfig {
        binary: "cat".to_owned(),
        ..RelayConfig::default()
    };
    let (handle, _factory, task) = start(config);

    let surface = handle.open_session().await.expect("session opens");
    handle
        .send_to_session("over the relay")
        .await
        .expect("send succeeds");
    super::test_helpers::wait_until("echo", || surface.contents().contains("over the relay\n"))
        .await;

    assert_eq!(
        handle.toggle_session().await.expect("toggle"),
        SessionState::Hidden
    );
    assert_eq!(
        handle.toggle_session().await.expect("toggle"),
        SessionState::Open
    );

    handle.shutdown().await;
    task.await.expect("relay task");
    assert!(surface.is_closed(), "shutdown closes the session");
}
