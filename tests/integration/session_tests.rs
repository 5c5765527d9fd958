//! Tests for the interactive session manager against real processes.
//!
//! `cat` stands in for an interactive agent: it echoes every input line.

use std::sync::Arc;

use serial_test::serial;

use agent_relay::orchestrator::session::{SessionManager, SessionState};
use agent_relay::sink::OutputSink;
use agent_relay::{AppError, RelayConfig};

use super::test_helpers::{fake_agent, missing_agent, wait_until, TEST_TIMEOUT};

fn cat_config() -> RelayConfig {
    RelayConfig {
        binary: "cat".to_owned(),
        ..RelayConfig::default()
    }
}

#[tokio::test]
#[serial]
async fn open_send_and_echo() {
    let mut sessions = SessionManager::new(Arc::new(cat_config()));
    assert_eq!(sessions.state(), SessionState::Absent);

    let surface = sessions.open().expect("session opens");
    assert_eq!(sessions.state(), SessionState::Open);
    assert!(sessions.is_process_alive());
    assert!(sessions.pid().is_some());
    assert_eq!(surface.title(), "*agent-session*");
    assert_eq!(surface.focus_requests(), 1);

    sessions.send("hello agent").expect("send succeeds");
    wait_until("echoed input", || surface.contents().contains("hello agent\n")).await;

    sessions.close();
    assert_eq!(sessions.state(), SessionState::Absent);
    assert!(surface.is_closed());
}

#[tokio::test]
#[serial]
async fn reopening_reuses_the_process() {
    let mut sessions = SessionManager::new(Arc::new(cat_config()));

    let first = sessions.open().expect("opens");
    let pid = sessions.pid();
    let second = sessions.open().expect("re-opens");

    assert_eq!(sessions.pid(), pid);
    assert_eq!(second.focus_requests(), 2);
    first.append("marker");
    assert_eq!(second.contents(), "marker", "same surface");
}

#[tokio::test]
#[serial]
async fn toggle_hides_and_shows() {
    let mut sessions = SessionManager::new(Arc::new(cat_config()));

    assert_eq!(sessions.toggle().expect("toggle opens"), SessionState::Open);
    let pid = sessions.pid();
    let surface = sessions.surface().expect("surface exists");

    assert_eq!(sessions.toggle().expect("toggle hides"), SessionState::Hidden);
    assert!(!surface.is_visible());
    assert!(sessions.is_process_alive(), "hiding keeps the process");

    assert_eq!(sessions.toggle().expect("toggle shows"), SessionState::Open);
    assert!(surface.is_visible());
    assert_eq!(sessions.pid(), pid);
}

#[tokio::test]
#[serial]
async fn send_opens_without_focus() {
    let mut sessions = SessionManager::new(Arc::new(cat_config()));

    sessions.send("first line").expect("send opens the session");

    let surface = sessions.surface().expect("surface exists");
    assert_eq!(surface.focus_requests(), 0);
    wait_until("echoed input", || surface.contents().contains("first line\n")).await;
}

#[tokio::test]
#[serial]
async fn process_exit_is_reported_and_session_respawns() {
    let agent = fake_agent("read line\necho \"got $line\"\nexit 4");
    let mut sessions = SessionManager::new(Arc::new(agent.config.clone()));

    let surface = sessions.open().expect("opens");
    sessions.send("ping").expect("send");

    let exit = tokio::time::timeout(TEST_TIMEOUT, sessions.next_exit())
        .await
        .expect("exit in time")
        .expect("exit notification");
    sessions.on_exit(exit);

    assert_eq!(exit.status.code, Some(4));
    assert!(!sessions.is_process_alive());
    let contents = surface.contents();
    assert!(contents.contains("got ping\n"), "{contents}");
    assert!(contents.contains("[session exited with code 4]"), "{contents}");

    sessions.send("again").expect("send respawns the process");
    assert!(sessions.is_process_alive());
    assert_eq!(
        sessions.surface().map(|s| s.title().to_owned()),
        Some(surface.title().to_owned())
    );
    wait_until("second reply", || surface.contents().contains("got again\n")).await;
}

#[tokio::test]
#[serial]
async fn stale_exit_is_ignored() {
    let mut sessions = SessionManager::new(Arc::new(cat_config()));
    sessions.open().expect("opens");
    sessions.close();

    let surface = sessions.open().expect("opens a fresh session");
    let contents_before = surface.contents();

    // An exit notification from the first (closed) process arrives late.
    let stale = tokio::time::timeout(TEST_TIMEOUT, sessions.next_exit())
        .await
        .expect("exit in time")
        .expect("exit notification");
    assert_eq!(stale.generation, 1);
    sessions.on_exit(stale);

    assert!(sessions.is_process_alive());
    assert_eq!(surface.contents(), contents_before);
}

#[tokio::test]
async fn unavailable_agent_opens_nothing() {
    let mut sessions = SessionManager::new(Arc::new(missing_agent()));

    let err = sessions.open().expect_err("must fail");
    assert!(matches!(err, AppError::Unavailable(_)), "{err}");
    assert_eq!(sessions.state(), SessionState::Absent);
    assert!(sessions.surface().is_none());
}
