//! Shared helpers for process-level integration tests.
//!
//! Fake agents are small `sh` scripts written into a temporary directory
//! and configured as the relay's binary, so every test controls exactly
//! what the "agent" prints and how it exits.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use tempfile::TempDir;

use agent_relay::RelayConfig;

/// Upper bound for any single wait in these tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A fake agent script and the directory that keeps it alive.
pub struct FakeAgent {
    /// Keeps the script on disk for the lifetime of the test.
    pub _dir: TempDir,
    /// Relay config whose binary is the script.
    pub config: RelayConfig,
}

/// Write an executable `sh` script with `body` and build a config using it.
pub fn fake_agent(body: &str) -> FakeAgent {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fake-agent");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake agent");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake agent");

    let config = RelayConfig {
        binary: path.display().to_string(),
        ..RelayConfig::default()
    };
    FakeAgent { _dir: dir, config }
}

/// Config pointing at a binary that does not exist.
pub fn missing_agent() -> RelayConfig {
    RelayConfig {
        binary: "agent-relay-test-no-such-binary".to_owned(),
        ..RelayConfig::default()
    }
}

/// Fake agent that streams two fragments and then a terminal result.
pub const STREAMING_AGENT: &str = r#"
printf '%s\n' '{"type":"system","subtype":"init"}'
printf '%s\n' '{"type":"assistant","message":{"content":[{"text":"Hello"}]}}'
printf '%s\n' '{"type":"assistant","message":{"content":[{"text":", world"}]}}'
printf '%s\n' '{"type":"result","result":"Hello, world"}'
"#;

/// Fake agent that announces itself and then blocks until signalled.
pub const SLEEPING_AGENT: &str = r#"
printf '%s\n' '{"type":"system","subtype":"init"}'
exec sleep 30
"#;

/// Poll `condition` until it holds, panicking after [`TEST_TIMEOUT`].
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
