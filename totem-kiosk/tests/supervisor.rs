//! Supervisor lifecycle tests against shell-script fake backends.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::broadcast;
use totem_config::{BackendConfig, Transport};
use totem_core::command::Command;
use totem_core::{BackendEvent, SensorStatus, TicketStatus, TotemError};
use totem_kiosk::supervisor::{ExitState, StartOutcome, Supervisor};

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-backend.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("stat script").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod script");
    path
}

fn supervisor_for(script: PathBuf) -> (Supervisor, broadcast::Receiver<BackendEvent>) {
    let config = BackendConfig {
        executable: Some(script),
        ..BackendConfig::default()
    };
    let (events_tx, events_rx) = broadcast::channel(32);
    (Supervisor::new(config, events_tx), events_rx)
}

async fn next_event(rx: &mut broadcast::Receiver<BackendEvent>) -> BackendEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within deadline")
        .expect("stream open")
}

#[tokio::test]
async fn stdout_frames_become_normalized_events() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_script(
        dir.path(),
        r#"echo '{"status":"ready"}'
echo 'matcher booted'
echo '{broken json'
echo '{"type":"ticket","status":"approved","data":{"nombre":"ANA SOTO","run":"12345678","curso":"3A","racion":"almuerzo"}}'
sleep 5"#,
    );
    let (mut supervisor, mut events) = supervisor_for(script);

    supervisor.start().expect("spawn fake backend");

    // Diagnostics and malformed lines are logged, never published: the next
    // two events on the stream are exactly the two well-formed frames.
    assert!(matches!(
        next_event(&mut events).await,
        BackendEvent::Status {
            status: SensorStatus::Waiting
        }
    ));
    match next_event(&mut events).await {
        BackendEvent::Ticket { status, data } => {
            assert_eq!(status, TicketStatus::Approved);
            assert_eq!(data.nombre.as_deref(), Some("ANA SOTO"));
            assert_eq!(data.racion.as_deref(), Some("almuerzo"));
        }
        other => panic!("expected ticket, got {other:?}"),
    }

    let handle = supervisor.handle().expect("live handle");
    assert_eq!(handle.malformed_lines(), 1);

    supervisor.stop().await;
    assert!(!supervisor.is_alive());
}

#[tokio::test]
async fn start_is_idempotent_while_the_process_lives() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_script(dir.path(), "sleep 5");
    let (mut supervisor, _events) = supervisor_for(script);

    let first = supervisor.start().expect("first start");
    let StartOutcome::Started { pid } = first else {
        panic!("expected fresh spawn, got {first:?}");
    };
    assert_eq!(
        supervisor.start().expect("second start"),
        StartOutcome::AlreadyRunning { pid }
    );

    supervisor.stop().await;
    // A second stop with nothing running is a no-op.
    supervisor.stop().await;
}

#[tokio::test]
async fn missing_executable_is_a_spawn_error() {
    let (mut supervisor, _events) = supervisor_for(PathBuf::from("/nonexistent/matcher"));
    let err = supervisor.start().expect_err("spawn must fail");
    assert!(matches!(err, TotemError::Spawn(_)));
    assert!(!supervisor.is_alive());
}

#[tokio::test]
async fn unconfigured_executable_is_a_spawn_error() {
    let (events_tx, _events_rx) = broadcast::channel(4);
    let mut supervisor = Supervisor::new(BackendConfig::default(), events_tx);
    assert!(matches!(
        supervisor.start(),
        Err(TotemError::Spawn(_))
    ));
}

#[tokio::test]
async fn spawn_passes_the_transport_mode_flag() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_script(dir.path(), r#"echo "{\"arg\":\"$1\"}""#);
    let (mut supervisor, mut events) = supervisor_for(script);

    supervisor.start().expect("spawn fake backend");
    match next_event(&mut events).await {
        BackendEvent::Raw { payload } => assert_eq!(payload["arg"], "--headless"),
        other => panic!("expected raw echo, got {other:?}"),
    }
    supervisor.stop().await;
}

#[tokio::test]
async fn commands_reach_the_backend_stdin() {
    let dir = tempfile::tempdir().expect("tempdir");
    // Echoes stdin back, so the dispatched frame reappears on the event
    // stream as an opaque payload.
    let script = write_script(dir.path(), "cat");
    let (mut supervisor, mut events) = supervisor_for(script);

    supervisor.start().expect("spawn fake backend");
    supervisor
        .send(&Command::Enroll {
            run: "12345678".into(),
            nombre: "ANA SOTO".into(),
        })
        .await
        .expect("write to stdin");

    match next_event(&mut events).await {
        BackendEvent::Raw { payload } => {
            assert_eq!(payload["cmd"], "enroll");
            assert_eq!(payload["run"], "12345678");
        }
        other => panic!("expected echoed frame, got {other:?}"),
    }
    supervisor.stop().await;
}

#[tokio::test]
async fn stop_returns_even_when_a_grandchild_holds_the_pipes() {
    let dir = tempfile::tempdir().expect("tempdir");
    // The shell's child inherits all three pipes; killing the shell alone
    // leaves it orphaned, reading stdin and holding stdout open.
    let script = write_script(dir.path(), "cat &\nwait");
    let (mut supervisor, _events) = supervisor_for(script);

    supervisor.start().expect("spawn fake backend");
    supervisor
        .send(&Command::Menu { option: 1 })
        .await
        .expect("write to stdin");

    tokio::time::timeout(Duration::from_secs(10), supervisor.stop())
        .await
        .expect("stop must not hang");
    assert!(!supervisor.is_alive());
}

#[tokio::test]
async fn send_without_a_process_is_backend_gone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_script(dir.path(), "sleep 5");
    let (mut supervisor, _events) = supervisor_for(script);

    assert!(matches!(
        supervisor.send(&Command::Stop).await,
        Err(TotemError::BackendGone)
    ));
}

#[tokio::test]
async fn send_is_rejected_on_the_http_transport() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_script(dir.path(), "sleep 5");
    let config = BackendConfig {
        executable: Some(script),
        transport: Transport::Http,
        ..BackendConfig::default()
    };
    let (events_tx, _events_rx) = broadcast::channel(4);
    let mut supervisor = Supervisor::new(config, events_tx);

    supervisor.start().expect("spawn fake backend");
    assert!(matches!(
        supervisor.send(&Command::Stop).await,
        Err(TotemError::UnsupportedTransport("http"))
    ));
    supervisor.stop().await;
}

#[tokio::test]
async fn unexpected_exit_is_published_without_a_screen_event() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = write_script(dir.path(), "exit 3");
    let (mut supervisor, mut events) = supervisor_for(script);

    supervisor.start().expect("spawn fake backend");

    match next_event(&mut events).await {
        BackendEvent::Raw { payload } => {
            assert_eq!(payload["supervisor"], "backend_exited");
            assert_eq!(payload["code"], 3);
        }
        other => panic!("expected exit notice, got {other:?}"),
    }
    let handle = supervisor.handle().expect("handle survives the exit");
    assert_eq!(handle.exit_state(), ExitState::Exited(Some(3)));
    assert!(!supervisor.is_alive());
}
