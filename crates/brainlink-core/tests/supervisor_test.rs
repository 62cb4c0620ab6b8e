// Integration tests for the supervisor, dispatcher and option changes
// against the scripted fake controller.

#![allow(clippy::unwrap_used)]

#[path = "../../brainlink-api/tests/support/mod.rs"]
mod support;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::{Value, json};

use brainlink_core::host::unique_id;
use brainlink_core::{
    ConnectionState, CoreError, EntityHost, EntityKind, Key, MeasurementClass, MemoryHost,
    ObservableState, SessionConfig, Supervisor, SupervisorHandle, verify_credentials,
};
use support::{FakeDevice, Login, Script};

// ── Helpers ─────────────────────────────────────────────────────────

fn config(device: &FakeDevice) -> SessionConfig {
    let mut cfg = SessionConfig::new(
        device.host(),
        "admin",
        SecretString::from("hunter2".to_string()),
    );
    cfg.timeout = Duration::from_secs(5);
    cfg.area = Some("Basement".into());
    cfg
}

fn start(device: &FakeDevice) -> (Arc<MemoryHost>, SupervisorHandle) {
    let host = Arc::new(MemoryHost::new());
    let handle = Supervisor::start(config(device), Arc::clone(&host) as Arc<dyn EntityHost>);
    (host, handle)
}

/// Poll `check` until it holds or five seconds pass.
async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn temperature(value: Value) -> Value {
    support::update(
        (12, 3, None),
        json!({ "value": value, "name": "Room", "_screen_key": 12,
                "_vid_obj": { "unit": "°C", "type": 12, "text": "???" } }),
    )
}

fn pump(value: u64) -> Value {
    support::update(
        (15, 7, None),
        json!({ "value": value, "name": "Pump", "_screen_key": 15,
                "_vid_obj": { "type": 15, "elements": [{ "text": "Off" }, { "text": "On" }] } }),
    )
}

fn mode(value: u64) -> Value {
    support::update(
        (20, 4, None),
        json!({ "value": value, "name": "Mode", "edit": true, "_screen_key": 20,
                "_vid_obj": { "type": 15, "elements": [{ "text": "Off" }, { "text": "On" }] } }),
    )
}

// ── Materialization ─────────────────────────────────────────────────

#[tokio::test]
async fn test_stream_materializes_and_routes() {
    let device = FakeDevice::start(Script {
        frames: vec![
            support::screen(12, " Living room "),
            support::screen(15, "Heating circuit"),
            support::heartbeat("12:00"),
            temperature(json!(21)),
            pump(1),
            support::update((318, 1, None), json!({ "value": 1, "_screen_key": 318 })),
        ],
        ..Script::default()
    })
    .await;
    let (host, handle) = start(&device);

    handle
        .wait_for_state(|s| *s == ConnectionState::Streaming)
        .await
        .unwrap();
    eventually("two entities", || handle.entities().len() == 2).await;

    let log = host.snapshot();
    let names: Vec<&str> = log.materialized.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Living room / Room", "Heating circuit / Pump"]);
    assert_eq!(
        log.materialized[0].kind,
        EntityKind::Measurement(MeasurementClass::Temperature)
    );
    assert_eq!(log.materialized[1].kind, EntityKind::Binary);
    assert!(log.areas.iter().all(|(_, area)| area.as_deref() == Some("Basement")));

    let room = Key::new(12, 3, None);
    let pump_key = Key::new(15, 7, None);
    assert_eq!(handle.entity(room).unwrap().state(), ObservableState::Measurement(Some(21.0)));
    assert_eq!(handle.entity(pump_key).unwrap().state(), ObservableState::Binary(true));

    device.push(pump(0));
    device.push(temperature(json!(21.5)));
    eventually("pump off", || {
        host.last_state(pump_key) == Some(ObservableState::Binary(false))
    })
    .await;
    eventually("new temperature", || {
        host.last_state(room) == Some(ObservableState::Measurement(Some(21.5)))
    })
    .await;
    assert_eq!(host.snapshot().materialized.len(), 2);

    handle.stop().await;
    assert_eq!(*handle.connection_state().borrow(), ConnectionState::Cancelled);
}

// ── Reconnection ────────────────────────────────────────────────────

#[tokio::test]
async fn test_reconnect_clears_entities_first() {
    // Each session delivers one value and a heartbeat, then drops.
    let device = FakeDevice::start(Script {
        frames: vec![pump(1), support::heartbeat("12:00")],
        close_after_frames: true,
        ..Script::default()
    })
    .await;
    let (host, handle) = start(&device);

    // A second materialization of the same key is only accepted by the
    // host after the first one was removed.
    eventually("second session", || host.snapshot().materialized.len() >= 2).await;

    let log = host.snapshot();
    assert!(log.removed.contains(&brainlink_core::HostHandle(unique_id(Key::new(15, 7, None)))));
    assert!(device.connections() >= 2);

    handle.stop().await;
    assert_eq!(*handle.connection_state().borrow(), ConnectionState::Cancelled);
}

#[tokio::test]
async fn test_successful_login_resets_retry_counter() {
    // Connection 1 is refused, 2 and 3 log in and then drop after a
    // heartbeat, 4 onward are refused again.
    let device = FakeDevice::start(Script {
        login: Login::Reject("wrong password".into()),
        logins: vec![
            Login::Reject("wrong password".into()),
            Login::Accept {
                device_id: Some("brain-0042".into()),
            },
            Login::Accept {
                device_id: Some("brain-0042".into()),
            },
        ],
        frames: vec![support::heartbeat("12:00")],
        close_after_frames: true,
        ..Script::default()
    })
    .await;
    let (_host, handle) = start(&device);

    // Each dropped session restarts the table at retry 1 (no delay), so
    // the refusal after them is only the second retry. Without the reset
    // it would be the fourth, sleeping 5s and 10s on the way.
    let started = tokio::time::Instant::now();
    let state = handle
        .wait_for_state(|s| matches!(s, ConnectionState::Backoff { .. }) && device.connections() >= 4)
        .await
        .unwrap();
    assert_eq!(
        state,
        ConnectionState::Backoff {
            retries: 2,
            delay: Duration::from_secs(5)
        }
    );
    assert_eq!(device.connections(), 4);
    assert!(started.elapsed() < Duration::from_secs(5));

    handle.stop().await;
}

#[tokio::test]
async fn test_rejected_login_backs_off() {
    let device = FakeDevice::start(Script {
        login: Login::Reject("wrong password".into()),
        ..Script::default()
    })
    .await;
    let (host, handle) = start(&device);

    let state = handle
        .wait_for_state(|s| matches!(s, ConnectionState::Backoff { retries: 2, .. }))
        .await
        .unwrap();
    assert_eq!(
        state,
        ConnectionState::Backoff {
            retries: 2,
            delay: Duration::from_secs(5)
        }
    );
    assert_eq!(device.connections(), 2);
    assert!(host.snapshot().materialized.is_empty());

    // Stop while sleeping in backoff.
    handle.stop().await;
    assert!(handle.is_stopped());
    assert_eq!(*handle.connection_state().borrow(), ConnectionState::Cancelled);
    handle.stop().await;
}

// ── Option changes ──────────────────────────────────────────────────

#[tokio::test]
async fn test_select_option_navigates_then_edits() {
    let mut device = FakeDevice::start(Script {
        frames: vec![support::screen(20, "Circuit 1"), mode(0)],
        auto_ack: false,
        ..Script::default()
    })
    .await;
    let (host, handle) = start(&device);
    let key = Key::new(20, 4, None);

    eventually("mode entity", || handle.entity(key).is_some()).await;

    let change = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.select_option(key, "On").await })
    };

    let navigate = device.expect_frame("navigate").await;
    assert_eq!(navigate["screen"], 20);
    assert_eq!(
        handle.entity(key).unwrap().state(),
        ObservableState::Option(Some("On".into()))
    );
    assert_eq!(host.last_state(key), Some(ObservableState::Option(Some("On".into()))));

    // Updates keep flowing while the ack is outstanding, and no edit is
    // sent before it arrives.
    device.push(pump(1));
    eventually("pump entity", || handle.entity(Key::new(15, 7, None)).is_some()).await;
    assert!(device.try_frame().is_none());
    assert!(!change.is_finished());

    device.push(support::ack(navigate["id"].as_u64().unwrap()));
    let edit = device.expect_frame("edit").await;
    assert_eq!(edit["key"], json!([20, 4, null]));
    assert_eq!(edit["value"], 1);

    device.push(support::ack(edit["id"].as_u64().unwrap()));
    change.await.unwrap().unwrap();

    handle.stop().await;
}

#[tokio::test]
async fn test_select_option_rejections() {
    let device = FakeDevice::start(Script {
        frames: vec![mode(0), pump(0)],
        ..Script::default()
    })
    .await;
    let (_host, handle) = start(&device);
    eventually("entities", || handle.entities().len() == 2).await;

    let err = handle
        .select_option(Key::new(20, 4, None), "Turbo")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidOption { .. }));

    let err = handle
        .select_option(Key::new(15, 7, None), "On")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Unsupported { .. }));

    let err = handle
        .select_option(Key::new(99, 1, None), "On")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::EntityNotFound { .. }));

    handle.stop().await;
    let err = handle
        .select_option(Key::new(20, 4, None), "On")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ControllerDisconnected));
}

// ── Credential verification ─────────────────────────────────────────

#[tokio::test]
async fn test_verify_credentials_outcomes() {
    let ok = FakeDevice::start(Script::default()).await;
    assert_eq!(verify_credentials(&config(&ok)).await.unwrap(), "brain-0042");

    let rejected = FakeDevice::start(Script {
        login: Login::Reject("nope".into()),
        ..Script::default()
    })
    .await;
    let err = verify_credentials(&config(&rejected)).await.unwrap_err();
    assert!(err.is_auth());

    let anonymous = FakeDevice::start(Script {
        login: Login::Accept { device_id: None },
        ..Script::default()
    })
    .await;
    let err = verify_credentials(&config(&anonymous)).await.unwrap_err();
    assert!(matches!(err, CoreError::Client { .. }));

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let mut unreachable = config(&ok);
    unreachable.host = addr.to_string();
    let err = verify_credentials(&unreachable).await.unwrap_err();
    assert!(err.is_connection());
}
