#![allow(clippy::unwrap_used)]
// Session-level tests against a wiremock provider.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use pretty_assertions::assert_eq;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tokio::sync::broadcast;
use wiremock::matchers::{bearer_token, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use thingwatch_core::vault::StoredCredentials;
use thingwatch_core::{
    AlertCategory, AuthConfig, BroadcastGateway, ConfiguredDevice, CredentialRecord,
    CredentialVault, CycleOutcome, GatewayEvent, Session, SessionConfig, SortOrder, TokenState,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn device(id: &str, name: &str) -> ConfiguredDevice {
    ConfiguredDevice {
        id: id.into(),
        name: Some(name.into()),
        room: None,
    }
}

fn static_config(server: &MockServer, dir: &Path) -> SessionConfig {
    let mut cfg = SessionConfig::new(
        AuthConfig::StaticToken(SecretString::from("pat".to_owned())),
        dir,
    );
    cfg.api_url = server.uri();
    cfg
}

fn oauth_config(server: &MockServer, dir: &Path) -> SessionConfig {
    let mut cfg = SessionConfig::new(AuthConfig::OAuth { client: None }, dir);
    cfg.api_url = server.uri();
    cfg.token_url = format!("{}/oauth/token", server.uri());
    cfg
}

fn store_record(dir: &Path, access: &str, expires_in: TimeDelta) {
    let now = Utc::now();
    CredentialVault::new(dir)
        .save(&CredentialRecord {
            client_id: "cid".into(),
            client_secret: SecretString::from("csecret".to_owned()),
            access_token: SecretString::from(access.to_owned()),
            refresh_token: SecretString::from("rt-1".to_owned()),
            token_type: "bearer".into(),
            scope: None,
            expires_at: Some(now + expires_in),
            obtained_at: now,
        })
        .unwrap();
}

fn session(cfg: SessionConfig) -> (Session, broadcast::Receiver<Arc<GatewayEvent>>) {
    let gateway = Arc::new(BroadcastGateway::new());
    let rx = gateway.subscribe();
    (Session::new(cfg, gateway).unwrap(), rx)
}

fn drain(rx: &mut broadcast::Receiver<Arc<GatewayEvent>>) -> Vec<GatewayEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push((*ev).clone());
    }
    out
}

fn names(events: &[GatewayEvent]) -> Vec<&'static str> {
    events.iter().map(GatewayEvent::name).collect()
}

async fn mount_status(server: &MockServer, id: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/devices/{id}/status")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn lock_status() -> serde_json::Value {
    json!({"components": {"main": {"lock": {"lock": {"value": "locked"}}}}})
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn lock_device_publishes_lock_primary() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_status(&server, "d1", lock_status()).await;

    let mut cfg = static_config(&server, dir.path());
    cfg.devices = vec![device("d1", "Front Door")];
    cfg.poll_interval = Duration::from_millis(60_000);
    let (mut session, mut rx) = session(cfg);

    session.start().unwrap();
    let outcome = session.run_cycle().await;
    assert_eq!(outcome, CycleOutcome::Published { devices: 1, failed: 0 });

    let events = drain(&mut rx);
    assert_eq!(names(&events), vec!["loading", "device-data"]);
    let GatewayEvent::DeviceData { devices, .. } = &events[1] else {
        panic!("expected device-data");
    };
    assert_eq!(devices[0].name, "Front Door");
    assert_eq!(devices[0].primary_capability.as_deref(), Some("lock"));
    assert_eq!(devices[0].primary_state, Some(json!("locked")));
}

#[tokio::test]
async fn unauthorized_status_triggers_exactly_one_refresh_then_retries() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    store_record(dir.path(), "at-old", TimeDelta::hours(12));

    Mock::given(method("GET"))
        .and(path("/devices/d1/status"))
        .and(bearer_token("at-old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/d1/status"))
        .and(bearer_token("at-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(lock_status()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-new",
            "expires_in": 86400
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = oauth_config(&server, dir.path());
    cfg.devices = vec![device("d1", "Front Door")];
    let (mut session, _rx) = session(cfg);
    session.start().unwrap();

    let outcome = session.run_cycle().await;
    assert_eq!(outcome, CycleOutcome::Published { devices: 1, failed: 0 });
    assert_eq!(session.token_state(), TokenState::Valid);

    // refreshed token persisted, refresh token kept
    let stored = CredentialVault::new(dir.path()).load(None).unwrap().unwrap();
    let StoredCredentials::Current(record) = stored else {
        panic!("expected current generation");
    };
    assert_eq!(record.access_token.expose_secret(), "at-new");
    assert_eq!(record.refresh_token.expose_secret(), "rt-1");
}

#[tokio::test]
async fn invalid_grant_latches_and_stops_polling() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    store_record(dir.path(), "at-old", TimeDelta::hours(12));

    Mock::given(method("GET"))
        .and(path("/devices/d1/status"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token expired"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = oauth_config(&server, dir.path());
    cfg.devices = vec![device("d1", "Front Door")];
    let (mut session, mut rx) = session(cfg);
    session.start().unwrap();

    let outcome = session.run_cycle().await;
    assert!(matches!(
        outcome,
        CycleOutcome::Failed {
            category: Some(AlertCategory::Auth),
            ..
        }
    ));
    assert_eq!(session.token_state(), TokenState::PermanentlyFailed);
    let events = drain(&mut rx);
    assert_eq!(names(&events), vec!["loading", "alert", "error"]);

    assert_eq!(session.run_cycle().await, CycleOutcome::Skipped);
    session.scheduled_refresh().await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn missing_credentials_halt_with_auth_alert() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (mut session, mut rx) = session(oauth_config(&server, dir.path()));

    assert!(matches!(
        session.start(),
        Err(thingwatch_core::CoreError::NoCredentials { .. })
    ));
    let events = drain(&mut rx);
    assert_eq!(names(&events), vec!["loading", "alert", "error"]);
    assert_eq!(session.run_cycle().await, CycleOutcome::Skipped);
}

#[tokio::test]
async fn per_device_failure_is_absorbed() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_status(&server, "d1", lock_status()).await;
    Mock::given(method("GET"))
        .and(path("/devices/d2/status"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut cfg = static_config(&server, dir.path());
    cfg.devices = vec![device("d1", "Front Door"), device("d2", "Back Door")];
    let (mut session, mut rx) = session(cfg);
    session.start().unwrap();

    assert_eq!(
        session.run_cycle().await,
        CycleOutcome::Published { devices: 1, failed: 1 }
    );
    assert_eq!(names(&drain(&mut rx)), vec!["loading", "device-data"]);
}

#[tokio::test]
async fn all_devices_failing_reports_error_with_cached_data() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/devices/d1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(lock_status()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/d1/status"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let mut cfg = static_config(&server, dir.path());
    cfg.devices = vec![device("d1", "Front Door")];
    let (mut session, mut rx) = session(cfg);
    session.start().unwrap();

    assert!(matches!(session.run_cycle().await, CycleOutcome::Published { .. }));
    let outcome = session.run_cycle().await;
    assert!(matches!(
        outcome,
        CycleOutcome::Failed {
            category: Some(AlertCategory::Outage),
            ..
        }
    ));

    let events = drain(&mut rx);
    assert_eq!(names(&events), vec!["loading", "device-data", "error"]);
    let GatewayEvent::Error {
        cached, devices, ..
    } = &events[2]
    else {
        panic!("expected error");
    };
    assert!(cached);
    assert_eq!(devices.as_ref().map(Vec::len), Some(1));
}

#[tokio::test]
async fn throttled_request_backs_off_then_recovers() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/devices/d1/status"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_status(&server, "d1", lock_status()).await;

    let mut cfg = static_config(&server, dir.path());
    cfg.devices = vec![device("d1", "Front Door")];
    let (mut session, _rx) = session(cfg);
    session.start().unwrap();

    assert!(matches!(
        session.run_cycle().await,
        CycleOutcome::Failed {
            category: Some(AlertCategory::RateLimit),
            ..
        }
    ));
    let start = std::time::Instant::now();
    assert!(matches!(session.run_cycle().await, CycleOutcome::Published { .. }));
    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn rooms_resolve_once_with_exact_names() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/locations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"locationId": "loc-1", "name": "Home"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/locations/loc-1/rooms"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"roomId": "r1", "name": "Kitchen"},
                {"roomId": "r2", "name": "kitchen"},
                {"roomId": "r3", "name": "Hall"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/locations/loc-1/rooms/r1/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"deviceId": "d1", "label": "Toaster"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/locations/loc-1/rooms/r3/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"deviceId": "d1", "label": "Toaster"}, {"deviceId": "d2", "label": "Door"}]
        })))
        .mount(&server)
        .await;
    mount_status(
        &server,
        "d1",
        json!({"components": {"main": {"switch": {"switch": {"value": "off"}}}}}),
    )
    .await;
    mount_status(&server, "d2", lock_status()).await;

    let mut cfg = static_config(&server, dir.path());
    cfg.rooms = vec!["Kitchen".into(), "Hall".into()];
    cfg.sort = SortOrder::Name;
    let (mut session, mut rx) = session(cfg);
    session.start().unwrap();

    for _ in 0..2 {
        assert_eq!(
            session.run_cycle().await,
            CycleOutcome::Published { devices: 2, failed: 0 }
        );
    }
    let resolved: Vec<_> = session
        .resolved_devices()
        .unwrap()
        .iter()
        .map(|d| (d.id.as_str(), d.room.as_deref()))
        .collect();
    assert_eq!(resolved, vec![("d1", Some("Kitchen")), ("d2", Some("Hall"))]);

    let events = drain(&mut rx);
    let GatewayEvent::DeviceData { devices, .. } = events.last().unwrap() else {
        panic!("expected device-data");
    };
    let order: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(order, vec!["Door", "Toaster"]);
}

#[tokio::test]
async fn nothing_configured_reports_no_devices() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (mut session, mut rx) = session(static_config(&server, dir.path()));
    session.start().unwrap();

    assert_eq!(session.run_cycle().await, CycleOutcome::NoDevices);
    assert_eq!(names(&drain(&mut rx)), vec!["loading", "no-devices"]);
}

// ── Cache ───────────────────────────────────────────────────────────

#[tokio::test]
async fn restart_publishes_cached_snapshot_and_skips_resolution() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_status(&server, "d1", lock_status()).await;

    let mut cfg = static_config(&server, dir.path());
    cfg.devices = vec![device("d1", "Front Door")];

    let (mut first, _rx) = session(cfg.clone());
    first.start().unwrap();
    first.run_cycle().await;

    let (mut second, mut rx) = session(cfg);
    second.start().unwrap();
    assert_eq!(second.resolved_devices().map(<[_]>::len), Some(1));
    let events = drain(&mut rx);
    assert_eq!(names(&events), vec!["loading", "device-data"]);
}

#[tokio::test]
async fn config_change_discards_cache_before_resolution() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    mount_status(&server, "d1", lock_status()).await;
    mount_status(&server, "d2", lock_status()).await;

    let mut cfg = static_config(&server, dir.path());
    cfg.devices = vec![device("d1", "Front Door")];
    let (mut first, _rx) = session(cfg.clone());
    first.start().unwrap();
    first.run_cycle().await;
    assert!(dir.path().join("cache.json").exists());

    cfg.devices = vec![device("d2", "Garage")];
    let (mut second, mut rx) = session(cfg);
    second.start().unwrap();
    assert!(second.resolved_devices().is_none());
    assert!(!dir.path().join("cache.json").exists());
    assert_eq!(names(&drain(&mut rx)), vec!["loading"]);

    second.run_cycle().await;
    let cached: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("cache.json")).unwrap()).unwrap();
    assert_eq!(cached["devices"], json!([{"id": "d2", "name": "Garage"}]));
}

// ── Health through the session ──────────────────────────────────────

fn raised(events: &[GatewayEvent]) -> Vec<(AlertCategory, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            GatewayEvent::Alert(alert) => Some((alert.category, alert.message_key.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn malformed_payloads_raise_schema_alert_after_ten_cycles() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/devices/d1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unexpected": true})))
        .up_to_n_times(10)
        .mount(&server)
        .await;
    mount_status(&server, "d1", lock_status()).await;

    let mut cfg = static_config(&server, dir.path());
    cfg.devices = vec![device("d1", "Front Door")];
    let (mut session, mut rx) = session(cfg);
    session.start().unwrap();
    drain(&mut rx);

    for _ in 0..9 {
        assert!(matches!(
            session.run_cycle().await,
            CycleOutcome::Failed {
                category: Some(AlertCategory::Schema),
                ..
            }
        ));
    }
    assert!(raised(&drain(&mut rx)).is_empty());

    session.run_cycle().await;
    let events = drain(&mut rx);
    assert_eq!(names(&events), vec!["alert", "error"]);
    assert_eq!(raised(&events), vec![(AlertCategory::Schema, "ALERT_SCHEMA".to_owned())]);

    // first good payload clears it
    assert!(matches!(session.run_cycle().await, CycleOutcome::Published { .. }));
    assert_eq!(names(&drain(&mut rx)), vec!["alert-clear", "device-data"]);
}

#[tokio::test]
async fn outage_alert_is_debounced_across_cycles() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/devices/d1/status"))
        .respond_with(ResponseTemplate::new(503))
        .expect(10)
        .mount(&server)
        .await;

    let mut cfg = static_config(&server, dir.path());
    cfg.devices = vec![device("d1", "Front Door")];
    let (mut session, mut rx) = session(cfg);
    session.start().unwrap();
    drain(&mut rx);

    for _ in 0..9 {
        session.run_cycle().await;
    }
    let events = drain(&mut rx);
    assert_eq!(events.len(), 9);
    assert!(raised(&events).is_empty());

    session.run_cycle().await;
    assert_eq!(
        raised(&drain(&mut rx)),
        vec![(AlertCategory::Outage, "ALERT_OUTAGE".to_owned())]
    );
}

#[tokio::test]
async fn forbidden_raises_scope_alert_without_stopping_polls() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    store_record(dir.path(), "at-1", TimeDelta::hours(12));
    Mock::given(method("GET"))
        .and(path("/devices/d1/status"))
        .respond_with(ResponseTemplate::new(403))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_status(&server, "d1", lock_status()).await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let mut cfg = oauth_config(&server, dir.path());
    cfg.devices = vec![device("d1", "Front Door")];
    let (mut session, mut rx) = session(cfg);
    session.start().unwrap();
    drain(&mut rx);

    assert!(matches!(
        session.run_cycle().await,
        CycleOutcome::Failed {
            category: Some(AlertCategory::Scope),
            ..
        }
    ));
    let events = drain(&mut rx);
    assert_eq!(names(&events), vec!["alert", "error"]);
    assert_eq!(raised(&events), vec![(AlertCategory::Scope, "ALERT_SCOPE".to_owned())]);
    assert_ne!(session.token_state(), TokenState::PermanentlyFailed);

    assert!(matches!(session.run_cycle().await, CycleOutcome::Published { .. }));
    assert_eq!(names(&drain(&mut rx)), vec!["alert-clear", "device-data"]);
}

// ── Proactive refresh ───────────────────────────────────────────────

async fn mount_refresh(server: &MockServer, access: &str) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access,
            "expires_in": 86400
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn short_lived_token_is_refreshed_before_the_batch() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    store_record(dir.path(), "at-old", TimeDelta::minutes(8));
    mount_refresh(&server, "at-new").await;
    Mock::given(method("GET"))
        .and(path("/devices/d1/status"))
        .and(bearer_token("at-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(lock_status()))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = oauth_config(&server, dir.path());
    cfg.devices = vec![device("d1", "Front Door")];
    let (mut session, _rx) = session(cfg);
    session.start().unwrap();

    assert_eq!(
        session.run_cycle().await,
        CycleOutcome::Published { devices: 1, failed: 0 }
    );
}

#[tokio::test]
async fn token_under_an_hour_arms_startup_refresh() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    store_record(dir.path(), "at-old", TimeDelta::minutes(30));
    mount_refresh(&server, "at-new").await;

    let (mut session, _rx) = session(oauth_config(&server, dir.path()));
    session.start().unwrap();
    assert!(session.wants_startup_refresh());

    session.scheduled_refresh().await;
    assert!(!session.wants_startup_refresh());
    let StoredCredentials::Current(record) =
        CredentialVault::new(dir.path()).load(None).unwrap().unwrap()
    else {
        panic!("expected current generation");
    };
    assert_eq!(record.access_token.expose_secret(), "at-new");
}

#[tokio::test]
async fn token_endpoint_outage_counts_as_outage() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    store_record(dir.path(), "at-1", TimeDelta::hours(12));
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": "temporarily_unavailable"
        })))
        .expect(10)
        .mount(&server)
        .await;

    let (mut session, mut rx) = session(oauth_config(&server, dir.path()));
    session.start().unwrap();
    drain(&mut rx);

    for _ in 0..10 {
        session.scheduled_refresh().await;
    }
    assert_eq!(
        raised(&drain(&mut rx)),
        vec![(AlertCategory::Outage, "ALERT_OUTAGE".to_owned())]
    );
    assert_ne!(session.token_state(), TokenState::PermanentlyFailed);
}

#[tokio::test]
async fn long_lived_or_static_token_skips_startup_refresh() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    store_record(dir.path(), "at-1", TimeDelta::hours(12));
    let (mut oauth, _rx) = session(oauth_config(&server, dir.path()));
    oauth.start().unwrap();
    assert!(!oauth.wants_startup_refresh());

    let other = tempfile::tempdir().unwrap();
    let (mut pat, _rx) = session(static_config(&server, other.path()));
    pat.start().unwrap();
    assert!(!pat.wants_startup_refresh());
}

// ── Run loop ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn run_loop_polls_on_interval_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = SessionConfig::new(
        AuthConfig::StaticToken(SecretString::from("unused".to_owned())),
        dir.path(),
    );
    cfg.test_mode = true;
    cfg.poll_interval = Duration::from_secs(5);

    let (session, mut rx) = session(cfg);
    let handle = session.handle();
    let task = tokio::spawn(session.run());

    let start = tokio::time::Instant::now();
    let mut cycles = 0;
    while cycles < 3 {
        if let GatewayEvent::DeviceData { devices, .. } = &*rx.recv().await.unwrap() {
            assert_eq!(devices.len(), 5);
            cycles += 1;
        }
    }
    // clamped to the 30 s floor
    assert_eq!(start.elapsed(), Duration::from_secs(60));

    handle.stop();
    task.await.unwrap().unwrap();
    assert!(handle.is_stopped());
}
