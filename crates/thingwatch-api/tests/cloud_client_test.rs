#![allow(clippy::unwrap_used)]
// Integration tests for `CloudClient` using wiremock.

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{bearer_token, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use thingwatch_api::{CloudClient, Error};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, CloudClient) {
    let server = MockServer::start().await;
    let client =
        CloudClient::from_reqwest(&format!("{}/v1", server.uri()), reqwest::Client::new()).unwrap();
    (server, client)
}

fn token() -> SecretString {
    SecretString::from("access-abc".to_owned())
}

// ── Happy-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_list_locations_sends_bearer() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/locations"))
        .and(bearer_token("access-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                { "locationId": "loc-1", "name": "Home" },
                { "locationId": "loc-2", "name": "Cabin" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let locations = client.list_locations(&token()).await.unwrap();
    assert_eq!(locations.len(), 2);
    assert_eq!(locations[0].location_id, "loc-1");
    assert_eq!(locations[1].name, "Cabin");
}

#[tokio::test]
async fn test_list_rooms_and_room_devices() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/locations/loc-1/rooms"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "roomId": "r-1", "locationId": "loc-1", "name": "Kitchen" }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/locations/loc-1/rooms/r-1/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                { "deviceId": "d-1", "label": "Fridge Sensor", "roomId": "r-1" },
                { "deviceId": "d-2", "name": "outlet", "roomId": "r-1" }
            ]
        })))
        .mount(&server)
        .await;

    let rooms = client.list_rooms(&token(), "loc-1").await.unwrap();
    assert_eq!(rooms[0].name, "Kitchen");

    let devices = client
        .list_room_devices(&token(), "loc-1", "r-1")
        .await
        .unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].display_name(), "Fridge Sensor");
    assert_eq!(devices[1].display_name(), "outlet");
}

#[tokio::test]
async fn test_device_status_returns_raw_payload() {
    let (server, client) = setup().await;

    let payload = json!({
        "components": { "main": { "lock": { "lock": { "value": "locked" } } } }
    });

    Mock::given(method("GET"))
        .and(path("/v1/devices/d-1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&payload))
        .mount(&server)
        .await;

    let status = client.device_status(&token(), "d-1").await.unwrap();
    assert_eq!(status, payload);
}

// ── Error classification ────────────────────────────────────────────

#[tokio::test]
async fn test_status_codes_map_to_error_variants() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/devices/unauth/status"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/devices/forbidden/status"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/devices/busy/status"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/devices/down/status"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let t = token();
    assert!(matches!(
        client.device_status(&t, "unauth").await,
        Err(Error::Unauthorized { .. })
    ));
    assert!(matches!(
        client.device_status(&t, "forbidden").await,
        Err(Error::Forbidden { .. })
    ));
    assert!(matches!(
        client.device_status(&t, "busy").await,
        Err(Error::RateLimited {
            retry_after_secs: Some(7)
        })
    ));
    match client.device_status(&t, "down").await {
        Err(Error::Server { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "maintenance");
        }
        other => panic!("expected Server error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_unparseable_success_body_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/locations"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let result = client.list_locations(&token()).await;
    match result {
        Err(Error::Deserialization { body, .. }) => assert!(body.contains("gateway")),
        other => panic!("expected Deserialization error, got: {other:?}"),
    }
}
