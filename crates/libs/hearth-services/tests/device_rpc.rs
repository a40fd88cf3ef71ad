use std::sync::Arc;

use hearth_rpc::{ErrorCode, Params, Request, Response, Service};
use hearth_services::{client_service, gateway_service};
use hearth_store::DeviceStore;
use serde_json::{json, Value as JsonValue};

fn params(value: JsonValue) -> Params {
    match value {
        JsonValue::Object(map) => map,
        _ => panic!("test params must be an object"),
    }
}

async fn invoke(service: &Service, method: &str, args: JsonValue) -> Response {
    service.invoke(Request::new(method, params(args))).await
}

fn fixture() -> (Service, Service) {
    let store = Arc::new(DeviceStore::in_memory().expect("store"));
    (client_service(Arc::clone(&store)), gateway_service(store))
}

async fn register_led(gateway: &Service, uid: &str, keep_history_state: bool) {
    let response = invoke(
        gateway,
        "register_device",
        json!({
            "uid": uid,
            "name": "ceiling lamp",
            "model": "10000",
            "switchable": true,
            "keep_history_state": keep_history_state,
        }),
    )
    .await;
    assert!(response.is_success(), "registration failed: {response:?}");
}

#[tokio::test]
async fn get_device_on_empty_store_reports_database_failed() {
    let (client, _gateway) = fixture();
    let response = invoke(&client, "get_device", json!({ "uid": "/box-1/led-1" })).await;
    let error = response.error.expect("must fail");
    assert_eq!(error.code, ErrorCode::DatabaseFailed.as_i64());
    assert!(error.message.contains("not found"), "unexpected message: {}", error.message);
}

#[tokio::test]
async fn registered_device_is_visible_to_clients() {
    let (client, gateway) = fixture();
    register_led(&gateway, "/box-1/led-1", false).await;

    let response = invoke(&client, "get_device", json!({ "uid": "/box-1/led-1" })).await;
    let device = response.result.expect("device");
    assert_eq!(device["uid"], json!("/box-1/led-1"));
    assert_eq!(device["state"], json!({}));

    let listing = invoke(&client, "get_device_list", json!({})).await;
    let devices = listing.result.expect("list");
    assert_eq!(devices.as_array().expect("array").len(), 1);
}

#[tokio::test]
async fn re_registration_returns_the_existing_record() {
    let (_client, gateway) = fixture();
    register_led(&gateway, "/box-1/led-1", false).await;

    let response = invoke(
        &gateway,
        "register_device",
        json!({
            "uid": "/box-1/led-1",
            "name": "renamed lamp",
            "model": "10001",
            "switchable": false,
            "keep_history_state": false,
        }),
    )
    .await;
    let device = response.result.expect("existing device");
    assert_eq!(device["name"], json!("ceiling lamp"));
}

#[tokio::test]
async fn client_update_merges_into_the_existing_state() {
    let (client, gateway) = fixture();
    register_led(&gateway, "/box-1/led-1", false).await;
    invoke(
        &gateway,
        "update_device_state",
        json!({ "uid": "/box-1/led-1", "state": { "on": false, "color": "red" } }),
    )
    .await;

    let response = invoke(
        &client,
        "update_device_state",
        json!({ "uid": "/box-1/led-1", "state": { "on": true } }),
    )
    .await;
    let device = response.result.expect("device");
    assert_eq!(device["state"], json!({ "on": true, "color": "red" }));
}

#[tokio::test]
async fn gateway_update_replaces_the_whole_state() {
    let (_client, gateway) = fixture();
    register_led(&gateway, "/box-1/led-1", false).await;
    invoke(
        &gateway,
        "update_device_state",
        json!({ "uid": "/box-1/led-1", "state": { "on": false, "color": "red" } }),
    )
    .await;

    let response = invoke(
        &gateway,
        "update_device_state",
        json!({ "uid": "/box-1/led-1", "state": { "on": true } }),
    )
    .await;
    let device = response.result.expect("device");
    assert_eq!(device["state"], json!({ "on": true }));
}

#[tokio::test]
async fn update_of_unknown_device_reports_database_failed() {
    let (client, gateway) = fixture();

    for service in [&client, &gateway] {
        let response = invoke(
            service,
            "update_device_state",
            json!({ "uid": "/box-1/ghost", "state": { "on": true } }),
        )
        .await;
        let error = response.error.expect("must fail");
        assert_eq!(error.code, ErrorCode::DatabaseFailed.as_i64());
    }
}

#[tokio::test]
async fn history_query_returns_newest_snapshots_oldest_first() {
    let (client, gateway) = fixture();
    register_led(&gateway, "/box-1/led-1", true).await;

    for brightness in 1..=3 {
        invoke(
            &gateway,
            "update_device_state",
            json!({ "uid": "/box-1/led-1", "state": { "brightness": brightness } }),
        )
        .await;
    }

    let response = invoke(
        &client,
        "get_history_state_list",
        json!({ "device_uid": "/box-1/led-1", "count": 2 }),
    )
    .await;
    let snapshots = response.result.expect("snapshots");
    let snapshots = snapshots.as_array().expect("array");
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0]["state"]["brightness"], json!(2));
    assert_eq!(snapshots[1]["state"]["brightness"], json!(3));
}

#[tokio::test]
async fn history_count_defaults_to_twenty() {
    let (client, gateway) = fixture();
    register_led(&gateway, "/box-1/led-1", true).await;

    for brightness in 0..25 {
        invoke(
            &gateway,
            "update_device_state",
            json!({ "uid": "/box-1/led-1", "state": { "brightness": brightness } }),
        )
        .await;
    }

    let response = invoke(
        &client,
        "get_history_state_list",
        json!({ "device_uid": "/box-1/led-1" }),
    )
    .await;
    let snapshots = response.result.expect("snapshots");
    assert_eq!(snapshots.as_array().expect("array").len(), 20);
}

#[tokio::test]
async fn account_stubs_accept_credentials() {
    let (client, _gateway) = fixture();

    let response = invoke(
        &client,
        "register",
        json!({ "username": "ada", "password": "hunter2" }),
    )
    .await;
    assert!(response.is_success());
    assert_eq!(response.result, Some(JsonValue::Null));

    let response = invoke(
        &client,
        "login",
        json!({ "username": "ada", "password": "hunter2" }),
    )
    .await;
    assert_eq!(response.result, Some(json!("token")));
}

#[tokio::test]
async fn unknown_method_never_reaches_a_handler() {
    let (client, _gateway) = fixture();
    let response = invoke(&client, "drop_all_devices", json!({ "uid": "x" })).await;
    let error = response.error.expect("must fail");
    assert_eq!(error.code, ErrorCode::NoSuchMethod.as_i64());
    assert!(error.message.contains("drop_all_devices"));
}
