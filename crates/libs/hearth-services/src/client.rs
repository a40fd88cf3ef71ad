//! Methods served to end-user apps.

use std::sync::Arc;

use hearth_rpc::{
    int_param, object_param, str_param, ErrorCode, ParamKind, ParamSpec, Reply, Service,
};
use hearth_store::DeviceStore;
use serde_json::json;

/// Build the `client` service over an injected store handle.
pub fn client_service(store: Arc<DeviceStore>) -> Service {
    let mut service = Service::new("client");

    // Account handling is a stub: registration is accepted and discarded,
    // login hands back a fixed placeholder token.
    service.register(
        "register",
        vec![
            ParamSpec::required("username", ParamKind::Str),
            ParamSpec::required("password", ParamKind::Str),
        ],
        |_params| async move { Ok(Reply::none()) },
    );

    service.register(
        "login",
        vec![
            ParamSpec::required("username", ParamKind::Str),
            ParamSpec::required("password", ParamKind::Str),
        ],
        |_params| async move { Ok(Reply::ok(json!("token"))) },
    );

    let lookup = Arc::clone(&store);
    service.register_guarded(
        "get_device",
        vec![ParamSpec::required("uid", ParamKind::Str)],
        move |params| {
            let store = Arc::clone(&lookup);
            async move {
                let uid = str_param(&params, "uid")?;
                match store.find_device(&uid)? {
                    Some(device) => Ok(Reply::ok(serde_json::to_value(device)?)),
                    None => Ok(Reply::domain_error(
                        ErrorCode::DatabaseFailed,
                        format!("device \"{uid}\" not found or lookup failed"),
                    )),
                }
            }
        },
    );

    let list = Arc::clone(&store);
    service.register_guarded("get_device_list", Vec::new(), move |_params| {
        let store = Arc::clone(&list);
        async move {
            let devices = store.find_all_devices()?;
            Ok(Reply::ok(serde_json::to_value(devices)?))
        }
    });

    let history = Arc::clone(&store);
    service.register_guarded(
        "get_history_state_list",
        vec![
            ParamSpec::required("device_uid", ParamKind::Str),
            ParamSpec::optional_with_default("count", ParamKind::Int, json!(20)),
        ],
        move |params| {
            let store = Arc::clone(&history);
            async move {
                let device_uid = str_param(&params, "device_uid")?;
                let count = usize::try_from(int_param(&params, "count")?).unwrap_or(0);
                let snapshots = store.history_state_list(&device_uid, count)?;
                Ok(Reply::ok(serde_json::to_value(snapshots)?))
            }
        },
    );

    let update = Arc::clone(&store);
    service.register_guarded(
        "update_device_state",
        vec![
            ParamSpec::required("uid", ParamKind::Str),
            ParamSpec::required("state", ParamKind::Object),
        ],
        move |params| {
            let store = Arc::clone(&update);
            async move {
                let uid = str_param(&params, "uid")?;
                let state = object_param(&params, "state")?;
                // TODO: route state changes through the owning gateway once
                // gateways hold a live downlink; today the store is written
                // directly.
                match store.update_device_state(&uid, &state, false)? {
                    Some(device) => Ok(Reply::ok(serde_json::to_value(device)?)),
                    None => Ok(Reply::domain_error(
                        ErrorCode::DatabaseFailed,
                        format!("device \"{uid}\" not found or update failed"),
                    )),
                }
            }
        },
    );

    service
}
