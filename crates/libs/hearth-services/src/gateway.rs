//! Methods served to the IoT gateways that own the devices.

use std::sync::Arc;

use hearth_rpc::{bool_param, object_param, str_param, ErrorCode, ParamKind, ParamSpec, Reply, Service};
use hearth_store::{DeviceStore, NewDevice};

/// Build the `gateway` service over an injected store handle.
pub fn gateway_service(store: Arc<DeviceStore>) -> Service {
    let mut service = Service::new("gateway");

    let register = Arc::clone(&store);
    service.register(
        "register_device",
        vec![
            ParamSpec::required("uid", ParamKind::Str),
            ParamSpec::required("name", ParamKind::Str),
            ParamSpec::required("model", ParamKind::Str),
            ParamSpec::required("switchable", ParamKind::Bool),
            ParamSpec::required("keep_history_state", ParamKind::Bool),
        ],
        move |params| {
            let store = Arc::clone(&register);
            async move {
                let device = NewDevice {
                    uid: str_param(&params, "uid")?,
                    name: str_param(&params, "name")?,
                    model: str_param(&params, "model")?,
                    switchable: bool_param(&params, "switchable")?,
                    keep_history_state: bool_param(&params, "keep_history_state")?,
                };
                // Re-registration after a gateway restart is routine, so an
                // existing record is returned rather than treated as a
                // conflict.
                match store.insert_device(&device, true)? {
                    Some(device) => Ok(Reply::ok(serde_json::to_value(device)?)),
                    None => Ok(Reply::domain_error(
                        ErrorCode::DatabaseFailed,
                        format!("failed to register device \"{}\"", device.uid),
                    )),
                }
            }
        },
    );

    let update = Arc::clone(&store);
    service.register(
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
                // The gateway reports the device's full state, so the prior
                // mapping is replaced rather than merged.
                match store.update_device_state(&uid, &state, true)? {
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
