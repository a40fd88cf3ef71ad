//! Wiring for the hearth gateway daemon.

pub mod config;

use std::sync::Arc;

use hearth_rpc::ServiceRouter;
use hearth_services::{client_service, gateway_service};
use hearth_store::DeviceStore;

/// Mount both services over one shared store handle.
pub fn build_router(store: Arc<DeviceStore>) -> ServiceRouter {
    let mut router = ServiceRouter::new();
    router.mount(client_service(Arc::clone(&store)));
    router.mount(gateway_service(store));
    router
}
