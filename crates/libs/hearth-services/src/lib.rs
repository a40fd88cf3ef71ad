//! The RPC services the gateway daemon exposes.
//!
//! Two registries share one injected [`hearth_store::DeviceStore`]
//! handle: `client` serves end-user apps, `gateway` serves the IoT
//! gateways that own the devices. Handlers report expected domain
//! outcomes (missing device, registration conflict) as deliberate
//! `DATABASE_FAILED` responses; store faults propagate and surface as
//! `INVOKE_FAILED`.

mod client;
mod gateway;

pub use client::client_service;
pub use gateway::gateway_service;
