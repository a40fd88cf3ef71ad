//! Generic RPC dispatch layer for the hearth gateway.
//!
//! One envelope format, two interchangeable transports. A [`Service`] maps
//! method names to async handlers and turns every invocation (success,
//! domain failure, or internal fault) into exactly one [`Response`]. The
//! transport adapters in [`transport`] drive the same service object from
//! either a single-shot exchange or a persistent channel; handlers never
//! learn which transport delivered them.

pub mod client;
pub mod envelope;
pub mod service;
pub mod transport;

pub use client::ChannelClient;
pub use envelope::{
    decode_envelope, encode_envelope, encode_request_envelope, DecodeError, ErrorCode, ErrorInfo,
    Request, Response, CORRELATION_FIELD,
};
pub use service::{
    bool_param, int_param, object_param, str_param, AuthPolicy, ParamKind, ParamSpec, Params,
    PermitAll, Reply, Service,
};
pub use transport::{
    dispatch_routed, handle_envelope, serve_channel, serve_connection, ServiceRouter,
    TransportError,
};
