//! Transport adapters.
//!
//! Both adapters do the same dance (decode, hold the correlation token,
//! invoke, re-attach the token, encode) and share no state, so any
//! number of them can drive one `Arc<Service>` concurrently. The
//! single-shot adapter handles one envelope per call; the channel adapter
//! loops for the lifetime of a connection, strictly one in-flight request
//! at a time, so replies leave in arrival order.
//!
//! Transport-boundary failures (unknown service route, malformed frame)
//! are not RPC responses: the route-miss line is `{"error": "<text>"}`
//! with a plain string, and a malformed frame ends the channel.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use serde_json::json;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

use crate::envelope::{decode_envelope, encode_envelope, DecodeError};
use crate::service::Service;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("encoding response envelope failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("no service named \"{0}\"")]
    UnknownService(String),
}

/// Name → service table built once at startup.
#[derive(Default)]
pub struct ServiceRouter {
    services: HashMap<String, Arc<Service>>,
}

impl ServiceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount(&mut self, service: Service) {
        self.services.insert(service.name().to_string(), Arc::new(service));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Service>> {
        self.services.get(name).cloned()
    }
}

/// Request/response adapter: one envelope in, one envelope out.
pub async fn handle_envelope(service: &Service, raw: &[u8]) -> Result<Vec<u8>, TransportError> {
    let (request, token) = decode_envelope(raw)?;
    debug!("rpc request (uid = {token}): {request:?}");
    let response = service.invoke(request).await;
    debug!("rpc response (uid = {token}): {response:?}");
    Ok(encode_envelope(&response, &token)?)
}

/// Single-shot dispatch through the router. An unknown service name is a
/// boundary failure and never reaches the dispatcher.
pub async fn dispatch_routed(
    router: &ServiceRouter,
    service_name: &str,
    raw: &[u8],
) -> Result<Vec<u8>, TransportError> {
    let Some(service) = router.get(service_name) else {
        return Err(TransportError::UnknownService(service_name.to_string()));
    };
    handle_envelope(&service, raw).await
}

/// Persistent-channel adapter over newline-delimited JSON envelopes.
///
/// Runs until the peer closes the stream (clean return) or a frame fails
/// to decode (error return). Requests are handled sequentially; there is
/// no pipelining within one channel.
pub async fn serve_channel<S>(service: Arc<Service>, stream: S) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, writer) = tokio::io::split(stream);
    let lines = BufReader::new(reader).lines();
    pump_envelopes(&service, lines, writer).await
}

/// Channel adapter with routing: the first line of the connection names
/// the target service, mirroring the one-route-per-service bindings.
pub async fn serve_connection<S>(router: &ServiceRouter, stream: S) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    let Some(route) = lines.next_line().await? else {
        return Ok(());
    };
    let name = route.trim();
    let Some(service) = router.get(name) else {
        let notice = json!({ "error": format!("no service named \"{name}\"") });
        writer.write_all(notice.to_string().as_bytes()).await?;
        writer.write_all(b"\n").await?;
        return Err(TransportError::UnknownService(name.to_string()));
    };

    pump_envelopes(&service, lines, writer).await
}

async fn pump_envelopes<R, W>(
    service: &Service,
    mut lines: Lines<BufReader<R>>,
    mut writer: W,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.next_line().await? {
        let reply = handle_envelope(service, line.as_bytes()).await?;
        writer.write_all(&reply).await?;
        writer.write_all(b"\n").await?;
    }
    Ok(())
}
