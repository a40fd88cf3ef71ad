//! Client side of the persistent channel.

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::envelope::{encode_request_envelope, Request, Response, CORRELATION_FIELD};

/// Drives sequential RPC exchanges over one channel connection.
///
/// Each call is stamped with a fresh integer correlation token and the
/// echoed token is verified, so a reply can never be attributed to the
/// wrong call even if the peer misbehaves.
#[derive(Debug)]
pub struct ChannelClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    next_token: u64,
}

impl ChannelClient {
    /// Connect to a gateway daemon and select the target service by name.
    pub async fn connect(addr: &str, service: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        let (reader, mut writer) = stream.into_split();
        writer.write_all(service.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
            next_token: 1,
        })
    }

    /// Invoke `method` and return its result value. RPC-level failures
    /// come back as errors carrying the code and message.
    pub async fn call(&mut self, method: &str, params: JsonValue) -> Result<JsonValue> {
        let params = match params {
            JsonValue::Object(map) => map,
            JsonValue::Null => JsonMap::new(),
            _ => bail!("rpc params must be an object or null"),
        };
        let token = JsonValue::from(self.next_token);
        self.next_token += 1;

        let frame = encode_request_envelope(&Request::new(method, params), &token)?;
        self.writer.write_all(&frame).await?;
        self.writer.write_all(b"\n").await?;

        let Some(line) = self.lines.next_line().await? else {
            bail!("channel closed before a reply to \"{method}\" arrived");
        };
        let envelope: JsonValue = serde_json::from_str(&line)
            .with_context(|| format!("rpc reply to \"{method}\" is not valid json"))?;

        // A plain-string error marks a transport-boundary failure, not a
        // response envelope.
        if let Some(notice) = envelope.get("error").and_then(JsonValue::as_str) {
            bail!("transport failure: {notice}");
        }

        let echoed = envelope.get(CORRELATION_FIELD).cloned().unwrap_or(JsonValue::Null);
        if echoed != token {
            bail!("rpc reply token mismatch: sent {token}, received {echoed}");
        }

        let response: Response = serde_json::from_value(envelope)
            .with_context(|| format!("rpc reply to \"{method}\" is not an envelope"))?;
        if let Some(err) = response.error {
            return Err(anyhow!("rpc {} failed [{}]: {}", method, err.code, err.message));
        }
        Ok(response.result.unwrap_or(JsonValue::Null))
    }

    pub async fn call_typed<T: DeserializeOwned>(
        &mut self,
        method: &str,
        params: JsonValue,
    ) -> Result<T> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value)
            .with_context(|| format!("failed to decode rpc response for method {method}"))
    }
}
