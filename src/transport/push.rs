use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::error::ProviderError;
use crate::events::TableEvent;
use crate::providers::{EventStream, PushProvider};
use crate::tokio_tools::spawn_named_task;
use crate::types::TableId;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const LOG_TARGET: &str = "table_sync::transport::push";

#[derive(Debug, Clone)]
pub struct WsPushConfig {
    pub url: Url,
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub buffer: usize,
}

impl WsPushConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            buffer: 128,
        }
    }
}

/// Websocket subscription to ledger events.
///
/// The handshake is complete once the server acknowledges the subscribe frame;
/// after that the returned stream ends when the socket closes.
pub struct WsPushProvider {
    cfg: WsPushConfig,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutgoingFrame {
    Subscribe { table_id: Option<TableId> },
    Heartbeat,
}

#[derive(Deserialize)]
struct IncomingFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
}

impl WsPushProvider {
    pub fn new(cfg: WsPushConfig) -> Self {
        Self { cfg }
    }

    async fn handshake(&self, table_id: Option<TableId>) -> anyhow::Result<WsStream> {
        let (mut stream, _) = connect_async(self.cfg.url.as_str())
            .await
            .context("websocket connect failed")?;

        let subscribe = serde_json::to_string(&OutgoingFrame::Subscribe { table_id })?;
        stream
            .send(Message::Text(subscribe))
            .await
            .context("failed to send subscribe frame")?;

        while let Some(message) = stream.next().await {
            match message.context("websocket error during handshake")? {
                Message::Text(txt) => {
                    let frame: IncomingFrame = serde_json::from_str(&txt)
                        .context("failed to decode handshake frame")?;
                    match frame.kind.as_str() {
                        "subscribed" => return Ok(stream),
                        "error" => {
                            return Err(anyhow!(
                                "subscription rejected: {}",
                                frame.payload.unwrap_or(Value::Null)
                            ))
                        }
                        other => {
                            debug!(target: LOG_TARGET, frame = other, "ignoring frame before ack")
                        }
                    }
                }
                Message::Close(frame) => {
                    return Err(anyhow!("socket closed during handshake: {frame:?}"))
                }
                _ => {}
            }
        }
        Err(anyhow!("socket ended during handshake"))
    }
}

#[async_trait]
impl PushProvider for WsPushProvider {
    async fn connect(&self, table_id: Option<TableId>) -> Result<EventStream, ProviderError> {
        let stream = timeout(self.cfg.handshake_timeout, self.handshake(table_id))
            .await
            .map_err(|_| ProviderError::Unavailable("websocket handshake timed out".into()))?
            .map_err(ProviderError::Transport)?;

        let (tx, rx) = mpsc::channel(self.cfg.buffer);
        let heartbeat_every = self.cfg.heartbeat_interval;
        spawn_named_task("push-socket", async move {
            if let Err(err) = pump(stream, tx, heartbeat_every).await {
                warn!(target: LOG_TARGET, error = %err, "push socket ended with error");
            }
        });
        Ok(ReceiverStream::new(rx).boxed())
    }
}

async fn pump(
    stream: WsStream,
    tx: mpsc::Sender<Result<TableEvent, ProviderError>>,
    heartbeat_every: Duration,
) -> anyhow::Result<()> {
    let (mut sink, mut source) = stream.split();
    let mut heartbeat = interval(heartbeat_every);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let heartbeat_msg = serde_json::to_string(&OutgoingFrame::Heartbeat)?;

    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!(target: LOG_TARGET, "subscriber dropped, closing socket");
                break;
            }
            _ = heartbeat.tick() => {
                sink.send(Message::Text(heartbeat_msg.clone()))
                    .await
                    .context("heartbeat send failed")?;
            }
            message = source.next() => {
                match message {
                    Some(Ok(Message::Text(txt))) => {
                        if let Some(event) = decode_event(&txt) {
                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        sink.send(Message::Pong(payload)).await.ok();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(target: LOG_TARGET, ?frame, "socket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        let _ = tx
                            .send(Err(ProviderError::Transport(anyhow!("websocket error: {err}"))))
                            .await;
                        break;
                    }
                    None => {
                        debug!(target: LOG_TARGET, "websocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    let _ = sink.close().await;
    Ok(())
}

fn decode_event(txt: &str) -> Option<TableEvent> {
    let frame: IncomingFrame = match serde_json::from_str(txt) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(target: LOG_TARGET, error = %err, "failed to decode push frame");
            return None;
        }
    };
    if frame.kind != "event" {
        debug!(target: LOG_TARGET, frame = %frame.kind, "ignoring push frame");
        return None;
    }
    let payload = frame.payload?;
    match serde_json::from_value(payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(target: LOG_TARGET, error = %err, "unrecognised event payload");
            None
        }
    }
}
