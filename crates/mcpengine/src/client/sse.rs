//! Client side of the SSE binding: an event stream in, POSTs out.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use url::Url;

use crate::transport::{closed_signal, Inbound, Transport};
use crate::types::{JsonRpcMessage, McpError, McpResult};

use super::http::{default_client, fail_request, parse_url, status_error, Endpoint};

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Chunks may split lines anywhere. Comment lines and unknown fields are
/// skipped; an event without data is not dispatched.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl EventDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            if let Some(event) = self.feed_line(line.trim_end_matches(&['\n', '\r'][..])) {
                events.push(event);
            }
        }
        events
    }

    fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            let event = self.event.take();
            if self.data.is_empty() {
                return None;
            }
            return Some(SseEvent {
                event: event.unwrap_or_else(|| "message".to_string()),
                data: std::mem::take(&mut self.data).join("\n"),
            });
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }
}

/// [`Transport`] over the SSE binding.
///
/// [`connect`](Self::connect) opens the event stream and waits for the
/// `endpoint` event naming where to POST. Server messages, including
/// server-to-client requests, arrive as `message` events. A rejected POST for
/// a request is answered locally with the matching JSON-RPC error.
pub struct SseClientTransport {
    endpoint: Endpoint,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    closed: Arc<watch::Sender<bool>>,
    reader: JoinHandle<()>,
}

impl SseClientTransport {
    pub async fn connect(url: &str, bearer: Option<String>) -> McpResult<Self> {
        Self::connect_with_client(url, bearer, default_client()?).await
    }

    pub async fn connect_with_client(
        url: &str,
        bearer: Option<String>,
        http: reqwest::Client,
    ) -> McpResult<Self> {
        let stream_url = parse_url(url)?;
        let mut endpoint = Endpoint {
            http,
            url: stream_url.clone(),
            bearer,
        };

        let resp = endpoint
            .request(reqwest::Method::GET, stream_url.clone())
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("Failed to open event stream: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(match status_error(status, &body) {
                Ok(_) => McpError::Transport(format!("HTTP {status}: {body}")),
                Err(e) => e,
            });
        }

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);
        let reader = tokio::spawn(read_events(
            resp,
            stream_url,
            endpoint_tx,
            inbound_tx.clone(),
            closed.clone(),
        ));

        endpoint.url = match endpoint_rx.await {
            Ok(url) => url?,
            Err(_) => {
                reader.abort();
                return Err(McpError::Transport(
                    "Event stream ended before the endpoint event".to_string(),
                ));
            }
        };
        tracing::info!(endpoint = %endpoint.url, "SSE stream connected");

        Ok(Self {
            endpoint,
            inbound_tx,
            inbound: Mutex::new(inbound),
            closed,
            reader,
        })
    }

    /// Where messages are posted.
    pub fn message_url(&self) -> &Url {
        &self.endpoint.url
    }
}

impl Drop for SseClientTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Transport for SseClientTransport {
    async fn receive(&self) -> Option<Inbound> {
        let mut closed = self.closed.subscribe();
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;
            message = inbound.recv() => message,
            _ = closed_signal(&mut closed) => None,
        }
    }

    async fn send(&self, message: JsonRpcMessage) -> McpResult<()> {
        if *self.closed.borrow() {
            return Err(McpError::ConnectionClosed);
        }
        let posted = self
            .endpoint
            .request(reqwest::Method::POST, self.endpoint.url.clone())
            .json(&message)
            .send()
            .await;

        let outcome = match posted {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                status_error(status, &body)
            }
            Err(e) => Err(McpError::Transport(format!("POST failed: {e}"))),
        };
        match outcome {
            Ok(reply) => {
                let _ = self.inbound_tx.send(Inbound::new(reply));
            }
            Err(e) => fail_request(&self.inbound_tx, &message, e),
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.send_replace(true);
        self.reader.abort();
    }
}

async fn read_events(
    resp: reqwest::Response,
    base: Url,
    endpoint_tx: oneshot::Sender<McpResult<Url>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    closed: Arc<watch::Sender<bool>>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut decoder = EventDecoder::default();
    let mut body = resp.bytes_stream();

    'stream: while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("Event stream failed: {e}");
                break;
            }
        };
        for event in decoder.push(&chunk) {
            match event.event.as_str() {
                "endpoint" => {
                    if let Some(tx) = endpoint_tx.take() {
                        let url = base.join(event.data.trim()).map_err(|e| {
                            McpError::Transport(format!("Bad endpoint {}: {e}", event.data))
                        });
                        let _ = tx.send(url);
                    }
                }
                "message" => match JsonRpcMessage::parse(event.data.as_bytes()) {
                    Ok(message) => {
                        if inbound.send(Inbound::new(message)).is_err() {
                            break 'stream;
                        }
                    }
                    Err(e) => tracing::warn!("Dropping unreadable event: {e}"),
                },
                other => tracing::debug!(event = other, "Ignoring event"),
            }
        }
    }

    tracing::info!("Event stream ended");
    closed.send_replace(true);
}
