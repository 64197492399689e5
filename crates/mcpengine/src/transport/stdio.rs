//! Stdio transport — newline-delimited JSON over a reader/writer pair.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, Stdin, Stdout,
};
use tokio::sync::{watch, Mutex};

use crate::server::McpServer;
use crate::session::Session;
use crate::types::{EnvelopeError, JsonRpcMessage, McpError, McpResult};

use super::{closed_signal, framing, Inbound, Transport};

/// One JSON message per line in each direction.
///
/// Blank lines are skipped. A line that does not parse is answered with a
/// JSON-RPC error and reading continues.
pub struct StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    reader: Mutex<R>,
    writer: Mutex<BufWriter<W>>,
    closed: watch::Sender<bool>,
}

impl StdioTransport<BufReader<Stdin>, Stdout> {
    /// The process's own stdin and stdout.
    pub fn stdio() -> Self {
        Self::from_handles(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn from_handles(reader: R, writer: W) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(BufWriter::new(writer)),
            closed,
        }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader.into_inner(), self.writer.into_inner().into_inner())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn reject(&self, err: EnvelopeError) -> McpResult<()> {
        tracing::warn!(code = err.code, "Malformed input line: {err}");
        self.send(err.to_json_rpc_error().into()).await
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn receive(&self) -> Option<Inbound> {
        let mut closed = self.closed.subscribe();
        let mut reader = self.reader.lock().await;
        let mut line = String::new();

        loop {
            if self.is_closed() {
                return None;
            }
            line.clear();
            let read = tokio::select! {
                read = reader.read_line(&mut line) => read,
                _ = closed_signal(&mut closed) => return None,
            };

            match read {
                Ok(0) => {
                    tracing::info!("EOF on input, closing transport");
                    return None;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    if self.reject(EnvelopeError::parse(e)).await.is_err() {
                        return None;
                    }
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Read failed: {e}");
                    return None;
                }
            }

            if line.trim().is_empty() {
                continue;
            }

            match framing::parse_message(&line) {
                Ok(message) => {
                    tracing::debug!(method = ?message.method(), id = ?message.id(), "Received");
                    return Some(Inbound::new(message));
                }
                Err(err) => {
                    if self.reject(err).await.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    async fn send(&self, message: JsonRpcMessage) -> McpResult<()> {
        if self.is_closed() {
            return Err(McpError::ConnectionClosed);
        }
        let framed = framing::frame_message(&message)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(framed.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        self.closed.send_replace(true);
    }
}

/// Serve `server` over the process's stdin and stdout until EOF.
pub async fn serve(server: Arc<McpServer>) -> McpResult<()> {
    serve_with(server, StdioTransport::stdio()).await
}

/// Serve one session over `transport`, then run the server's shutdown hooks.
pub async fn serve_with<R, W>(server: Arc<McpServer>, transport: StdioTransport<R, W>) -> McpResult<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    tracing::info!("Stdio transport started");
    let (session, outbound) = Session::new(server.clone());
    session.run(Arc::new(transport), outbound).await;
    server.shutdown().await;
    Ok(())
}
