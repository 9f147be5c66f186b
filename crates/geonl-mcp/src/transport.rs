//! Newline-delimited JSON-RPC transport and the server loop.
//!
//! Requests other than `tools/call` are answered inline, in arrival order.
//! Each `tools/call` runs on its own task with a child cancellation token so
//! a slow upstream never blocks `ping` or a second tool call.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use geonl_lib::CancellationToken;
use serde_json::Value;
use tokio::io::{stdin, stdout, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::select;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::server::{response, Incoming, McpServerState, RpcError};

/// Line-framed JSON-RPC transport over any async reader and writer.
pub struct Transport<R, W> {
    reader: R,
    writer: W,
    // Survives a cancelled read so a partial line is not lost.
    pending: Vec<u8>,
}

/// Transport bound to the process stdin and stdout.
pub type StdioTransport = Transport<BufReader<tokio::io::Stdin>, tokio::io::Stdout>;

impl StdioTransport {
    pub fn stdio() -> Self {
        Transport::new(BufReader::new(stdin()), stdout())
    }
}

impl<R, W> Transport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            pending: Vec::new(),
        }
    }

    /// Read the next JSON-RPC message. Returns Ok(None) on EOF.
    ///
    /// Blank and malformed lines are logged and skipped.
    pub async fn read_message(&mut self) -> Result<Option<Value>> {
        loop {
            let bytes = self
                .reader
                .read_until(b'\n', &mut self.pending)
                .await
                .context("failed to read line")?;
            if bytes == 0 && self.pending.is_empty() {
                return Ok(None);
            }
            let line = std::mem::take(&mut self.pending);
            let Ok(text) = std::str::from_utf8(&line) else {
                warn!("skipping message that is not valid UTF-8");
                continue;
            };
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str(text) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => warn!("skipping malformed message: {}", e),
            }
        }
    }

    // Helper to map std::io::Result into anyhow::Result while preserving BrokenPipe as io::Error
    fn check_io<T>(res: std::io::Result<T>) -> Result<T> {
        match res {
            Ok(v) => Ok(v),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "Client disconnected",
            )
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write_message(&mut self, msg: &Value) -> Result<()> {
        let s = serde_json::to_string(msg)?;

        Self::check_io(self.writer.write_all(s.as_bytes()).await)?;
        Self::check_io(self.writer.write_all(b"\n").await)?;
        Self::check_io(self.writer.flush().await)?;

        Ok(())
    }
}

/// Swallow a broken pipe (the client left), propagate anything else.
fn disconnected(e: anyhow::Error) -> Result<()> {
    let broken_pipe = e
        .downcast_ref::<std::io::Error>()
        .is_some_and(|ioe| ioe.kind() == std::io::ErrorKind::BrokenPipe);
    if broken_pipe {
        info!("Client disconnected (broken pipe)");
        Ok(())
    } else {
        Err(e)
    }
}

struct InFlight {
    token: CancellationToken,
    cancelled_by_client: bool,
}

/// Keys requests by their serialized id so `1` and `"1"` stay distinct.
fn request_key(id: &Value) -> String {
    id.to_string()
}

/// Forget a finished call; false when the client already gave up on it.
fn settle(in_flight: &mut HashMap<String, InFlight>, key: &str) -> bool {
    match in_flight.remove(key) {
        Some(entry) if entry.cancelled_by_client => {
            debug!(request = key, "dropping response to cancelled request");
            false
        }
        _ => true,
    }
}

/// Run the server loop: read messages from the transport and respond on it.
///
/// Returns after EOF or Ctrl-C once every in-flight tool call has wound down.
pub async fn run_server_loop<R, W>(
    mut transport: Transport<R, W>,
    state: Arc<McpServerState>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("MCP server initialized, waiting for requests...");

    let shutdown = CancellationToken::new();
    let mut in_flight: HashMap<String, InFlight> = HashMap::new();
    let mut calls: JoinSet<(String, Value)> = JoinSet::new();

    loop {
        select! {
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal, exiting gracefully");
                break;
            }

            Some(joined) = calls.join_next() => {
                match joined {
                    Ok((key, reply)) => {
                        if settle(&mut in_flight, &key) {
                            if let Err(e) = transport.write_message(&reply).await {
                                disconnected(e)?;
                                break;
                            }
                        }
                    }
                    Err(e) => error!("tool call task failed: {}", e),
                }
            }

            msg = transport.read_message() => {
                let message = match msg {
                    Ok(Some(message)) => message,
                    Ok(None) => {
                        info!("Client disconnected (EOF)");
                        break;
                    }
                    Err(e) => {
                        error!("Transport error: {}", e);
                        shutdown.cancel();
                        return Err(e);
                    }
                };

                let reply = match Incoming::classify(message) {
                    Incoming::Request { id, method, params } if method == "tools/call" => {
                        let key = request_key(&id);
                        let token = shutdown.child_token();
                        in_flight.insert(
                            key.clone(),
                            InFlight {
                                token: token.clone(),
                                cancelled_by_client: false,
                            },
                        );
                        let state = Arc::clone(&state);
                        calls.spawn(async move {
                            let outcome = state.handle_request(&method, params, &token).await;
                            (key, response(id, outcome))
                        });
                        None
                    }
                    Incoming::Request { id, method, params } => {
                        let outcome = state.handle_request(&method, params, &shutdown).await;
                        Some(response(id, outcome))
                    }
                    Incoming::Notification { method, params } => {
                        if method == "notifications/cancelled" {
                            cancel_request(&mut in_flight, &params);
                        } else {
                            state.handle_notification(&method);
                        }
                        None
                    }
                    Incoming::Response => {
                        debug!("ignoring client response");
                        None
                    }
                    Incoming::Invalid { id } => Some(response(id, Err(RpcError::invalid_request()))),
                };

                if let Some(reply) = reply {
                    if let Err(e) = transport.write_message(&reply).await {
                        disconnected(e)?;
                        break;
                    }
                }
            }
        }
    }

    shutdown.cancel();
    if !calls.is_empty() {
        info!(pending = calls.len(), "Waiting for in-flight tool calls");
    }
    let mut client_gone = false;
    while let Some(joined) = calls.join_next().await {
        match joined {
            Ok((key, reply)) => {
                if settle(&mut in_flight, &key) && !client_gone {
                    if let Err(e) = transport.write_message(&reply).await {
                        disconnected(e)?;
                        client_gone = true;
                    }
                }
            }
            Err(e) => error!("tool call task failed: {}", e),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

fn cancel_request(in_flight: &mut HashMap<String, InFlight>, params: &Value) {
    let Some(id) = params.get("requestId") else {
        warn!("cancellation without requestId");
        return;
    };
    let key = request_key(id);
    match in_flight.get_mut(&key) {
        Some(entry) => {
            info!(request = %key, "Cancelling request");
            entry.cancelled_by_client = true;
            entry.token.cancel();
        }
        None => debug!(request = %key, "cancellation for unknown or finished request"),
    }
}
