//! TCP listener with newline-delimited JSON framing, one task per connection.
//!
//! A connection that calls `events.subscribe` keeps answering requests and
//! additionally receives every job notification as a JSON-RPC notification.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use super::methods::{MethodHandler, SUBSCRIBE_METHOD};
use super::protocol::{Notification, Request, Response};
use crate::core::JobNotification;

pub struct Transport {
    bind_addr: SocketAddr,
    handler: Arc<MethodHandler>,
}

impl Transport {
    pub fn new(bind_addr: SocketAddr, handler: MethodHandler) -> Self {
        Self {
            bind_addr,
            handler: Arc::new(handler),
        }
    }

    pub async fn listen(&self, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("Failed to bind RPC server to {}", self.bind_addr))?;
        info!(addr = %self.bind_addr, "RPC server listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "Client connected");
                            let handler = self.handler.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer, handler).await {
                                    debug!(peer = %peer, error = %e, "Connection error");
                                }
                                debug!(peer = %peer, "Client disconnected");
                            });
                        }
                        Err(e) => error!(error = %e, "Failed to accept connection"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("RPC server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn write_line<W, T>(writer: &mut W, message: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    Ok(())
}

/// Next notification, or pending forever when not subscribed.
async fn next_event(
    events: &mut Option<broadcast::Receiver<JobNotification>>,
) -> Result<JobNotification, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<MethodHandler>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    // `next_line` is cancel safe, so a partial line survives an event write.
    let mut lines = BufReader::new(reader).lines();
    let mut events: Option<broadcast::Receiver<JobNotification>> = None;

    loop {
        tokio::select! {
            read = lines.next_line() => {
                let Some(line) = read? else {
                    break;
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let request = match serde_json::from_str::<Request>(trimmed) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "Parse error");
                        write_line(&mut writer, &Response::parse_error()).await?;
                        continue;
                    }
                };

                if let Err(msg) = request.validate() {
                    warn!(peer = %peer, error = msg, "Invalid request");
                    let id = request.id.clone().unwrap_or(serde_json::Value::Null);
                    write_line(&mut writer, &Response::invalid_request(id, msg)).await?;
                    continue;
                }

                // Subscribe before acknowledging so nothing slips between.
                if request.method == SUBSCRIBE_METHOD && events.is_none() {
                    debug!(peer = %peer, "Client subscribed to events");
                    events = Some(handler.subscribe());
                }

                let notification = request.is_notification();
                let response = handler.handle(request).await;
                if !notification {
                    write_line(&mut writer, &response).await?;
                }
            }
            event = next_event(&mut events) => {
                match event {
                    Ok(event) => {
                        write_line(&mut writer, &Notification::event(&event)?).await?;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(peer = %peer, skipped, "Subscriber fell behind, events dropped");
                    }
                    Err(RecvError::Closed) => events = None,
                }
            }
        }
    }

    Ok(())
}
