//! Client side of the daemon's JSON-RPC interface.

use std::net::SocketAddr;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use super::methods::SUBSCRIBE_METHOD;
use super::protocol::{EVENT_METHOD, Notification, Request, Response, RpcError};
use crate::core::JobNotification;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to daemon at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Communication error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode or decode message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Daemon closed the connection")]
    Closed,
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),
}

pub struct RpcClient {
    addr: SocketAddr,
}

struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect { addr, source })?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    async fn send(&mut self, request: &Request) -> Result<(), ClientError> {
        let mut json = serde_json::to_string(request)?;
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;
        Ok(())
    }

    async fn next_line(&mut self) -> Result<String, ClientError> {
        self.lines.next_line().await?.ok_or(ClientError::Closed)
    }

    /// Read until the response to `id`, skipping pushed notifications.
    async fn response(&mut self, id: &Value) -> Result<Value, ClientError> {
        loop {
            let line = self.next_line().await?;
            let value: Value = serde_json::from_str(&line)?;
            if value.get("method").is_some() {
                continue;
            }

            let response: Response = serde_json::from_value(value)?;
            if &response.id != id {
                continue;
            }
            if let Some(error) = response.error {
                return Err(ClientError::Rpc(error));
            }
            return Ok(response.result.unwrap_or(Value::Null));
        }
    }
}

impl RpcClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// One request on a fresh connection.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, ClientError> {
        let mut conn = Connection::open(self.addr).await?;
        let request = Request::new(method, params, 1);
        conn.send(&request).await?;
        let result = conn.response(&Value::from(1)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Open a connection that streams every job notification.
    pub async fn subscribe(&self) -> Result<EventStream, ClientError> {
        let mut conn = Connection::open(self.addr).await?;
        conn.send(&Request::new(SUBSCRIBE_METHOD, None, 1)).await?;
        conn.response(&Value::from(1)).await?;
        Ok(EventStream { conn })
    }
}

pub struct EventStream {
    conn: Connection,
}

impl EventStream {
    /// Waits for the next notification. Errors with `Closed` when the daemon
    /// goes away.
    pub async fn next(&mut self) -> Result<JobNotification, ClientError> {
        loop {
            let line = self.conn.next_line().await?;
            let message: Notification = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(_) => continue,
            };
            if message.method == EVENT_METHOD {
                return Ok(serde_json::from_value(message.params)?);
            }
        }
    }
}
