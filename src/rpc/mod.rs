//! JSON-RPC 2.0 over TCP, the daemon's only outer surface.
//!
//! - `protocol`: request, response and notification types
//! - `transport`: listener, newline-delimited framing, event streaming
//! - `methods`: dispatch onto the [`ManagerHandle`](crate::core::ManagerHandle)
//! - `client`: what the CLI uses to talk to the daemon

pub mod client;
pub mod methods;
mod protocol;
mod transport;

use std::net::SocketAddr;
use tokio::sync::broadcast;

use crate::context::AppContext;
use transport::Transport;

pub use client::{ClientError, EventStream, RpcClient};
pub use methods::MethodHandler;
pub use protocol::{OperationResult, Request, Response, RpcError};

pub struct RpcServer {
    transport: Transport,
    shutdown_tx: broadcast::Sender<()>,
}

impl RpcServer {
    pub fn new(ctx: AppContext, bind_addr: SocketAddr) -> Self {
        let handler = MethodHandler::new(ctx);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            transport: Transport::new(bind_addr, handler),
            shutdown_tx,
        }
    }

    /// Serve until [`RpcServer::shutdown`] is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.transport.listen(shutdown_rx).await
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
