//! Server implementation for the audit proxy
//!
//! This module provides the listener: it accepts client connections and hands
//! each one to its own [`Session`], which then lives on its own task.

use crate::audit::AuditSink;
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::session::Session;
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Main proxy server implementation
pub struct ProxyServer {
    /// Server configuration
    config: ProxyConfig,

    /// Bound listening socket
    listener: TcpListener,

    /// Audit trail shared by every session
    sink: Arc<dyn AuditSink>,
}

impl ProxyServer {
    /// Validate the configuration and bind the listening socket
    pub async fn bind(config: ProxyConfig, sink: Arc<dyn AuditSink>) -> Result<Self> {
        config.validate()?;

        let addr = config.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::Server(format!("Failed to bind to {}: {}", addr, e)))?;

        info!("Proxy server listening on {}", listener.local_addr()?);

        Ok(Self {
            config,
            listener,
            sink,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Get server configuration
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Accept failures are logged and do not stop the loop. Sessions already
    /// running are not waited for.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Stopping proxy server...");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(stream, peer),
                    Err(e) => error!("Error accepting connection: {}", e),
                },
            }
        }

        info!("Proxy server stopped");
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        info!("New connection from {}", peer);

        let session = Session::new(stream, peer, self.sink.clone(), self.config.hexdump);
        let (host, port) = self.config.upstream();
        let host = host.to_string();

        tokio::spawn(async move {
            match session.start(&host, port).await {
                Ok(stats) => info!(
                    "Connection from {} closed. Stats: {} bytes to server, {} bytes to client",
                    peer, stats.client_to_server, stats.server_to_client
                ),
                Err(e) => error!("Error handling connection from {}: {}", peer, e),
            }
        });
    }
}
