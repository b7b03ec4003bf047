//! Forwarding server seam.
//!
//! A [`ForwardingBackend`] starts a server that listens on a local address
//! and relays every accepted connection to the target through the jump
//! host. [`TunnelConnection`](super::TunnelConnection) only starts and stops
//! servers; the accept loop belongs to the backend.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use super::credentials::Credentials;
use super::known_hosts::HostKeyPolicy;
use super::TunnelEndpoint;
use crate::error::Result;

/// Everything a backend needs to start one forwarding server.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// SSH jump host.
    pub jump: TunnelEndpoint,
    /// User on the jump host.
    pub user: String,
    pub credentials: Credentials,
    /// Destination reachable from the jump host.
    pub remote: TunnelEndpoint,
    /// Local address to listen on; port 0 picks an ephemeral port.
    pub bind_addr: SocketAddr,
    /// Bound on TCP connect plus SSH handshake.
    pub connect_timeout: Duration,
    pub host_key_policy: HostKeyPolicy,
    /// Defaults to `~/.ssh/known_hosts` when unset.
    pub known_hosts_file: Option<PathBuf>,
    pub keepalive_interval: Option<Duration>,
}

/// Starts forwarding servers.
#[async_trait]
pub trait ForwardingBackend: Send + Sync {
    /// Authenticate to the jump host and bind the local listener.
    ///
    /// Returns only once the server is accepting connections, or fails with
    /// nothing left running.
    async fn start(&self, request: ForwardRequest) -> Result<Box<dyn ForwardingServer>>;
}

/// A running forwarding server.
///
/// Dropping a server without calling [`stop`](ForwardingServer::stop) aborts
/// its accept loop and releases the local port.
#[async_trait]
pub trait ForwardingServer: Send + Sync {
    /// The address the listener is bound to.
    fn local_addr(&self) -> SocketAddr;

    /// Stop accepting, end forwarded connections and close the session.
    async fn stop(&mut self) -> Result<()>;
}
