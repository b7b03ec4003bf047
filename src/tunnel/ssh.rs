//! Forwarding server over a russh jump-host session.
//!
//! One SSH session is opened to the jump host. Every connection accepted on
//! the local listener gets its own `direct-tcpip` channel to the target.

use async_trait::async_trait;
use russh::client::{Handle, Handler};
use russh::keys::key::PublicKey;
use russh::keys::PublicKeyBase64;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::backend::{ForwardRequest, ForwardingBackend, ForwardingServer};
use super::credentials::Credentials;
use super::known_hosts::{HostKeyPolicy, HostKeyStatus, KnownHosts};
use super::TunnelEndpoint;
use crate::error::{Result, TunnelStartError};
use crate::keys::{Passphrase, TypedKey};

/// Error type for the russh client handler.
#[derive(Debug, thiserror::Error)]
#[error("russh error: {0}")]
pub struct SessionError(#[from] pub russh::Error);

/// Verifies the jump host's key against the configured policy.
struct TunnelHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts: KnownHosts,
}

impl TunnelHandler {
    fn new(request: &ForwardRequest) -> Self {
        let known_hosts = match request.host_key_policy {
            HostKeyPolicy::AcceptAny => KnownHosts::empty(),
            _ => request
                .known_hosts_file
                .clone()
                .or_else(KnownHosts::default_path)
                .map(|path| KnownHosts::load(&path))
                .unwrap_or_default(),
        };

        Self {
            host: request.jump.host.clone(),
            port: request.jump.port,
            policy: request.host_key_policy,
            known_hosts,
        }
    }

    fn verify(&self, server_public_key: &PublicKey) -> HostKeyStatus {
        match ssh_key::PublicKey::from_bytes(&server_public_key.public_key_bytes()) {
            Ok(key) => self.known_hosts.check(&self.host, self.port, &key),
            Err(e) => {
                debug!(error = %e, "Cannot decode server key for known_hosts lookup");
                HostKeyStatus::Unknown
            }
        }
    }
}

#[async_trait]
impl Handler for TunnelHandler {
    type Error = SessionError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        if self.policy == HostKeyPolicy::AcceptAny {
            trace!(host = %self.host, "Accepting host key without verification");
            return Ok(true);
        }

        let status = self.verify(server_public_key);
        let accepted = self.policy.accepts(status);
        match (status, accepted) {
            (HostKeyStatus::Verified, _) => {
                debug!(host = %self.host, "Host key verified against known_hosts");
            }
            (HostKeyStatus::Unknown, true) => {
                warn!(
                    host = %self.host,
                    fingerprint = %server_public_key.fingerprint(),
                    "Host not found in known_hosts, accepting"
                );
            }
            (HostKeyStatus::Unknown, false) => {
                warn!(host = %self.host, policy = %self.policy, "Host not found in known_hosts, rejecting");
            }
            (HostKeyStatus::Mismatch, _) => {
                warn!(
                    host = %self.host,
                    "HOST KEY VERIFICATION FAILED! Server key does not match known_hosts entry."
                );
            }
        }
        Ok(accepted)
    }
}

/// Forwarding backend built on russh.
#[derive(Debug, Clone, Default)]
pub struct SshForwarder;

impl SshForwarder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ForwardingBackend for SshForwarder {
    async fn start(&self, request: ForwardRequest) -> Result<Box<dyn ForwardingServer>> {
        // Resolve the key before touching the network.
        let keypair = match &request.credentials {
            Credentials::Key(key) => Some(Arc::new(russh_keypair(key, &request)?)),
            Credentials::Password(_) => None,
        };

        let mut session = connect(&request).await?;

        if let Err(e) = authenticate(&mut session, &request, keypair).await {
            disconnect(&session, "authentication failed").await;
            return Err(e);
        }

        let listener = match TcpListener::bind(request.bind_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                disconnect(&session, "local bind failed").await;
                return Err(TunnelStartError::Bind {
                    addr: request.bind_addr,
                    source,
                }
                .into());
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(source) => {
                disconnect(&session, "local bind failed").await;
                return Err(TunnelStartError::Bind {
                    addr: request.bind_addr,
                    source,
                }
                .into());
            }
        };

        let session = Arc::new(session);
        let token = CancellationToken::new();
        let task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&session),
            request.remote.clone(),
            token.clone(),
        ));

        info!(
            local = %local_addr,
            jump = %request.jump,
            remote = %request.remote,
            "Forwarding server started"
        );

        Ok(Box::new(SshForwardingServer {
            local_addr,
            session,
            token,
            task: Some(task),
        }))
    }
}

/// Convert a typed key into the transport's key type.
fn russh_keypair(key: &TypedKey, request: &ForwardRequest) -> Result<russh_keys::key::KeyPair> {
    let auth_error = |message: String| TunnelStartError::Authentication {
        user: request.user.clone(),
        host: request.jump.host.clone(),
        message,
    };

    if let TypedKey::Dsa(_) = key {
        return Err(auth_error("ssh-dss keys are not supported by the SSH transport".to_string()).into());
    }

    let openssh = key.to_openssh(&Passphrase::none())?;
    russh_keys::decode_secret_key(&openssh, None)
        .map_err(|e| auth_error(format!("cannot load {} key: {}", key.family(), e)).into())
}

async fn connect(request: &ForwardRequest) -> Result<Handle<TunnelHandler>> {
    let host = request.jump.host.as_str();
    let port = request.jump.port;

    let mut config = russh::client::Config::default();
    config.inactivity_timeout = None;
    config.keepalive_interval = request.keepalive_interval;
    let config = Arc::new(config);

    debug!(host = %host, port = port, user = %request.user, "Connecting to jump host");

    let handshake = async {
        let socket = TcpStream::connect((host, port))
            .await
            .map_err(|e| TunnelStartError::Connect {
                host: host.to_string(),
                port,
                message: e.to_string(),
            })?;

        // Enable TCP_NODELAY for lower latency
        socket
            .set_nodelay(true)
            .map_err(|e| TunnelStartError::Connect {
                host: host.to_string(),
                port,
                message: format!("failed to set TCP_NODELAY: {}", e),
            })?;

        russh::client::connect_stream(config, socket, TunnelHandler::new(request))
            .await
            .map_err(|e| match e {
                SessionError(russh::Error::UnknownKey) => TunnelStartError::HostKeyRejected {
                    host: host.to_string(),
                },
                SessionError(other) => TunnelStartError::Handshake {
                    host: host.to_string(),
                    message: other.to_string(),
                },
            })
    };

    let session = tokio::time::timeout(request.connect_timeout, handshake)
        .await
        .map_err(|_| TunnelStartError::Timeout {
            host: host.to_string(),
            port,
            timeout_secs: request.connect_timeout.as_secs(),
        })??;

    debug!(host = %host, "SSH handshake complete");
    Ok(session)
}

async fn authenticate(
    session: &mut Handle<TunnelHandler>,
    request: &ForwardRequest,
    keypair: Option<Arc<russh_keys::key::KeyPair>>,
) -> Result<()> {
    let user = request.user.as_str();
    let result = match (&request.credentials, keypair) {
        (_, Some(keypair)) => session.authenticate_publickey(user, keypair).await,
        (Credentials::Password(password), None) => {
            session
                .authenticate_password(user, password.as_str())
                .await
        }
        (Credentials::Key(_), None) => Ok(false),
    };

    let method = request.credentials.method();
    match result {
        Ok(true) => {
            debug!(user = %user, method = method, "Authenticated to jump host");
            Ok(())
        }
        Ok(false) => Err(TunnelStartError::Authentication {
            user: user.to_string(),
            host: request.jump.host.clone(),
            message: format!("{} authentication rejected", method),
        }
        .into()),
        Err(e) => Err(TunnelStartError::Authentication {
            user: user.to_string(),
            host: request.jump.host.clone(),
            message: e.to_string(),
        }
        .into()),
    }
}

async fn disconnect(session: &Handle<TunnelHandler>, reason: &str) {
    if let Err(e) = session
        .disconnect(russh::Disconnect::ByApplication, reason, "en")
        .await
    {
        debug!(error = %e, "Error disconnecting from jump host");
    }
}

async fn accept_loop(
    listener: TcpListener,
    session: Arc<Handle<TunnelHandler>>,
    remote: TunnelEndpoint,
    token: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            () = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                trace!(peer = %peer, "Accepted local connection");
                let session = Arc::clone(&session);
                let remote = remote.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        () = token.cancelled() => {}
                        result = forward(stream, peer, &session, &remote) => {
                            if let Err(e) = result {
                                debug!(peer = %peer, error = %e, "Forwarded connection ended with error");
                            }
                        }
                    }
                });
            }
            Err(e) => warn!(error = %e, "Failed to accept local connection"),
        }
    }

    debug!("Accept loop stopped");
}

async fn forward(
    mut stream: TcpStream,
    peer: SocketAddr,
    session: &Handle<TunnelHandler>,
    remote: &TunnelEndpoint,
) -> std::io::Result<()> {
    let _ = stream.set_nodelay(true);

    let channel = session
        .channel_open_direct_tcpip(
            remote.host.clone(),
            u32::from(remote.port),
            peer.ip().to_string(),
            u32::from(peer.port()),
        )
        .await
        .map_err(|e| std::io::Error::other(format!("direct-tcpip to {} failed: {}", remote, e)))?;

    let mut channel_stream = channel.into_stream();
    let (sent, received) = copy_bidirectional(&mut stream, &mut channel_stream).await?;
    trace!(peer = %peer, sent, received, "Forwarded connection closed");
    Ok(())
}

/// A running russh forwarding server.
struct SshForwardingServer {
    local_addr: SocketAddr,
    session: Arc<Handle<TunnelHandler>>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl ForwardingServer for SshForwardingServer {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn stop(&mut self) -> Result<()> {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!(error = %e, "Accept loop task ended abnormally");
            }
            disconnect(&self.session, "tunnel closed").await;
            info!(local = %self.local_addr, "Forwarding server stopped");
        }
        Ok(())
    }
}

impl Drop for SshForwardingServer {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
