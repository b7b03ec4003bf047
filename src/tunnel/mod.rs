//! Local TCP tunnels through an SSH jump host.
//!
//! A [`TunnelConnection`] owns exactly one forwarding server. Opening it
//! resolves the jump-host credentials (materializing the private key when one
//! is given), starts the server and records the bound local address. Closing
//! it stops the server once; dropping an open connection is the backstop.
//!
//! ```rust,ignore
//! use bastion_tunnel::tunnel::{TunnelConnection, TunnelEndpoint, TunnelOptions};
//!
//! let options = TunnelOptions::new(
//!     TunnelEndpoint::new("bastion.example.com", 22),
//!     "deploy",
//!     TunnelEndpoint::new("db.internal", 5432),
//! )
//! .private_key(std::fs::read("id_ed25519")?);
//!
//! let mut tunnel = TunnelConnection::open(options).await?;
//! let address = tunnel.bound_address()?;
//! println!("postgres://{}/app", address);
//! tunnel.close().await?;
//! ```

pub mod backend;
pub mod credentials;
pub mod known_hosts;
#[cfg(feature = "russh")]
pub mod ssh;

pub use backend::{ForwardRequest, ForwardingBackend, ForwardingServer};
pub use credentials::Credentials;
pub use known_hosts::{HostKeyPolicy, HostKeyStatus, KnownHosts};
#[cfg(feature = "russh")]
pub use ssh::SshForwarder;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, instrument};
use zeroize::Zeroizing;

use crate::error::{Error, Result, TunnelStartError};
use crate::keys::{KeyMaterializer, KeySpec};

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default local listen host.
pub const DEFAULT_LOCAL_HOST: &str = "127.0.0.1";

/// Default bound on TCP connect plus SSH handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TunnelEndpoint {
    pub host: String,
    pub port: u16,
}

impl TunnelEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for TunnelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// The local address a running tunnel listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BoundAddress {
    pub host: IpAddr,
    pub port: u16,
}

impl BoundAddress {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl From<SocketAddr> for BoundAddress {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for BoundAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.socket_addr().fmt(f)
    }
}

/// Parameters for [`TunnelConnection::open`].
#[derive(Clone)]
pub struct TunnelOptions {
    pub remote: TunnelEndpoint,
    pub jump: TunnelEndpoint,
    pub jump_user: String,
    pub password: Option<Zeroizing<String>>,
    pub private_key: Option<Zeroizing<Vec<u8>>>,
    pub key_passphrase: Option<Zeroizing<String>>,
    pub local_host: String,
    pub local_port: u16,
    pub connect_timeout: Duration,
    pub host_key_policy: HostKeyPolicy,
    pub known_hosts_file: Option<PathBuf>,
    pub keepalive_interval: Option<Duration>,
}

impl TunnelOptions {
    pub fn new(jump: TunnelEndpoint, jump_user: impl Into<String>, remote: TunnelEndpoint) -> Self {
        Self {
            remote,
            jump,
            jump_user: jump_user.into(),
            password: None,
            private_key: None,
            key_passphrase: None,
            local_host: DEFAULT_LOCAL_HOST.to_string(),
            local_port: 0,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_file: None,
            keepalive_interval: None,
        }
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Zeroizing::new(password.into()));
        self
    }

    /// Private key text in any supported encoding. A non-empty key takes
    /// precedence over the password.
    pub fn private_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.private_key = Some(Zeroizing::new(key.into()));
        self
    }

    pub fn key_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.key_passphrase = Some(Zeroizing::new(passphrase.into()));
        self
    }

    pub fn local_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn known_hosts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_file = Some(path.into());
        self
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    /// The local socket address to bind.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let host = self.local_host.trim();
        let ip = if host.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            host.trim_start_matches('[')
                .trim_end_matches(']')
                .parse::<IpAddr>()
                .map_err(|_| TunnelStartError::InvalidBindAddress(self.local_host.clone()))?
        };
        Ok(SocketAddr::new(ip, self.local_port))
    }

    fn key_spec(&self) -> Option<KeySpec<'_>> {
        self.private_key.as_ref().map(|raw| {
            KeySpec::new(raw.as_slice())
                .with_optional_passphrase(self.key_passphrase.as_ref().map(|p| p.as_str()))
        })
    }
}

impl fmt::Debug for TunnelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelOptions")
            .field("remote", &self.remote)
            .field("jump", &self.jump)
            .field("jump_user", &self.jump_user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("local_host", &self.local_host)
            .field("local_port", &self.local_port)
            .field("connect_timeout", &self.connect_timeout)
            .field("host_key_policy", &self.host_key_policy)
            .field("known_hosts_file", &self.known_hosts_file)
            .field("keepalive_interval", &self.keepalive_interval)
            .finish_non_exhaustive()
    }
}

/// An open tunnel.
///
/// Holds at most one forwarding server. Once closed it cannot be reopened.
pub struct TunnelConnection {
    server: Option<Box<dyn ForwardingServer>>,
    bound: BoundAddress,
    jump: TunnelEndpoint,
    remote: TunnelEndpoint,
}

impl TunnelConnection {
    /// Open a tunnel with the russh forwarding backend.
    #[cfg(feature = "russh")]
    pub async fn open(options: TunnelOptions) -> Result<Self> {
        Self::open_with(options, &SshForwarder::new()).await
    }

    /// Open a tunnel with a specific forwarding backend.
    ///
    /// Credentials and the bind address are checked before the backend is
    /// started, so a missing credential never reaches the network.
    #[instrument(level = "debug", skip_all, fields(jump = %options.jump, remote = %options.remote))]
    pub async fn open_with(
        options: TunnelOptions,
        backend: &dyn ForwardingBackend,
    ) -> Result<Self> {
        let credentials = Credentials::resolve(
            options.password.as_ref().map(|p| p.as_str()),
            options.key_spec(),
            &KeyMaterializer::new(),
        )?;
        let bind_addr = options.bind_addr()?;

        let request = ForwardRequest {
            jump: options.jump.clone(),
            user: options.jump_user.clone(),
            credentials,
            remote: options.remote.clone(),
            bind_addr,
            connect_timeout: options.connect_timeout,
            host_key_policy: options.host_key_policy,
            known_hosts_file: options.known_hosts_file.clone(),
            keepalive_interval: options.keepalive_interval,
        };

        let server = backend.start(request).await?;
        let bound = BoundAddress::from(server.local_addr());

        info!(local = %bound, jump = %options.jump, remote = %options.remote, "Tunnel opened");

        Ok(Self {
            server: Some(server),
            bound,
            jump: options.jump,
            remote: options.remote,
        })
    }

    /// Open a tunnel, run `f` with its bound address, and close it on every
    /// exit path. An error from `f` wins over an error from closing.
    #[cfg(feature = "russh")]
    pub async fn scoped<F, Fut, T, E>(options: TunnelOptions, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(BoundAddress) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        Self::scoped_with(options, &SshForwarder::new(), f).await
    }

    /// [`scoped`](Self::scoped) with a specific forwarding backend.
    pub async fn scoped_with<F, Fut, T, E>(
        options: TunnelOptions,
        backend: &dyn ForwardingBackend,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(BoundAddress) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        let mut tunnel = Self::open_with(options, backend).await?;
        let result = f(tunnel.bound).await;
        let closed = tunnel.close().await;

        let value = result?;
        closed?;
        Ok(value)
    }

    /// The local address, while the tunnel is open.
    pub fn bound_address(&self) -> Result<BoundAddress> {
        if self.server.is_some() {
            Ok(self.bound)
        } else {
            Err(Error::TunnelClosed)
        }
    }

    pub fn is_open(&self) -> bool {
        self.server.is_some()
    }

    pub fn jump(&self) -> &TunnelEndpoint {
        &self.jump
    }

    pub fn remote(&self) -> &TunnelEndpoint {
        &self.remote
    }

    /// Stop the forwarding server and release the local port.
    ///
    /// Only the first call does anything; later calls return `Ok(())`.
    pub async fn close(&mut self) -> Result<()> {
        match self.server.take() {
            Some(mut server) => {
                debug!(local = %self.bound, "Closing tunnel");
                let result = server.stop().await;
                info!(local = %self.bound, "Tunnel closed");
                result
            }
            None => Ok(()),
        }
    }
}

impl fmt::Debug for TunnelConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConnection")
            .field("bound", &self.bound)
            .field("jump", &self.jump)
            .field("remote", &self.remote)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for TunnelConnection {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            debug!(local = %self.bound, "Tunnel dropped without close, aborting forwarding server");
            drop(server);
        }
    }
}
