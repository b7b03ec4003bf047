//! Shared test utilities for the bastion-tunnel test suite.
//!
//! - Key fixture loading
//! - A fake forwarding backend that counts starts, stops and drops
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::TcpListener;

use bastion_tunnel::error::{Result, TunnelStartError};
use bastion_tunnel::keys::KeyFamily;
use bastion_tunnel::tunnel::{
    ForwardRequest, ForwardingBackend, ForwardingServer, TunnelEndpoint, TunnelOptions,
};

/// Passphrase of every `*_enc` fixture.
pub const PASSPHRASE: &str = "correct horse battery staple";

/// Passphrase of the `*_unicode` fixtures.
pub const UNICODE_PASSPHRASE: &str = "pässwörd-ключ";

/// Fixture name stem and expected family for every supported key.
pub const FAMILIES: &[(&str, KeyFamily)] = &[
    ("rsa", KeyFamily::Rsa),
    ("ed25519", KeyFamily::Ed25519),
    ("ecdsa_p256", KeyFamily::Ecdsa),
    ("ecdsa_p384", KeyFamily::Ecdsa),
    ("ecdsa_p521", KeyFamily::Ecdsa),
    ("dsa", KeyFamily::Dsa),
];

/// Path to a key fixture.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("keys")
        .join(name)
}

/// Contents of a key fixture.
pub fn fixture(name: &str) -> Vec<u8> {
    let path = fixture_path(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e))
}

/// Fixture file names holding `stem` keys, with whether each is encrypted.
pub fn fixtures_for(stem: &str) -> Vec<(String, bool)> {
    let mut names = vec![
        (format!("openssh_{}.key", stem), false),
        (format!("openssh_{}_enc.key", stem), true),
        (format!("pkcs8_{}.pem", stem), false),
        (format!("pkcs8_{}_enc.pem", stem), true),
    ];
    // Ed25519 has no traditional OpenSSL encoding.
    if stem != "ed25519" {
        names.push((format!("traditional_{}.pem", stem), false));
        names.push((format!("traditional_{}_enc.pem", stem), true));
    }
    names
}

/// Tunnel options pointing at documentation addresses.
pub fn tunnel_options() -> TunnelOptions {
    TunnelOptions::new(
        TunnelEndpoint::new("bastion.example.com", 22),
        "deploy",
        TunnelEndpoint::new("db.internal", 5432),
    )
}

/// Lifecycle counters shared between a [`FakeBackend`] and its servers.
#[derive(Debug, Default)]
pub struct Counters {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub drops: AtomicUsize,
}

impl Counters {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

/// A forwarding backend that binds a real listener but never talks SSH.
#[derive(Default)]
pub struct FakeBackend {
    pub counters: Arc<Counters>,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub last_request: Mutex<Option<ForwardRequest>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn failing_stop() -> Self {
        Self {
            fail_stop: true,
            ..Self::default()
        }
    }

    pub fn last_request(&self) -> Option<ForwardRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl ForwardingBackend for FakeBackend {
    async fn start(&self, request: ForwardRequest) -> Result<Box<dyn ForwardingServer>> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());

        if self.fail_start {
            return Err(TunnelStartError::Connect {
                host: request.jump.host.clone(),
                port: request.jump.port,
                message: "connection refused".to_string(),
            }
            .into());
        }

        let listener = TcpListener::bind(request.bind_addr)
            .await
            .map_err(|source| TunnelStartError::Bind {
                addr: request.bind_addr,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TunnelStartError::Bind {
                addr: request.bind_addr,
                source,
            })?;

        Ok(Box::new(FakeServer {
            listener: Some(listener),
            local_addr,
            counters: Arc::clone(&self.counters),
            fail_stop: self.fail_stop,
        }))
    }
}

/// The server started by [`FakeBackend`].
pub struct FakeServer {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    counters: Arc<Counters>,
    fail_stop: bool,
}

#[async_trait]
impl ForwardingServer for FakeServer {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn stop(&mut self) -> Result<()> {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        self.listener.take();
        if self.fail_stop {
            return Err(bastion_tunnel::error::Error::Io(std::io::Error::other(
                "stop failed",
            )));
        }
        Ok(())
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.counters.drops.fetch_add(1, Ordering::SeqCst);
    }
}
