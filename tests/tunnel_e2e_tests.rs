//! Tunnel tests over the russh forwarding backend.
//!
//! The failure-path tests run anywhere. The forwarding tests need a
//! reachable jump host and are ignored by default:
//!
//! ```bash
//! export BASTION_TUNNEL_TEST_JUMP_HOST=bastion.example.com
//! export BASTION_TUNNEL_TEST_JUMP_USER=deploy
//! export BASTION_TUNNEL_TEST_KEY=~/.ssh/id_ed25519          # or _PASSWORD
//! export BASTION_TUNNEL_TEST_TARGET=internal-web:80
//! cargo test --test tunnel_e2e_tests -- --ignored --test-threads=1
//! ```

#![cfg(feature = "russh")]

mod common;

use std::env;
use std::time::{Duration, Instant};

use bastion_tunnel::error::{Error, TunnelStartError};
use bastion_tunnel::tunnel::{HostKeyPolicy, TunnelConnection, TunnelEndpoint, TunnelOptions};
use common::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// ============================================================================
// Failure paths (no SSH server required)
// ============================================================================

#[tokio::test]
async fn test_connection_refused_is_tunnel_start_error() {
    // Reserve a port, then close it so nothing is listening.
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let options = TunnelOptions::new(
        TunnelEndpoint::new("127.0.0.1", port),
        "deploy",
        TunnelEndpoint::new("db.internal", 5432),
    )
    .password("hunter2")
    .connect_timeout(Duration::from_secs(5));

    let err = TunnelConnection::open(options).await.unwrap_err();
    assert!(
        matches!(err, Error::TunnelStart(TunnelStartError::Connect { .. })),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn test_silent_server_times_out() {
    // Accepts TCP but never sends an SSH banner.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let options = TunnelOptions::new(
        TunnelEndpoint::new("127.0.0.1", port),
        "deploy",
        TunnelEndpoint::new("db.internal", 5432),
    )
    .password("hunter2")
    .connect_timeout(Duration::from_millis(500));

    let started = Instant::now();
    let err = TunnelConnection::open(options).await.unwrap_err();
    assert!(
        matches!(err, Error::TunnelStart(TunnelStartError::Timeout { .. })),
        "{:?}",
        err
    );
    assert!(started.elapsed() < Duration::from_secs(5));

    server.abort();
}

#[tokio::test]
async fn test_dsa_key_rejected_before_connecting() {
    // Nothing listens on the jump port; the DSA check must fail first.
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let options = TunnelOptions::new(
        TunnelEndpoint::new("127.0.0.1", port),
        "deploy",
        TunnelEndpoint::new("db.internal", 5432),
    )
    .private_key(fixture("traditional_dsa.pem"));

    let err = TunnelConnection::open(options).await.unwrap_err();
    assert!(
        matches!(err, Error::TunnelStart(TunnelStartError::Authentication { .. })),
        "{:?}",
        err
    );
}

// ============================================================================
// Real jump host
// ============================================================================

struct E2eConfig {
    jump: TunnelEndpoint,
    user: String,
    key: Option<Vec<u8>>,
    key_passphrase: Option<String>,
    password: Option<String>,
    target: TunnelEndpoint,
}

impl E2eConfig {
    fn from_env() -> Option<Self> {
        let host = env::var("BASTION_TUNNEL_TEST_JUMP_HOST").ok()?;
        let port = env::var("BASTION_TUNNEL_TEST_JUMP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(22);
        let user = env::var("BASTION_TUNNEL_TEST_JUMP_USER").ok()?;
        let target = env::var("BASTION_TUNNEL_TEST_TARGET").ok()?;
        let (target_host, target_port) = target.rsplit_once(':')?;

        let key = env::var("BASTION_TUNNEL_TEST_KEY")
            .ok()
            .map(|p| std::fs::read(shellexpand::tilde(&p).as_ref()).unwrap());

        Some(Self {
            jump: TunnelEndpoint::new(host, port),
            user,
            key,
            key_passphrase: env::var("BASTION_TUNNEL_TEST_KEY_PASSPHRASE").ok(),
            password: env::var("BASTION_TUNNEL_TEST_PASSWORD").ok(),
            target: TunnelEndpoint::new(target_host, target_port.parse().ok()?),
        })
    }

    fn options(&self) -> TunnelOptions {
        let mut options = TunnelOptions::new(self.jump.clone(), self.user.clone(), self.target.clone())
            .host_key_policy(HostKeyPolicy::AcceptAny)
            .connect_timeout(Duration::from_secs(15));
        if let Some(key) = &self.key {
            options = options.private_key(key.clone());
        }
        if let Some(passphrase) = &self.key_passphrase {
            options = options.key_passphrase(passphrase.clone());
        }
        if let Some(password) = &self.password {
            options = options.password(password.clone());
        }
        options
    }
}

macro_rules! e2e_config {
    () => {
        match E2eConfig::from_env() {
            Some(config) => config,
            None => {
                eprintln!("Skipping: BASTION_TUNNEL_TEST_* not set");
                return;
            }
        }
    };
}

#[tokio::test]
#[ignore]
async fn test_e2e_open_forward_close() {
    let config = e2e_config!();

    let started = Instant::now();
    let mut tunnel = TunnelConnection::open(config.options()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(15));

    let address = tunnel.bound_address().unwrap();
    assert_eq!(address.host.to_string(), "127.0.0.1");
    assert!(address.port > 0);

    // Any TCP service answers an HTTP-ish probe or closes; both prove forwarding.
    let mut stream = tokio::net::TcpStream::connect(address.socket_addr())
        .await
        .unwrap();
    stream
        .write_all(b"HEAD / HTTP/1.0\r\n\r\n")
        .await
        .unwrap();
    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(10), stream.read(&mut buf)).await;
    assert!(read.is_ok(), "no response through tunnel");

    tunnel.close().await.unwrap();
    tunnel.close().await.unwrap();
    assert!(tokio::net::TcpListener::bind(address.socket_addr()).await.is_ok());
}

#[tokio::test]
#[ignore]
async fn test_e2e_scoped() {
    let config = e2e_config!();

    let port = TunnelConnection::scoped(config.options(), |address| async move {
        tokio::net::TcpStream::connect(address.socket_addr()).await?;
        Ok::<_, anyhow::Error>(address.port)
    })
    .await
    .unwrap();

    assert!(port > 0);
}

#[tokio::test]
#[ignore]
async fn test_e2e_wrong_password_is_authentication_error() {
    let config = e2e_config!();

    let options = TunnelOptions::new(config.jump.clone(), config.user.clone(), config.target.clone())
        .host_key_policy(HostKeyPolicy::AcceptAny)
        .password("definitely-not-the-password");

    let err = TunnelConnection::open(options).await.unwrap_err();
    assert!(
        matches!(err, Error::TunnelStart(TunnelStartError::Authentication { .. })),
        "{:?}",
        err
    );
}
