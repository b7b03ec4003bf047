//! # bastion-tunnel
//!
//! Local TCP tunnels through an SSH jump host, with private keys accepted in
//! any common encoding.
//!
//! ## Core Concepts
//!
//! - **Key materialization**: raw private key text (OpenSSH, PKCS#1, PKCS#8,
//!   encrypted PKCS#8, SEC1, traditional DSA, with or without OpenSSL
//!   `Proc-Type` encryption) is decoded into a [`TypedKey`](keys::TypedKey)
//!   and normalized to the OpenSSH encoding.
//! - **Tunnels**: a [`TunnelConnection`](tunnel::TunnelConnection) listens on
//!   a local address and forwards every accepted connection to a target host
//!   through one authenticated SSH session to the jump host.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CLI (bastion-tunnel)                      │
//! │            open · inspect-key · convert-key                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┴───────────────┐
//!              ▼                               ▼
//! ┌─────────────────────────┐     ┌─────────────────────────────┐
//! │     KeyMaterializer     │────▶│      TunnelConnection       │
//! │ (OpenSSH + PEM parsers) │     │  (ForwardingBackend seam)   │
//! └─────────────────────────┘     └─────────────────────────────┘
//!                                              │
//!                                              ▼
//!                                 ┌─────────────────────────────┐
//!                                 │  russh session + listener   │
//!                                 │    (direct-tcpip channels)  │
//!                                 └─────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use bastion_tunnel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let options = TunnelOptions::new(
//!         TunnelEndpoint::new("bastion.example.com", 22),
//!         "deploy",
//!         TunnelEndpoint::new("db.internal", 5432),
//!     )
//!     .private_key(std::fs::read("/home/deploy/.ssh/id_rsa.pem")?);
//!
//!     TunnelConnection::scoped(options, |address| async move {
//!         println!("database reachable at {}", address);
//!         Ok::<_, Error>(())
//!     })
//!     .await
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

/// Configuration loading from TOML files and `BASTION_TUNNEL_*` variables.
pub mod config;

/// Error types shared by the key and tunnel layers.
pub mod error;

/// Private key decoding and normalization.
pub mod keys;

/// Jump-host tunnels.
pub mod tunnel;

/// Commonly used types.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, KeyEncoding, KeyFormatError, Result, TunnelStartError};
    pub use crate::keys::{KeyFamily, KeyMaterializer, KeySpec, MaterializedKey, TypedKey};
    pub use crate::tunnel::{
        BoundAddress, HostKeyPolicy, TunnelConnection, TunnelEndpoint, TunnelOptions,
    };
}

/// Returns the current version of bastion-tunnel.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
