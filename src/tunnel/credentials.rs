//! Jump-host credentials.

use std::fmt;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::keys::{KeyMaterializer, KeySpec, TypedKey};

/// The single credential used to authenticate to the jump host.
#[derive(Clone)]
pub enum Credentials {
    Password(Zeroizing<String>),
    Key(TypedKey),
}

impl Credentials {
    /// Pick the credential for a connection.
    ///
    /// A non-empty key takes precedence over a password and is materialized
    /// with `materializer`; its errors propagate unchanged. An empty password
    /// counts as no password.
    pub fn resolve(
        password: Option<&str>,
        key: Option<KeySpec<'_>>,
        materializer: &KeyMaterializer,
    ) -> Result<Self> {
        if let Some(spec) = key.filter(|spec| !spec.is_empty()) {
            let materialized = materializer.materialize(&spec)?;
            debug!(
                family = %materialized.family(),
                encoding = %materialized.source_encoding(),
                "Using private key for jump host authentication"
            );
            return Ok(Credentials::Key(materialized.into_key()));
        }

        match password.filter(|p| !p.is_empty()) {
            Some(password) => {
                debug!("Using password for jump host authentication");
                Ok(Credentials::Password(Zeroizing::new(password.to_string())))
            }
            None => Err(Error::AuthMaterial(
                "neither a password nor a private key was supplied".to_string(),
            )),
        }
    }

    /// SSH authentication method name.
    pub fn method(&self) -> &'static str {
        match self {
            Credentials::Password(_) => "password",
            Credentials::Key(_) => "publickey",
        }
    }

    pub fn key(&self) -> Option<&TypedKey> {
        match self {
            Credentials::Key(key) => Some(key),
            Credentials::Password(_) => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Credentials::Password(<redacted>)"),
            Credentials::Key(key) => write!(f, "Credentials::Key({} {})", key.family(), key.fingerprint()),
        }
    }
}
