//! Private key materialization.
//!
//! [`KeyMaterializer`] turns raw key bytes in any supported encoding into a
//! [`TypedKey`]:
//!
//! 1. Try each [`ParseStrategy`] in order ([`OpenSshStrategy`], then
//!    [`PemStrategy`]). A strategy that does not recognize the input falls
//!    through; a recognized key that cannot be decrypted stops the chain.
//! 2. A key read from PEM is re-encoded as an OpenSSH key, encrypted with the
//!    caller's passphrase when one was given, and parsed again.
//! 3. The decrypted OpenSSH key is dispatched into its [`KeyFamily`].
//!
//! The passphrase is encoded to bytes once and those bytes feed every step.
//!
//! ```rust,ignore
//! use bastion_tunnel::keys::{KeyMaterializer, KeySpec};
//!
//! let pem = std::fs::read("id_rsa.pem")?;
//! let key = KeyMaterializer::new()
//!     .materialize(&KeySpec::new(&pem).with_passphrase("hunter2"))?;
//! println!("{} {}", key.family(), key.fingerprint());
//! ```

pub mod legacy;
pub mod passphrase;
pub mod pem;
pub mod strategy;
pub mod typed;

pub use passphrase::Passphrase;
pub use strategy::{
    default_strategies, OpenSshStrategy, ParseStrategy, ParsedKey, PemStrategy, StrategyError,
};
pub use typed::{KeyFamily, TypedKey};

use std::fmt;
use std::path::Path;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::error::{Error, KeyEncoding, KeyFormatError, Result};

/// Raw key material and its optional passphrase.
///
/// Borrows from the caller, who keeps ownership of the key text.
#[derive(Clone, Copy)]
pub struct KeySpec<'a> {
    raw: &'a [u8],
    passphrase: Option<&'a str>,
}

impl<'a> KeySpec<'a> {
    pub fn new<B: AsRef<[u8]> + ?Sized>(raw: &'a B) -> Self {
        Self {
            raw: raw.as_ref(),
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: &'a str) -> Self {
        self.passphrase = Some(passphrase);
        self
    }

    pub fn with_optional_passphrase(mut self, passphrase: Option<&'a str>) -> Self {
        self.passphrase = passphrase;
        self
    }

    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn passphrase(&self) -> Option<&'a str> {
        self.passphrase
    }

    /// True when the key text is empty or only whitespace.
    pub fn is_empty(&self) -> bool {
        self.raw.iter().all(u8::is_ascii_whitespace)
    }
}

impl fmt::Debug for KeySpec<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySpec")
            .field("raw_len", &self.raw.len())
            .field("passphrase", &self.passphrase.map(|_| "<redacted>"))
            .finish()
    }
}

/// A [`TypedKey`] together with where it came from.
#[derive(Clone)]
pub struct MaterializedKey {
    key: TypedKey,
    source_encoding: KeyEncoding,
    openssh: Zeroizing<String>,
}

impl MaterializedKey {
    pub fn key(&self) -> &TypedKey {
        &self.key
    }

    pub fn into_key(self) -> TypedKey {
        self.key
    }

    pub fn family(&self) -> KeyFamily {
        self.key.family()
    }

    /// The encoding the caller's bytes were in.
    pub fn source_encoding(&self) -> KeyEncoding {
        self.source_encoding
    }

    /// Whether the key went through the PEM to OpenSSH re-encoding.
    pub fn was_reencoded(&self) -> bool {
        self.source_encoding.is_pem()
    }

    /// The OpenSSH text the key was finally parsed from: the caller's input,
    /// or the re-encoded PEM key (encrypted if a passphrase was given).
    pub fn openssh(&self) -> &str {
        &self.openssh
    }

    pub fn fingerprint(&self) -> ssh_key::Fingerprint {
        self.key.fingerprint()
    }
}

impl fmt::Debug for MaterializedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializedKey")
            .field("family", &self.key.family())
            .field("source_encoding", &self.source_encoding)
            .finish_non_exhaustive()
    }
}

/// Parses private keys through an ordered chain of strategies.
pub struct KeyMaterializer {
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl Default for KeyMaterializer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KeyMaterializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("KeyMaterializer")
            .field("strategies", &names)
            .finish()
    }
}

impl KeyMaterializer {
    /// Materializer with the default OpenSSH then PEM chain.
    pub fn new() -> Self {
        Self::with_strategies(default_strategies())
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ParseStrategy>>) -> Self {
        Self { strategies }
    }

    /// Materialize `spec` into a typed key.
    #[instrument(level = "debug", skip_all, fields(len = spec.raw.len()))]
    pub fn materialize(&self, spec: &KeySpec<'_>) -> Result<MaterializedKey> {
        let passphrase = Passphrase::from_text(spec.passphrase);
        let parsed = self.run_strategies(spec.raw, &passphrase)?;

        let (key, openssh) = if parsed.encoding.is_pem() {
            let openssh = strategy::encode_openssh(&parsed.key, &passphrase)?;
            let reparsed = match OpenSshStrategy.parse(openssh.as_bytes(), &passphrase) {
                Ok(reparsed) => reparsed,
                Err(StrategyError::Fatal(err)) => {
                    return Err(KeyFormatError::Reencode(err.to_string()).into())
                }
                Err(StrategyError::Mismatch(reason)) => {
                    return Err(KeyFormatError::Reencode(reason).into())
                }
            };
            debug!(from = %parsed.encoding, "Re-encoded PEM key as OpenSSH");
            (reparsed.key, openssh)
        } else {
            let text = Zeroizing::new(String::from_utf8_lossy(spec.raw).into_owned());
            (parsed.key, text)
        };

        let key = TypedKey::from_private_key(&key)?;
        debug!(
            family = %key.family(),
            algorithm = %key.algorithm(),
            encoding = %parsed.encoding,
            "Materialized private key"
        );

        Ok(MaterializedKey {
            key,
            source_encoding: parsed.encoding,
            openssh,
        })
    }

    /// Read and materialize a key file.
    pub fn materialize_file(
        &self,
        path: impl AsRef<Path>,
        passphrase: Option<&str>,
    ) -> Result<MaterializedKey> {
        let path = path.as_ref();
        let raw = Zeroizing::new(std::fs::read(path).map_err(|source| Error::KeyFile {
            path: path.to_path_buf(),
            source,
        })?);
        self.materialize(&KeySpec::new(raw.as_slice()).with_optional_passphrase(passphrase))
    }

    fn run_strategies(&self, raw: &[u8], passphrase: &Passphrase) -> Result<ParsedKey> {
        let mut reasons: Vec<(&'static str, String)> = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            match strategy.parse(raw, passphrase) {
                Ok(parsed) => {
                    debug!(strategy = strategy.name(), encoding = %parsed.encoding, "Parse strategy matched");
                    return Ok(parsed);
                }
                Err(StrategyError::Mismatch(reason)) => {
                    debug!(strategy = strategy.name(), %reason, "Parse strategy did not match");
                    reasons.push((strategy.name(), reason));
                }
                Err(StrategyError::Fatal(err)) => {
                    debug!(strategy = strategy.name(), error = %err, "Parse strategy failed");
                    return Err(err);
                }
            }
        }

        Err(unrecognized(reasons).into())
    }
}

fn unrecognized(reasons: Vec<(&'static str, String)>) -> KeyFormatError {
    let mut openssh = Vec::new();
    let mut pem = Vec::new();
    for (name, reason) in reasons {
        match name {
            "openssh" => openssh.push(reason),
            "pem" => pem.push(reason),
            other => pem.push(format!("{}: {}", other, reason)),
        }
    }

    let or_none = |parts: Vec<String>| {
        if parts.is_empty() {
            "not attempted".to_string()
        } else {
            parts.join("; ")
        }
    };

    KeyFormatError::Unrecognized {
        openssh: or_none(openssh),
        pem: or_none(pem),
    }
}

/// Materialize `raw` with the default strategy chain.
pub fn materialize(raw: &[u8], passphrase: Option<&str>) -> Result<TypedKey> {
    KeyMaterializer::new()
        .materialize(&KeySpec::new(raw).with_optional_passphrase(passphrase))
        .map(MaterializedKey::into_key)
}

/// Read and materialize a key file with the default strategy chain.
pub fn materialize_file(path: impl AsRef<Path>, passphrase: Option<&str>) -> Result<MaterializedKey> {
    KeyMaterializer::new().materialize_file(path, passphrase)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverMatches;

    impl ParseStrategy for NeverMatches {
        fn name(&self) -> &'static str {
            "never"
        }

        fn parse(
            &self,
            _raw: &[u8],
            _passphrase: &Passphrase,
        ) -> std::result::Result<ParsedKey, StrategyError> {
            Err(StrategyError::Mismatch("never matches".to_string()))
        }
    }

    #[test]
    fn test_key_spec_is_empty() {
        assert!(KeySpec::new("").is_empty());
        assert!(KeySpec::new(" \n\t").is_empty());
        assert!(!KeySpec::new("-----BEGIN").is_empty());
    }

    #[test]
    fn test_key_spec_debug_redacts_passphrase() {
        let spec = KeySpec::new("key").with_passphrase("hunter2");
        let rendered = format!("{:?}", spec);
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_garbage_is_unrecognized_with_both_reasons() {
        let err = materialize(b"definitely not a key", None).unwrap_err();
        match err {
            Error::KeyFormat(KeyFormatError::Unrecognized { openssh, pem }) => {
                assert!(openssh.contains("OPENSSH"));
                assert!(pem.contains("PEM"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_custom_strategy_chain() {
        let materializer = KeyMaterializer::with_strategies(vec![Box::new(NeverMatches)]);
        let err = materializer
            .materialize(&KeySpec::new("anything"))
            .unwrap_err();
        match err {
            Error::KeyFormat(KeyFormatError::Unrecognized { openssh, pem }) => {
                assert_eq!(openssh, "not attempted");
                assert_eq!(pem, "never: never matches");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = materialize_file("/nonexistent/id_ed25519", None).unwrap_err();
        assert!(matches!(err, Error::KeyFile { .. }));
        assert!(err.to_string().contains("/nonexistent/id_ed25519"));
    }
}
