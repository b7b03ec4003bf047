//! Passphrase normalization.
//!
//! A passphrase is encoded from text to bytes exactly once, when the
//! [`Passphrase`] is built. Every consumer (OpenSSH decryption, PEM
//! decryption, OpenSSH re-encryption) reads the same bytes.

use std::fmt;
use zeroize::Zeroizing;

/// Byte form of a private key passphrase.
///
/// An empty passphrase is the same as no passphrase.
#[derive(Clone, Default)]
pub struct Passphrase {
    bytes: Option<Zeroizing<Vec<u8>>>,
}

impl Passphrase {
    /// No passphrase.
    pub fn none() -> Self {
        Self::default()
    }

    /// Encode a text passphrase as UTF-8.
    pub fn from_text(text: Option<&str>) -> Self {
        Self::from_bytes(text.map(str::as_bytes))
    }

    /// Use raw passphrase bytes as-is.
    pub fn from_bytes(bytes: Option<&[u8]>) -> Self {
        match bytes {
            Some(b) if !b.is_empty() => Self {
                bytes: Some(Zeroizing::new(b.to_vec())),
            },
            _ => Self::none(),
        }
    }

    /// The passphrase bytes, or `None` when no passphrase was supplied.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref().map(Vec::as_slice)
    }

    /// Whether a non-empty passphrase was supplied.
    pub fn is_present(&self) -> bool {
        self.bytes.is_some()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_present() { "<redacted>" } else { "<none>" };
        f.debug_tuple("Passphrase").field(&state).finish()
    }
}

impl From<&str> for Passphrase {
    fn from(text: &str) -> Self {
        Self::from_text(Some(text))
    }
}

impl From<Option<&str>> for Passphrase {
    fn from(text: Option<&str>) -> Self {
        Self::from_text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_passphrase_is_none() {
        assert!(!Passphrase::from_text(Some("")).is_present());
        assert!(!Passphrase::from_text(None).is_present());
        assert!(!Passphrase::from_bytes(Some(&[])).is_present());
        assert_eq!(Passphrase::from_text(Some("")).as_bytes(), None);
    }

    #[test]
    fn test_text_is_utf8_encoded() {
        let passphrase = Passphrase::from("pässwörd");
        assert_eq!(passphrase.as_bytes(), Some("pässwörd".as_bytes()));
        assert_eq!(passphrase.as_bytes().map(<[u8]>::len), Some(10));
    }

    #[test]
    fn test_whitespace_is_preserved() {
        let passphrase = Passphrase::from(" secret ");
        assert_eq!(passphrase.as_bytes(), Some(&b" secret "[..]));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", Passphrase::from("hunter2"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("redacted"));
    }
}
