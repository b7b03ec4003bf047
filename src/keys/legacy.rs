//! OpenSSL "traditional" PEM encryption.
//!
//! Keys written by `openssl rsa -aes256` and friends carry two RFC 1421
//! headers ahead of the base64 body:
//!
//! ```text
//! Proc-Type: 4,ENCRYPTED
//! DEK-Info: AES-256-CBC,DE94AA9F21BCECEC6C8323D79F08046F
//! ```
//!
//! The cipher key is derived with `EVP_BytesToKey` (MD5, one round, salt =
//! first eight bytes of the IV) and the DER body is CBC-encrypted with PKCS#7
//! padding.

use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use std::fmt;
use zeroize::Zeroizing;

/// Block ciphers OpenSSL writes in `DEK-Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyCipher {
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
    DesEde3Cbc,
}

impl LegacyCipher {
    /// Look up a cipher by its `DEK-Info` name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "AES-128-CBC" => Some(Self::Aes128Cbc),
            "AES-192-CBC" => Some(Self::Aes192Cbc),
            "AES-256-CBC" => Some(Self::Aes256Cbc),
            "DES-EDE3-CBC" => Some(Self::DesEde3Cbc),
            _ => None,
        }
    }

    /// Cipher key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128Cbc => 16,
            Self::Aes192Cbc => 24,
            Self::Aes256Cbc => 32,
            Self::DesEde3Cbc => 24,
        }
    }

    /// IV (and block) length in bytes.
    pub fn iv_len(self) -> usize {
        match self {
            Self::DesEde3Cbc => 8,
            _ => 16,
        }
    }
}

impl fmt::Display for LegacyCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Aes128Cbc => "AES-128-CBC",
            Self::Aes192Cbc => "AES-192-CBC",
            Self::Aes256Cbc => "AES-256-CBC",
            Self::DesEde3Cbc => "DES-EDE3-CBC",
        };
        f.write_str(name)
    }
}

/// Parsed `DEK-Info` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DekInfo {
    pub cipher: LegacyCipher,
    pub iv: Vec<u8>,
}

impl DekInfo {
    /// Parse a `DEK-Info` value of the form `CIPHER,HEXIV`.
    pub fn parse(value: &str) -> Result<Self, String> {
        let (name, iv_hex) = value
            .split_once(',')
            .ok_or_else(|| format!("DEK-Info '{}' has no IV", value.trim()))?;

        let cipher = LegacyCipher::from_name(name)
            .ok_or_else(|| format!("unsupported DEK-Info cipher '{}'", name.trim()))?;

        let iv = hex::decode(iv_hex.trim())
            .map_err(|e| format!("DEK-Info IV is not valid hex: {}", e))?;

        if iv.len() != cipher.iv_len() {
            return Err(format!(
                "DEK-Info IV for {} must be {} bytes, got {}",
                cipher,
                cipher.iv_len(),
                iv.len()
            ));
        }

        Ok(Self { cipher, iv })
    }
}

/// Decryption failure. Bad padding is the usual symptom of a wrong
/// passphrase, so callers treat every variant the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyDecryptError;

/// OpenSSL `EVP_BytesToKey` with MD5 and a single iteration.
pub fn derive_key(passphrase: &[u8], salt: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(Vec::with_capacity(len + 16));
    let mut previous: Option<md5::Digest> = None;

    while key.len() < len {
        let mut ctx = md5::Context::new();
        if let Some(digest) = previous {
            ctx.consume(digest.0);
        }
        ctx.consume(passphrase);
        ctx.consume(salt);
        let digest = ctx.compute();
        key.extend_from_slice(&digest.0);
        previous = Some(digest);
    }

    key.truncate(len);
    key
}

/// Decrypt a traditional-encrypted DER body.
pub fn decrypt(
    dek: &DekInfo,
    passphrase: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, LegacyDecryptError> {
    let salt = &dek.iv[..8];
    let key = derive_key(passphrase, salt, dek.cipher.key_len());
    let iv = dek.iv.as_slice();

    let plaintext = match dek.cipher {
        LegacyCipher::Aes128Cbc => cbc_decrypt::<aes::Aes128>(&key, iv, ciphertext),
        LegacyCipher::Aes192Cbc => cbc_decrypt::<aes::Aes192>(&key, iv, ciphertext),
        LegacyCipher::Aes256Cbc => cbc_decrypt::<aes::Aes256>(&key, iv, ciphertext),
        LegacyCipher::DesEde3Cbc => cbc_decrypt::<des::TdesEde3>(&key, iv, ciphertext),
    }?;

    Ok(Zeroizing::new(plaintext))
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, LegacyDecryptError>
where
    C: cbc::cipher::BlockDecryptMut + cbc::cipher::BlockCipher + cbc::cipher::KeyInit,
{
    cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| LegacyDecryptError)?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| LegacyDecryptError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbc::cipher::BlockEncryptMut;

    fn encrypt_aes256(passphrase: &[u8], iv: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let key = derive_key(passphrase, &iv[..8], 32);
        cbc::Encryptor::<aes::Aes256>::new_from_slices(&key, iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    #[test]
    fn test_derive_key_matches_openssl() {
        let salt = hex::decode("0102030405060708").unwrap();
        let key = derive_key(b"correct horse battery staple", &salt, 32);
        assert_eq!(
            hex::encode(&*key),
            "6f920a43e427bc52eb313ace899b93b1f97d81751def5647ebab3f3bb7d0f679"
        );

        let short = derive_key(b"correct horse battery staple", &salt, 16);
        assert_eq!(hex::encode(&*short), "6f920a43e427bc52eb313ace899b93b1");
    }

    #[test]
    fn test_parse_dek_info() {
        let dek = DekInfo::parse("AES-256-CBC,DE94AA9F21BCECEC6C8323D79F08046F").unwrap();
        assert_eq!(dek.cipher, LegacyCipher::Aes256Cbc);
        assert_eq!(dek.iv.len(), 16);

        let des = DekInfo::parse("DES-EDE3-CBC,A3BAD375DAA43113").unwrap();
        assert_eq!(des.cipher, LegacyCipher::DesEde3Cbc);
        assert_eq!(des.iv.len(), 8);
    }

    #[test]
    fn test_parse_dek_info_rejects_bad_values() {
        assert!(DekInfo::parse("AES-256-CBC").is_err());
        assert!(DekInfo::parse("BF-CBC,0011223344556677").is_err());
        assert!(DekInfo::parse("AES-256-CBC,zz").is_err());
        assert!(DekInfo::parse("AES-256-CBC,0011").is_err());
    }

    #[test]
    fn test_decrypt_round_trip() {
        let iv = [7u8; 16];
        let ciphertext = encrypt_aes256(b"secret", &iv, b"plain DER bytes");
        let dek = DekInfo {
            cipher: LegacyCipher::Aes256Cbc,
            iv: iv.to_vec(),
        };

        let plaintext = decrypt(&dek, b"secret", &ciphertext).unwrap();
        assert_eq!(plaintext.as_slice(), b"plain DER bytes");
    }

    #[test]
    fn test_decrypt_wrong_passphrase_fails_or_differs() {
        let iv = [9u8; 16];
        let ciphertext = encrypt_aes256(b"secret", &iv, b"plain DER bytes");
        let dek = DekInfo {
            cipher: LegacyCipher::Aes256Cbc,
            iv: iv.to_vec(),
        };

        match decrypt(&dek, b"not the secret", &ciphertext) {
            Err(LegacyDecryptError) => {}
            Ok(plaintext) => assert_ne!(plaintext.as_slice(), b"plain DER bytes"),
        }
    }
}
