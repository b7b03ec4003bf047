//! Algorithm-typed private keys.

use rsa::pkcs1v15;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::BigUint;
use serde::Serialize;
use sha2::Sha512;
use ssh_key::private::{DsaKeypair, EcdsaKeypair, Ed25519Keypair, KeypairData, RsaKeypair};
use ssh_key::public::{EcdsaPublicKey, KeyData};
use ssh_key::{Algorithm, Fingerprint, HashAlg, Mpint, PrivateKey, PublicKey, Signature, SshSig};
use std::fmt;
use zeroize::Zeroizing;

use super::passphrase::Passphrase;
use super::strategy::encode_openssh;
use crate::error::{Error, KeyEncoding, KeyFormatError, Result};

/// Supported key algorithm families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFamily {
    Rsa,
    Ed25519,
    Ecdsa,
    Dsa,
}

impl fmt::Display for KeyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyFamily::Rsa => "RSA",
            KeyFamily::Ed25519 => "Ed25519",
            KeyFamily::Ecdsa => "ECDSA",
            KeyFamily::Dsa => "DSA",
        };
        f.write_str(name)
    }
}

/// A decrypted private key tagged with its algorithm family.
#[derive(Clone, Debug)]
pub enum TypedKey {
    Rsa(RsaKeypair),
    Ed25519(Ed25519Keypair),
    /// NIST P-256, P-384 or P-521.
    Ecdsa(EcdsaKeypair),
    Dsa(DsaKeypair),
}

impl TypedKey {
    /// Dispatch a decrypted OpenSSH key into its family.
    ///
    /// Security-key types and anything else outside the four families are
    /// rejected with [`Error::UnsupportedAlgorithm`].
    pub fn from_private_key(key: &PrivateKey) -> Result<Self> {
        match key.key_data() {
            KeypairData::Rsa(keypair) => Ok(TypedKey::Rsa(keypair.clone())),
            KeypairData::Ed25519(keypair) => Ok(TypedKey::Ed25519(keypair.clone())),
            KeypairData::Ecdsa(keypair) => Ok(TypedKey::Ecdsa(keypair.clone())),
            KeypairData::Dsa(keypair) => Ok(TypedKey::Dsa(keypair.clone())),
            KeypairData::Encrypted(_) => Err(KeyFormatError::PassphraseRequired {
                encoding: KeyEncoding::OpenSsh,
            }
            .into()),
            _ => Err(Error::unsupported_algorithm(key.algorithm())),
        }
    }

    pub fn family(&self) -> KeyFamily {
        match self {
            TypedKey::Rsa(_) => KeyFamily::Rsa,
            TypedKey::Ed25519(_) => KeyFamily::Ed25519,
            TypedKey::Ecdsa(_) => KeyFamily::Ecdsa,
            TypedKey::Dsa(_) => KeyFamily::Dsa,
        }
    }

    /// The SSH algorithm, e.g. `ecdsa-sha2-nistp384`.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            TypedKey::Rsa(_) => Algorithm::Rsa { hash: None },
            TypedKey::Ed25519(_) => Algorithm::Ed25519,
            TypedKey::Ecdsa(keypair) => Algorithm::Ecdsa {
                curve: keypair.curve(),
            },
            TypedKey::Dsa(_) => Algorithm::Dsa,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        let key_data = match self {
            TypedKey::Rsa(keypair) => KeyData::Rsa(keypair.public.clone()),
            TypedKey::Ed25519(keypair) => KeyData::Ed25519(keypair.public),
            TypedKey::Ecdsa(keypair) => KeyData::Ecdsa(EcdsaPublicKey::from(keypair)),
            TypedKey::Dsa(keypair) => KeyData::Dsa(keypair.public.clone()),
        };
        PublicKey::new(key_data, "")
    }

    /// SHA-256 fingerprint of the public key, as printed by `ssh-keygen -l`.
    pub fn fingerprint(&self) -> Fingerprint {
        self.public_key().fingerprint(HashAlg::Sha256)
    }

    /// Produce an SSHSIG signature over `message`, as `ssh-keygen -Y sign`
    /// does.
    ///
    /// RSA keys sign with `rsa-sha2-512`.
    pub fn sign(&self, namespace: &str, message: &[u8]) -> Result<SshSig> {
        let signing = |e: ssh_key::Error| Error::Signing(format!("{}: {}", self.family(), e));

        match self {
            TypedKey::Rsa(keypair) => {
                let signer = RsaSigner::new(keypair)?;
                SshSig::sign(&signer, namespace, HashAlg::Sha512, message).map_err(signing)
            }
            _ => self
                .private_key()?
                .sign(namespace, HashAlg::Sha512, message)
                .map_err(signing),
        }
    }

    /// Check an SSHSIG signature against this key's public half.
    pub fn verify(&self, namespace: &str, message: &[u8], signature: &SshSig) -> bool {
        self.public_key()
            .verify(namespace, message, signature)
            .is_ok()
    }

    /// Encode as an OpenSSH private key, encrypted when `passphrase` is
    /// present.
    pub fn to_openssh(&self, passphrase: &Passphrase) -> Result<Zeroizing<String>> {
        encode_openssh(&self.private_key()?, passphrase)
    }

    fn private_key(&self) -> Result<PrivateKey> {
        let key_data = match self {
            TypedKey::Rsa(keypair) => KeypairData::Rsa(keypair.clone()),
            TypedKey::Ed25519(keypair) => KeypairData::Ed25519(keypair.clone()),
            TypedKey::Ecdsa(keypair) => KeypairData::Ecdsa(keypair.clone()),
            TypedKey::Dsa(keypair) => KeypairData::Dsa(keypair.clone()),
        };
        PrivateKey::new(key_data, "").map_err(|e| KeyFormatError::Reencode(e.to_string()).into())
    }
}

/// PKCS#1 v1.5 / SHA-512 signer producing SSH `rsa-sha2-512` signatures.
struct RsaSigner {
    public: ssh_key::public::RsaPublicKey,
    key: pkcs1v15::SigningKey<Sha512>,
}

impl RsaSigner {
    fn new(keypair: &RsaKeypair) -> Result<Self> {
        let private = &keypair.private;
        let key = rsa::RsaPrivateKey::from_components(
            biguint(&keypair.public.n)?,
            biguint(&keypair.public.e)?,
            biguint(&private.d)?,
            vec![biguint(&private.p)?, biguint(&private.q)?],
        )
        .map_err(|e| Error::Signing(format!("RSA: {}", e)))?;

        Ok(Self {
            public: keypair.public.clone(),
            key: pkcs1v15::SigningKey::new(key),
        })
    }
}

impl Signer<Signature> for RsaSigner {
    fn try_sign(&self, message: &[u8]) -> rsa::signature::Result<Signature> {
        let signature = self.key.try_sign(message)?;
        Signature::new(
            Algorithm::Rsa {
                hash: Some(HashAlg::Sha512),
            },
            signature.to_vec(),
        )
        .map_err(|_| rsa::signature::Error::new())
    }
}

impl From<&RsaSigner> for KeyData {
    fn from(signer: &RsaSigner) -> KeyData {
        KeyData::Rsa(signer.public.clone())
    }
}

fn biguint(value: &Mpint) -> Result<BigUint> {
    value
        .as_positive_bytes()
        .map(BigUint::from_bytes_be)
        .ok_or_else(|| Error::Signing("RSA: negative key component".to_string()))
}
