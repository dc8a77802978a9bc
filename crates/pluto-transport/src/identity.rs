//! Node identities.
//!
//! An [`Identity`] is an Ed25519 or RSA public key, optionally paired with
//! its private half. Only the local node holds a private key; identities of
//! remote peers are reconstructed from their readable form and can verify
//! but never sign.
//!
//! The readable form is `<algorithm>.<base64url(DER SPKI)>` without padding
//! and is the primary key for peers everywhere in the overlay.
use std::ffi::OsString;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signer, Verifier};
use pkcs8::spki::SubjectPublicKeyInfoRef;
use pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding,
    ObjectIdentifier, PrivateKeyInfo,
};
use rand::RngCore;
use rsa::pkcs1v15;
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding as _, Signer as _, Verifier as _};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::IdentityError;

/// `rsaEncryption`.
const RSA_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// Modulus size of generated RSA keys.
pub const RSA_KEY_BITS: usize = 4096;

/// Signature algorithms an identity may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    Ed25519,
    /// PKCS#1 v1.5 signatures over SHA-256.
    Rsa,
}

impl KeyAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::Ed25519 => "ed25519",
            KeyAlgorithm::Rsa => "rsa",
        }
    }

    fn from_oid(oid: ObjectIdentifier) -> Result<Self, IdentityError> {
        if oid == ed25519_dalek::pkcs8::ALGORITHM_OID {
            Ok(KeyAlgorithm::Ed25519)
        } else if oid == RSA_OID {
            Ok(KeyAlgorithm::Rsa)
        } else {
            Err(IdentityError::UnsupportedKeyType(oid.to_string()))
        }
    }
}

impl Default for KeyAlgorithm {
    fn default() -> Self {
        KeyAlgorithm::Ed25519
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519" => Ok(KeyAlgorithm::Ed25519),
            "rsa" => Ok(KeyAlgorithm::Rsa),
            other => Err(IdentityError::UnsupportedKeyType(other.to_string())),
        }
    }
}

fn invalid(e: impl fmt::Display) -> IdentityError {
    IdentityError::InvalidKey(e.to_string())
}

#[derive(Clone)]
enum PublicKey {
    Ed25519(ed25519_dalek::VerifyingKey),
    Rsa(RsaPublicKey),
}

impl PublicKey {
    fn algorithm(&self) -> KeyAlgorithm {
        match self {
            PublicKey::Ed25519(_) => KeyAlgorithm::Ed25519,
            PublicKey::Rsa(_) => KeyAlgorithm::Rsa,
        }
    }

    fn to_der(&self) -> Result<pkcs8::Document, IdentityError> {
        match self {
            PublicKey::Ed25519(key) => key.to_public_key_der(),
            PublicKey::Rsa(key) => key.to_public_key_der(),
        }
        .map_err(invalid)
    }

    fn to_pem(&self) -> Result<String, IdentityError> {
        match self {
            PublicKey::Ed25519(key) => key.to_public_key_pem(LineEnding::LF),
            PublicKey::Rsa(key) => key.to_public_key_pem(LineEnding::LF),
        }
        .map_err(invalid)
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self {
            PublicKey::Ed25519(key) => match ed25519_dalek::Signature::from_slice(signature) {
                Ok(signature) => key.verify(message, &signature).is_ok(),
                Err(_) => false,
            },
            PublicKey::Rsa(key) => match pkcs1v15::Signature::try_from(signature) {
                Ok(signature) => pkcs1v15::VerifyingKey::<Sha256>::new(key.clone())
                    .verify(message, &signature)
                    .is_ok(),
                Err(_) => false,
            },
        }
    }
}

#[derive(Clone)]
enum PrivateKey {
    Ed25519(ed25519_dalek::SigningKey),
    Rsa(RsaPrivateKey),
}

impl PrivateKey {
    fn public(&self) -> PublicKey {
        match self {
            PrivateKey::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
            PrivateKey::Rsa(key) => PublicKey::Rsa(key.to_public_key()),
        }
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, IdentityError> {
        match self {
            PrivateKey::Ed25519(key) => Ok(key.sign(message).to_bytes().to_vec()),
            PrivateKey::Rsa(key) => {
                let signature = pkcs1v15::SigningKey::<Sha256>::new(key.clone())
                    .try_sign(message)
                    .map_err(invalid)?;
                Ok(signature.to_vec())
            }
        }
    }
}

/// A node identity: public key, optional private key, cached readable form.
#[derive(Clone)]
pub struct Identity {
    algorithm: KeyAlgorithm,
    public: PublicKey,
    private: Option<PrivateKey>,
    readable: String,
}

impl Identity {
    fn from_parts(public: PublicKey, private: Option<PrivateKey>) -> Result<Self, IdentityError> {
        let algorithm = public.algorithm();
        let der = public.to_der()?;
        let readable = format!("{}.{}", algorithm, URL_SAFE_NO_PAD.encode(der.as_bytes()));
        Ok(Self {
            algorithm,
            public,
            private,
            readable,
        })
    }

    fn from_private(private: PrivateKey) -> Result<Self, IdentityError> {
        Self::from_parts(private.public(), Some(private))
    }

    /// Generate a fresh keypair. RSA keys have [`RSA_KEY_BITS`] bits.
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self, IdentityError> {
        match algorithm {
            KeyAlgorithm::Ed25519 => {
                let mut seed = [0u8; 32];
                rand::rng().fill_bytes(&mut seed);
                Self::from_private(PrivateKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&seed)))
            }
            KeyAlgorithm::Rsa => Self::generate_rsa(RSA_KEY_BITS),
        }
    }

    fn generate_rsa(bits: usize) -> Result<Self, IdentityError> {
        let key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, bits).map_err(invalid)?;
        Self::from_private(PrivateKey::Rsa(key))
    }

    /// Load an identity from key files.
    ///
    /// Reads the PKCS#8 private key at `path` when present, otherwise the
    /// SPKI public key at `path.pub`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let path = path.as_ref();
        if path.exists() {
            let pem = std::fs::read_to_string(path)?;
            return Self::from_private_pem(&pem);
        }
        let public_path = public_key_path(path);
        if public_path.exists() {
            let pem = std::fs::read_to_string(&public_path)?;
            return Self::from_public_pem(&pem);
        }
        Err(IdentityError::NoKeyFound(path.to_path_buf()))
    }

    /// Load the identity at `path`, or generate and save a new one.
    pub fn load_or_generate(
        path: impl AsRef<Path>,
        algorithm: KeyAlgorithm,
    ) -> Result<Self, IdentityError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        let identity = Self::generate(algorithm)?;
        identity.save(path)?;
        tracing::info!(path = %path.display(), identity = %identity, "generated new identity");
        Ok(identity)
    }

    /// Write the private key (if held) to `path` and the public key to
    /// `path.pub`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), IdentityError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        if let Some(private) = &self.private {
            let pem = match private {
                PrivateKey::Ed25519(key) => key.to_pkcs8_pem(LineEnding::LF),
                PrivateKey::Rsa(key) => key.to_pkcs8_pem(LineEnding::LF),
            }
            .map_err(invalid)?;
            std::fs::write(path, pem.as_bytes())?;
            set_mode(path, 0o600)?;
        }

        let public_path = public_key_path(path);
        std::fs::write(&public_path, self.public.to_pem()?)?;
        set_mode(&public_path, 0o644)?;
        Ok(())
    }

    /// Parse a PKCS#8 PEM private key.
    pub fn from_private_pem(pem: &str) -> Result<Self, IdentityError> {
        let (_label, doc) = pkcs8::SecretDocument::from_pem(pem).map_err(invalid)?;
        let info = PrivateKeyInfo::try_from(doc.as_bytes()).map_err(invalid)?;
        let private = match KeyAlgorithm::from_oid(info.algorithm.oid)? {
            KeyAlgorithm::Ed25519 => PrivateKey::Ed25519(
                ed25519_dalek::SigningKey::from_pkcs8_der(doc.as_bytes()).map_err(invalid)?,
            ),
            KeyAlgorithm::Rsa => {
                PrivateKey::Rsa(RsaPrivateKey::from_pkcs8_der(doc.as_bytes()).map_err(invalid)?)
            }
        };
        Self::from_private(private)
    }

    /// Parse an SPKI PEM public key.
    pub fn from_public_pem(pem: &str) -> Result<Self, IdentityError> {
        let (_label, doc) = pkcs8::Document::from_pem(pem).map_err(invalid)?;
        Self::from_public_der(doc.as_bytes())
    }

    fn from_public_der(der: &[u8]) -> Result<Self, IdentityError> {
        let info = SubjectPublicKeyInfoRef::try_from(der).map_err(invalid)?;
        let public = match KeyAlgorithm::from_oid(info.algorithm.oid)? {
            KeyAlgorithm::Ed25519 => PublicKey::Ed25519(
                ed25519_dalek::VerifyingKey::from_public_key_der(der).map_err(invalid)?,
            ),
            KeyAlgorithm::Rsa => PublicKey::Rsa(RsaPublicKey::from_public_key_der(der).map_err(invalid)?),
        };
        Self::from_parts(public, None)
    }

    /// Reconstruct a public-only identity from its readable form.
    pub fn from_readable(value: &str) -> Result<Self, IdentityError> {
        let (algorithm, encoded) = value
            .split_once('.')
            .ok_or_else(|| IdentityError::InvalidKey("missing algorithm separator".into()))?;
        let algorithm: KeyAlgorithm = algorithm.parse()?;
        let der = URL_SAFE_NO_PAD.decode(encoded).map_err(invalid)?;
        let identity = Self::from_public_der(&der)?;
        if identity.algorithm != algorithm {
            return Err(IdentityError::InvalidKey(format!(
                "algorithm tag {algorithm} does not match key"
            )));
        }
        Ok(identity)
    }

    pub fn to_readable(&self) -> String {
        self.readable.clone()
    }

    pub fn readable(&self) -> &str {
        &self.readable
    }

    /// Algorithm plus the last characters of the readable form, which carry
    /// the key bytes. For logs and terminals.
    pub fn short(&self) -> String {
        let tail = &self.readable[self.readable.len().saturating_sub(10)..];
        format!("{}...{tail}", self.algorithm)
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn has_private_key(&self) -> bool {
        self.private.is_some()
    }

    /// This identity without its private key.
    pub fn public(&self) -> Self {
        Self {
            private: None,
            ..self.clone()
        }
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, IdentityError> {
        self.private
            .as_ref()
            .ok_or(IdentityError::MissingPrivateKey)?
            .sign(message)
    }

    /// Check `signature` over `message`. Malformed signatures verify false.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        self.public.verify(message, signature)
    }
}

/// `path` with `.pub` appended to the file name.
pub fn public_key_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".pub");
    PathBuf::from(name)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.readable == other.readable
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.readable.hash(state);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.readable)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The SPKI prefix is constant; the key bytes sit at the tail.
        write!(f, "Identity({})", self.short())
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_readable(s)
    }
}

impl serde::Serialize for Identity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.readable)
    }
}

impl<'de> serde::Deserialize<'de> for Identity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
