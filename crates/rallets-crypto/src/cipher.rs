//! Cipher selection and key derivation.
//!
//! The master key is derived from the endpoint password with
//! `EVP_BytesToKey` (MD5), and each stream direction gets its own subkey
//! via HKDF-SHA1 over a random salt.

use std::fmt;

use hkdf::Hkdf;
use md5::{Digest, Md5};
use rand::RngCore;
use rand::rngs::OsRng;
use sha1::Sha1;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::stream::{ChunkOpener, ChunkSealer};

/// HKDF info string for per-stream subkeys.
const SUBKEY_INFO: &[u8] = b"ss-subkey";

/// Authentication tag size shared by every supported AEAD.
pub const TAG_SIZE: usize = 16;

/// Supported AEAD methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    Aes128Gcm,
    Aes256Gcm,
    ChaCha20IetfPoly1305,
    XChaCha20IetfPoly1305,
}

impl CipherKind {
    /// Resolve a method name as sent by the service. Case-insensitive.
    pub fn from_method(method: &str) -> Result<Self, CryptoError> {
        match method.to_ascii_lowercase().as_str() {
            "aes-128-gcm" | "aead_aes_128_gcm" => Ok(Self::Aes128Gcm),
            "aes-256-gcm" | "aead_aes_256_gcm" => Ok(Self::Aes256Gcm),
            "chacha20-ietf-poly1305" | "aead_chacha20_poly1305" => Ok(Self::ChaCha20IetfPoly1305),
            "xchacha20-ietf-poly1305" | "aead_xchacha20_poly1305" => {
                Ok(Self::XChaCha20IetfPoly1305)
            }
            _ => Err(CryptoError::UnsupportedCipher(method.to_string())),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Aes128Gcm => "aes-128-gcm",
            Self::Aes256Gcm => "aes-256-gcm",
            Self::ChaCha20IetfPoly1305 => "chacha20-ietf-poly1305",
            Self::XChaCha20IetfPoly1305 => "xchacha20-ietf-poly1305",
        }
    }

    pub const fn key_size(self) -> usize {
        match self {
            Self::Aes128Gcm => 16,
            Self::Aes256Gcm | Self::ChaCha20IetfPoly1305 | Self::XChaCha20IetfPoly1305 => 32,
        }
    }

    /// Salt size equals key size for every supported method.
    pub const fn salt_size(self) -> usize {
        self.key_size()
    }

    pub const fn nonce_size(self) -> usize {
        match self {
            Self::Aes128Gcm | Self::Aes256Gcm | Self::ChaCha20IetfPoly1305 => 12,
            Self::XChaCha20IetfPoly1305 => 24,
        }
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A configured cipher: method plus password-derived master key.
#[derive(Clone)]
pub struct Cipher {
    kind: CipherKind,
    master_key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Cipher {
    /// Build a cipher for `method` keyed by `password`.
    pub fn new(method: &str, password: &str) -> Result<Self, CryptoError> {
        let kind = CipherKind::from_method(method)?;
        let master_key = evp_bytes_to_key(password.as_bytes(), kind.key_size());
        Ok(Self { kind, master_key })
    }

    pub const fn kind(&self) -> CipherKind {
        self.kind
    }

    /// Start an outbound stream with a fresh random salt.
    ///
    /// Returns the salt, which must be sent ahead of the first chunk.
    pub fn sealer(&self) -> Result<(Vec<u8>, ChunkSealer), CryptoError> {
        let mut salt = vec![0u8; self.kind.salt_size()];
        OsRng.fill_bytes(&mut salt);
        let sealer = self.sealer_with_salt(&salt)?;
        Ok((salt, sealer))
    }

    /// Start an outbound stream with a caller-chosen salt.
    pub fn sealer_with_salt(&self, salt: &[u8]) -> Result<ChunkSealer, CryptoError> {
        let subkey = self.subkey(salt)?;
        ChunkSealer::new(self.kind, &subkey)
    }

    /// Start decoding an inbound stream that began with `salt`.
    pub fn opener(&self, salt: &[u8]) -> Result<ChunkOpener, CryptoError> {
        let subkey = self.subkey(salt)?;
        ChunkOpener::new(self.kind, &subkey)
    }

    fn subkey(&self, salt: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if salt.len() != self.kind.salt_size() {
            return Err(CryptoError::InvalidSaltLength {
                expected: self.kind.salt_size(),
                actual: salt.len(),
            });
        }
        let hk = Hkdf::<Sha1>::new(Some(salt), &self.master_key);
        let mut subkey = Zeroizing::new(vec![0u8; self.kind.key_size()]);
        hk.expand(SUBKEY_INFO, &mut subkey)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(subkey)
    }
}

/// OpenSSL `EVP_BytesToKey` with MD5, one iteration, no salt.
fn evp_bytes_to_key(password: &[u8], key_len: usize) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(Vec::with_capacity(key_len + 16));
    let mut prev: Vec<u8> = Vec::new();
    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(password);
        prev = hasher.finalize().to_vec();
        key.extend_from_slice(&prev);
    }
    key.truncate(key_len);
    key
}
