//! Chunked AEAD framing for one stream direction.
//!
//! Wire layout per chunk:
//! `[encrypted u16 BE length][tag][encrypted payload][tag]`.
//! The nonce is a little-endian counter that advances after every seal or
//! open, so the length and payload of one chunk use consecutive nonces.

use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};

use crate::cipher::{CipherKind, TAG_SIZE};
use crate::error::CryptoError;

/// Largest payload carried by one chunk.
pub const MAX_PAYLOAD_SIZE: usize = 0x3FFF;

/// Size of an encrypted length header, tag included.
pub const LENGTH_HEADER_SIZE: usize = 2 + TAG_SIZE;

enum AnyAead {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
    ChaCha(ChaCha20Poly1305),
    XChaCha(XChaCha20Poly1305),
}

/// Shared nonce-counting AEAD state.
struct AeadState {
    aead: AnyAead,
    nonce_size: usize,
    counter: u64,
}

impl AeadState {
    fn new(kind: CipherKind, subkey: &[u8]) -> Result<Self, CryptoError> {
        let aead = match kind {
            CipherKind::Aes128Gcm => AnyAead::Aes128(
                Aes128Gcm::new_from_slice(subkey)
                    .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?,
            ),
            CipherKind::Aes256Gcm => AnyAead::Aes256(
                Aes256Gcm::new_from_slice(subkey)
                    .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?,
            ),
            CipherKind::ChaCha20IetfPoly1305 => AnyAead::ChaCha(
                ChaCha20Poly1305::new_from_slice(subkey)
                    .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?,
            ),
            CipherKind::XChaCha20IetfPoly1305 => AnyAead::XChaCha(
                XChaCha20Poly1305::new_from_slice(subkey)
                    .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?,
            ),
        };
        Ok(Self {
            aead,
            nonce_size: kind.nonce_size(),
            counter: 0,
        })
    }

    fn next_nonce(&mut self) -> Result<[u8; 24], CryptoError> {
        let mut nonce = [0u8; 24];
        nonce[..8].copy_from_slice(&self.counter.to_le_bytes());
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or(CryptoError::NonceExhausted)?;
        Ok(nonce)
    }

    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.next_nonce()?;
        let nonce = &nonce[..self.nonce_size];
        match &self.aead {
            AnyAead::Aes128(c) => c.encrypt(GenericArray::from_slice(nonce), plaintext),
            AnyAead::Aes256(c) => c.encrypt(GenericArray::from_slice(nonce), plaintext),
            AnyAead::ChaCha(c) => c.encrypt(GenericArray::from_slice(nonce), plaintext),
            AnyAead::XChaCha(c) => c.encrypt(GenericArray::from_slice(nonce), plaintext),
        }
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }

    fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.next_nonce()?;
        let nonce = &nonce[..self.nonce_size];
        match &self.aead {
            AnyAead::Aes128(c) => c.decrypt(GenericArray::from_slice(nonce), ciphertext),
            AnyAead::Aes256(c) => c.decrypt(GenericArray::from_slice(nonce), ciphertext),
            AnyAead::ChaCha(c) => c.decrypt(GenericArray::from_slice(nonce), ciphertext),
            AnyAead::XChaCha(c) => c.decrypt(GenericArray::from_slice(nonce), ciphertext),
        }
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

/// Encrypts an outbound byte stream into chunks.
pub struct ChunkSealer {
    state: AeadState,
}

impl ChunkSealer {
    pub(crate) fn new(kind: CipherKind, subkey: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            state: AeadState::new(kind, subkey)?,
        })
    }

    /// Seal `data`, splitting it into as many chunks as needed.
    ///
    /// Empty input produces no output.
    pub fn seal(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut out = Vec::with_capacity(data.len() + 2 * (LENGTH_HEADER_SIZE + TAG_SIZE));
        for chunk in data.chunks(MAX_PAYLOAD_SIZE) {
            self.seal_chunk(chunk, &mut out)?;
        }
        Ok(out)
    }

    /// Seal a single chunk of at most [`MAX_PAYLOAD_SIZE`] bytes into `out`.
    pub fn seal_chunk(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<(), CryptoError> {
        let len = u16::try_from(payload.len())
            .ok()
            .filter(|&n| usize::from(n) <= MAX_PAYLOAD_SIZE)
            .ok_or(CryptoError::FrameTooLarge(payload.len()))?;
        out.extend_from_slice(&self.state.seal(&len.to_be_bytes())?);
        out.extend_from_slice(&self.state.seal(payload)?);
        Ok(())
    }
}

/// Decrypts an inbound chunked stream.
///
/// Either feed exact pieces through [`open_length`](Self::open_length) and
/// [`open_payload`](Self::open_payload), or hand arbitrary buffers to
/// [`open_available`](Self::open_available). Do not mix the two.
pub struct ChunkOpener {
    state: AeadState,
    /// Length of a chunk whose header was consumed but whose payload has
    /// not fully arrived yet.
    pending: Option<usize>,
}

impl std::fmt::Debug for ChunkOpener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkOpener")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl ChunkOpener {
    pub(crate) fn new(kind: CipherKind, subkey: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            state: AeadState::new(kind, subkey)?,
            pending: None,
        })
    }

    /// Decrypt a length header and return the payload length.
    pub fn open_length(&mut self, header: &[u8]) -> Result<usize, CryptoError> {
        let plain = self.state.open(header)?;
        let bytes: [u8; 2] = plain
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::DecryptionFailed("malformed length header".into()))?;
        let len = usize::from(u16::from_be_bytes(bytes));
        if len > MAX_PAYLOAD_SIZE {
            return Err(CryptoError::FrameTooLarge(len));
        }
        Ok(len)
    }

    /// Decrypt a payload (ciphertext plus tag).
    pub fn open_payload(&mut self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.state.open(payload)
    }

    /// Decrypt as much of `buf` as possible.
    ///
    /// Returns the plaintext and the number of bytes consumed; unconsumed
    /// bytes must be passed again, followed by more data, on the next call.
    pub fn open_available(&mut self, buf: &[u8]) -> Result<(Vec<u8>, usize), CryptoError> {
        let mut plain = Vec::new();
        let mut pos = 0;
        loop {
            let len = match self.pending {
                Some(len) => len,
                None => {
                    if buf.len() - pos < LENGTH_HEADER_SIZE {
                        break;
                    }
                    let len = self.open_length(&buf[pos..pos + LENGTH_HEADER_SIZE])?;
                    pos += LENGTH_HEADER_SIZE;
                    self.pending = Some(len);
                    len
                }
            };
            let end = pos + len + TAG_SIZE;
            if buf.len() < end {
                break;
            }
            plain.extend_from_slice(&self.open_payload(&buf[pos..end])?);
            self.pending = None;
            pos = end;
        }
        Ok((plain, pos))
    }
}
