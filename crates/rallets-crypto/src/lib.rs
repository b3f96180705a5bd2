//! `Rallets` tunnel cipher library
//!
//! Shadowsocks-style AEAD stream encryption between the local forwarder and
//! a remote proxy endpoint.
//!
//! ## Crypto primitives
//!
//! - **Master key**: `EVP_BytesToKey` (MD5) over the endpoint password
//! - **Subkey**: HKDF-SHA1 over a random per-stream salt, info `ss-subkey`
//! - **Encryption**: AES-128/256-GCM, ChaCha20-Poly1305 or XChaCha20-Poly1305
//!   AEAD with counter nonces

pub mod cipher;
pub mod error;
pub mod stream;

pub use cipher::{Cipher, CipherKind, TAG_SIZE};
pub use error::CryptoError;
pub use stream::{ChunkOpener, ChunkSealer, LENGTH_HEADER_SIZE, MAX_PAYLOAD_SIZE};
