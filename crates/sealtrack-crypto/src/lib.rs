//! Sealtrack Cryptographic Primitives
//!
//! Software building blocks behind the Sealtrack native binding: a versioned
//! key ring, a one-way ratchet, key derivation, and AES-256-GCM sealing for
//! media frames and data-channel packets. Functions are pure and
//! deterministic. Callers provide IV bytes, so tests can pin outputs.
//!
//! # Key Lifecycle
//!
//! ```text
//! Key material (passphrase or raw bytes), stored at ring index N
//!        │
//!        ├── Ratchet (HMAC-SHA256 over salt) → next material at index N
//!        │
//!        ▼
//! HKDF-SHA256 (salt = ratchet salt) → 32-byte encryption key
//!        │
//!        ▼
//! AES-256-GCM (AAD = key index) → sealed frame / sealed packet
//! ```
//!
//! # Security
//!
//! Key Versioning:
//! - A ring of `size` slots lets several key versions be in flight during a
//!   rotation; every ciphertext names the slot it was sealed with
//!
//! Forward Secrecy:
//! - Ratcheting replaces the material in its slot; the old material is
//!   zeroized and cannot be recovered from the new one
//!
//! Authenticity:
//! - The key index is bound as associated data, so moving a ciphertext to
//!   another slot fails authentication

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
pub mod frame;
pub mod key_ring;
pub mod packet;
pub mod ratchet;

pub use error::CryptoError;
pub use frame::{FrameKind, FrameParts, classify_frame, open_frame, seal_frame};
pub use key_ring::{KeyMaterial, KeyRing, MAX_KEYRING_SIZE};
pub use packet::{IV_SIZE, SealedPacket, open_packet, seal_packet};
pub use ratchet::{EncryptionKey, KEY_SIZE, derive_encryption_key, ratchet_material};
