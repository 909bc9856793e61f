//! Error types for the software cryptographic primitives.

use thiserror::Error;

/// Errors from key ring management and AEAD operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Authentication tag did not verify (wrong key, tampering, wrong slot).
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Why decryption failed
        reason: String,
    },

    /// No key material is stored at the requested index.
    #[error("no key material at index {index}")]
    MissingKey {
        /// Requested ring slot
        index: u32,
    },

    /// Key index outside of the ring.
    #[error("key index {index} out of range for a ring of {ring_size}")]
    InvalidKeyIndex {
        /// Requested ring slot
        index: u32,
        /// Number of slots in the ring
        ring_size: u32,
    },

    /// IV has the wrong length for AES-GCM.
    #[error("invalid IV length: expected {expected}, got {actual}")]
    InvalidIv {
        /// Required IV length
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// Frame is too short or its trailer is inconsistent.
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        /// What is wrong with the frame
        reason: &'static str,
    },

    /// Too many consecutive decryption failures; the ring refuses to serve
    /// keys until new material is set.
    #[error("key ring invalidated after {failures} consecutive failures")]
    RingInvalidated {
        /// Consecutive failures that were recorded
        failures: u32,
    },
}
