//! Error types for end-to-end encryption orchestration.
//!
//! Errors are `Clone` so lifecycle failures can be delivered to every
//! subscriber of the manager's event stream.

use thiserror::Error;

use crate::room::{ParticipantIdentity, TrackSid};

/// Failure reported by the native binding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("native {operation} failed: {reason}")]
pub struct NativeError {
    /// Native operation that failed (e.g. `"dispose"`)
    pub operation: &'static str,
    /// Binding-provided description
    pub reason: String,
}

impl NativeError {
    /// Create a native error for `operation`.
    pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
        Self { operation, reason: reason.into() }
    }
}

/// Errors surfaced by the key provider and the E2EE manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum E2eeError {
    /// Operation requires a bound room.
    #[error("configuration error: {0}")]
    Configuration(&'static str),

    /// Identity could not be resolved against the bound room.
    #[error("participant not found: {identity}")]
    ParticipantNotFound {
        /// Identity that was looked up
        identity: ParticipantIdentity,
    },

    /// Native encrypt/decrypt returned no result.
    #[error("{operation} failed for participant {identity} at key index {key_index}")]
    CryptoOperationFailed {
        /// `"encrypt"` or `"decrypt"`
        operation: &'static str,
        /// Participant whose key was used
        identity: ParticipantIdentity,
        /// Key index that was used
        key_index: u32,
    },

    /// Tearing down a frame cryptor failed. The registry entry is gone
    /// regardless.
    #[error("failed to detach cryptor for track {track_sid}: {source}")]
    Disposal {
        /// Track whose cryptor failed to tear down
        track_sid: TrackSid,
        /// Underlying native failure
        source: NativeError,
    },

    /// Key provider used after `dispose()`.
    #[error("key provider used after dispose")]
    KeyProviderDisposed,

    /// Key index outside of the configured key ring.
    #[error("key index {index} out of range for keyring of {keyring_size}")]
    InvalidKeyIndex {
        /// Requested index
        index: u32,
        /// Configured ring size
        keyring_size: u32,
    },

    /// Encrypted publication arrived without a media sender/receiver.
    #[error("encrypted track {track_sid} has no media handle")]
    MissingMediaHandle {
        /// Track that could not be bound
        track_sid: TrackSid,
    },

    /// Any other native failure.
    #[error(transparent)]
    Native(#[from] NativeError),
}

impl E2eeError {
    /// Returns true for failures that leave manager state consistent.
    ///
    /// Soft errors are reported and logged; the operation that raised them
    /// has already completed its state transition.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::Disposal { .. })
    }
}
