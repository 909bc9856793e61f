//! Operations for model-based testing.
//!
//! Operations are generated randomly by proptest and applied to both the
//! model and the real manager.

use sealtrack_core::{ParticipantIdentity, TrackSid};

/// Participant index. 0 is the local participant, `1..=remotes` are remote
/// participants in the room, anything larger is unknown to the room.
pub type ModelParticipant = u8;

/// Track number, scoped to its publishing participant.
pub type ModelTrack = u8;

/// Operations that can be applied to the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Local participant publishes a track.
    PublishLocal {
        /// Track number.
        track: ModelTrack,
        /// Encryption flag at publish time.
        encrypted: bool,
    },

    /// Local participant unpublishes a track.
    UnpublishLocal {
        /// Track number.
        track: ModelTrack,
    },

    /// Subscribe to a remote participant's track.
    Subscribe {
        /// Publishing participant.
        participant: ModelParticipant,
        /// Track number.
        track: ModelTrack,
        /// Encryption flag at subscribe time.
        encrypted: bool,
    },

    /// Unsubscribe from a remote participant's track.
    Unsubscribe {
        /// Publishing participant.
        participant: ModelParticipant,
        /// Track number.
        track: ModelTrack,
    },

    /// Set a participant's key.
    SetKey {
        /// Participant whose key is set.
        participant: ModelParticipant,
        /// Key index, possibly outside the key ring.
        key_index: u32,
    },

    /// Announce a participant's encryption status.
    SetParticipantEnabled {
        /// Participant announced.
        participant: ModelParticipant,
        /// Announced status.
        enabled: bool,
    },

    /// Signal connection established with the room reporting `local_e2ee`.
    SignalConnected {
        /// What the room reports for the local participant.
        local_e2ee: bool,
    },
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation succeeded.
    Ok,
    /// Operation failed with an expected error.
    Error(OperationError),
}

impl OperationResult {
    /// Whether the operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Expected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// Participant unknown to the room.
    ParticipantNotFound,
    /// Key index outside the key ring.
    InvalidKeyIndex,
}

/// Identity of a model participant.
pub fn identity(participant: ModelParticipant) -> ParticipantIdentity {
    if participant == 0 {
        ParticipantIdentity::from("local")
    } else {
        ParticipantIdentity::new(format!("remote-{participant}"))
    }
}

/// SID of a local track.
pub fn local_track_sid(track: ModelTrack) -> TrackSid {
    TrackSid::new(format!("TR_L{track}"))
}

/// SID of a remote participant's track.
pub fn remote_track_sid(participant: ModelParticipant, track: ModelTrack) -> TrackSid {
    TrackSid::new(format!("TR_R{participant}_{track}"))
}
