//! Manager notifications.

use crate::{
    error::E2eeError,
    native::CryptorDirection,
    room::{Participant, ParticipantIdentity, TrackSid},
};

/// Notifications broadcast by the [`E2eeManager`](crate::E2eeManager).
///
/// Delivered on a broadcast channel; slow subscribers may observe
/// `RecvError::Lagged` and miss events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum E2eeEvent {
    /// A participant's encryption status was announced.
    ///
    /// For the local participant this is emitted only when the manager's
    /// flag changes. For remote participants it is emitted on every call.
    ParticipantEncryptionStatusChanged {
        /// Announced status.
        enabled: bool,
        /// Participant the status applies to.
        participant: Participant,
    },

    /// A frame cryptor was attached, enabled, and tagged with a key index.
    CryptorAttached {
        /// Track the cryptor is bound to.
        track_sid: TrackSid,
        /// Identity whose keys the cryptor uses.
        participant: ParticipantIdentity,
        /// Sender or receiver.
        direction: CryptorDirection,
        /// Key index the cryptor was tagged with.
        key_index: u32,
    },

    /// A frame cryptor was removed from the registry and torn down.
    ///
    /// Emitted even when native teardown failed; the failure is reported
    /// separately as [`E2eeEvent::EncryptionError`].
    CryptorDetached {
        /// Track the cryptor was bound to.
        track_sid: TrackSid,
    },

    /// A lifecycle operation triggered by a room event failed.
    EncryptionError {
        /// Track the failure concerns, if any.
        track_sid: Option<TrackSid>,
        /// What went wrong.
        error: E2eeError,
    },
}
