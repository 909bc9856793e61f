//! Room boundary.
//!
//! The E2EE manager does not own transport, signaling, or participant
//! bookkeeping. It consumes a [`Room`] that reports track lifecycle through
//! an ordered event channel and resolves participants by identity.

use std::fmt;

use tokio::sync::mpsc;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Create from any string.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow as `&str`.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id! {
    /// Participant identity. Compared byte-for-byte, no normalization.
    ParticipantIdentity
}

string_id! {
    /// Track SID, stable for the lifetime of a published/subscribed track.
    TrackSid
}

/// Opaque handle to a native RTP sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RtpSenderHandle(pub u64);

/// Opaque handle to a native RTP receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RtpReceiverHandle(pub u64);

/// Whether a participant is this client or a remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantKind {
    /// This client.
    Local,
    /// Remote peer.
    Remote,
}

/// A participant as resolved by the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Stable identity.
    pub identity: ParticipantIdentity,
    /// Local or remote.
    pub kind: ParticipantKind,
}

impl Participant {
    /// The local participant.
    pub fn local(identity: impl Into<ParticipantIdentity>) -> Self {
        Self { identity: identity.into(), kind: ParticipantKind::Local }
    }

    /// A remote participant.
    pub fn remote(identity: impl Into<ParticipantIdentity>) -> Self {
        Self { identity: identity.into(), kind: ParticipantKind::Remote }
    }

    /// Whether this is the local participant.
    pub fn is_local(&self) -> bool {
        self.kind == ParticipantKind::Local
    }
}

/// A track published by the local participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrackPublication {
    /// Track SID.
    pub track_sid: TrackSid,
    /// Encryption flag at publish time.
    pub is_encrypted: bool,
    /// Native sender, if a track is attached.
    pub sender: Option<RtpSenderHandle>,
}

/// A remote track this client subscribed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackPublication {
    /// Track SID.
    pub track_sid: TrackSid,
    /// Encryption flag at subscribe time.
    pub is_encrypted: bool,
    /// Native receiver, if a track is attached.
    pub receiver: Option<RtpReceiverHandle>,
}

/// Track lifecycle and connection events delivered by a [`Room`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// Local participant published a track.
    LocalTrackPublished {
        /// The publication.
        publication: LocalTrackPublication,
        /// Local participant identity.
        participant: ParticipantIdentity,
    },

    /// Local participant unpublished a track.
    LocalTrackUnpublished {
        /// Track that was unpublished.
        track_sid: TrackSid,
        /// Local participant identity.
        participant: ParticipantIdentity,
    },

    /// Subscribed to a remote track.
    TrackSubscribed {
        /// The publication.
        publication: RemoteTrackPublication,
        /// Publishing participant.
        participant: ParticipantIdentity,
    },

    /// Unsubscribed from a remote track.
    TrackUnsubscribed {
        /// Track that was unsubscribed.
        track_sid: TrackSid,
        /// Publishing participant.
        participant: ParticipantIdentity,
    },

    /// Signaling connection established (initial connect or reconnect).
    SignalConnected,
}

impl RoomEvent {
    /// Track SID this event concerns, if any.
    pub fn track_sid(&self) -> Option<&TrackSid> {
        match self {
            Self::LocalTrackPublished { publication, .. } => Some(&publication.track_sid),
            Self::TrackSubscribed { publication, .. } => Some(&publication.track_sid),
            Self::LocalTrackUnpublished { track_sid, .. }
            | Self::TrackUnsubscribed { track_sid, .. } => Some(track_sid),
            Self::SignalConnected => None,
        }
    }
}

/// The external room the manager is bound to.
///
/// Implementations MUST deliver events on each subscription in the order
/// they occurred.
pub trait Room: Send + Sync {
    /// The local participant.
    fn local_participant(&self) -> Participant;

    /// Whether the local participant currently has E2EE enabled.
    fn is_local_e2ee_enabled(&self) -> bool;

    /// Resolve a participant (local or remote) by identity.
    fn participant_by_identity(&self, identity: &ParticipantIdentity) -> Option<Participant>;

    /// Open a new ordered event subscription.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<RoomEvent>;
}
