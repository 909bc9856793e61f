//! Model world.
//!
//! The reference implementation of track lifecycle, key index tagging, and
//! local encryption status, against which the real manager is compared.
//! Keys are per participant.

use std::collections::{BTreeMap, HashMap};

use sealtrack_core::{CryptorDirection, ParticipantIdentity, TrackSid};

use super::operation::{
    ModelParticipant, Operation, OperationError, OperationResult, identity, local_track_sid,
    remote_track_sid,
};

/// A cryptor as the model expects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCryptor {
    /// Sender or receiver.
    pub direction: CryptorDirection,
    /// Identity whose keys it uses.
    pub participant: ParticipantIdentity,
    /// Key index it was tagged with.
    pub key_index: u32,
}

/// Observable state for comparison with the real manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Attached cryptors by track SID.
    pub cryptors: BTreeMap<TrackSid, ModelCryptor>,
    /// Local encryption flag.
    pub local_enabled: bool,
}

#[derive(Debug, Clone)]
struct ModelTrackState {
    cryptor: Option<ModelCryptor>,
}

/// Reference model.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    remotes: u8,
    keyring_size: u32,
    tracks: BTreeMap<TrackSid, ModelTrackState>,
    latest_key_index: HashMap<ParticipantIdentity, u32>,
    local_enabled: bool,
}

impl ModelWorld {
    /// Model with `remotes` remote participants and a key ring of
    /// `keyring_size` slots.
    pub fn new(remotes: u8, keyring_size: u32) -> Self {
        Self {
            remotes,
            keyring_size,
            tracks: BTreeMap::new(),
            latest_key_index: HashMap::new(),
            local_enabled: false,
        }
    }

    /// Number of remote participants.
    pub fn remotes(&self) -> u8 {
        self.remotes
    }

    /// Apply an operation.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        match op {
            Operation::PublishLocal { track, encrypted } => {
                self.open_track(local_track_sid(*track), 0, CryptorDirection::Sender, *encrypted);
                OperationResult::Ok
            },
            Operation::UnpublishLocal { track } => {
                self.tracks.remove(&local_track_sid(*track));
                OperationResult::Ok
            },
            Operation::Subscribe { participant, track, encrypted } => {
                let sid = remote_track_sid(*participant, *track);
                self.open_track(sid, *participant, CryptorDirection::Receiver, *encrypted);
                OperationResult::Ok
            },
            Operation::Unsubscribe { participant, track } => {
                self.tracks.remove(&remote_track_sid(*participant, *track));
                OperationResult::Ok
            },
            Operation::SetKey { participant, key_index } => {
                if *key_index >= self.keyring_size {
                    return OperationResult::Error(OperationError::InvalidKeyIndex);
                }
                self.latest_key_index.insert(identity(*participant), *key_index);
                OperationResult::Ok
            },
            Operation::SetParticipantEnabled { participant, enabled } => {
                if *participant == 0 {
                    self.local_enabled = *enabled;
                    OperationResult::Ok
                } else if *participant <= self.remotes {
                    OperationResult::Ok
                } else {
                    OperationResult::Error(OperationError::ParticipantNotFound)
                }
            },
            Operation::SignalConnected { local_e2ee } => {
                self.local_enabled = *local_e2ee;
                OperationResult::Ok
            },
        }
    }

    /// Current observable state.
    pub fn observable_state(&self) -> ObservableState {
        let cryptors = self
            .tracks
            .iter()
            .filter_map(|(sid, track)| track.cryptor.clone().map(|cryptor| (sid.clone(), cryptor)))
            .collect();
        ObservableState { cryptors, local_enabled: self.local_enabled }
    }

    /// A repeated publish/subscribe is a duplicate delivery: the first one
    /// decided whether the track has a cryptor.
    fn open_track(
        &mut self,
        sid: TrackSid,
        participant: ModelParticipant,
        direction: CryptorDirection,
        encrypted: bool,
    ) {
        if self.tracks.contains_key(&sid) {
            return;
        }

        let participant = identity(participant);
        let cryptor = encrypted.then(|| ModelCryptor {
            direction,
            key_index: self.latest_key_index.get(&participant).copied().unwrap_or(0),
            participant,
        });
        self.tracks.insert(sid, ModelTrackState { cryptor });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unencrypted_publish_has_no_cryptor() {
        let mut model = ModelWorld::new(1, 16);
        model.apply(&Operation::PublishLocal { track: 0, encrypted: false });
        model.apply(&Operation::PublishLocal { track: 0, encrypted: true });

        assert!(model.observable_state().cryptors.is_empty());
    }

    #[test]
    fn cryptor_tagged_with_latest_index() {
        let mut model = ModelWorld::new(1, 16);
        model.apply(&Operation::SetKey { participant: 1, key_index: 3 });
        model.apply(&Operation::Subscribe { participant: 1, track: 0, encrypted: true });

        let state = model.observable_state();
        assert_eq!(state.cryptors[&remote_track_sid(1, 0)].key_index, 3);
    }

    #[test]
    fn unknown_participant_rejected() {
        let mut model = ModelWorld::new(1, 16);
        let result = model.apply(&Operation::SetParticipantEnabled { participant: 2, enabled: true });
        assert_eq!(result, OperationResult::Error(OperationError::ParticipantNotFound));
        assert!(!model.observable_state().local_enabled);
    }
}
