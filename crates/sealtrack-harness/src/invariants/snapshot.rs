//! Observable state snapshots for invariant checking.
//!
//! Invariants operate on snapshots rather than live state so that one check
//! sees the manager, the native binding, and the room at the same moment.

use std::collections::BTreeMap;

use sealtrack_core::{CryptorSnapshot, E2eeManager, TrackSid};

use crate::{
    binding::{NativeCall, NativeCryptorRecord, SoftwareBinding},
    sim_room::{SimRoom, SimTrack},
};

/// Snapshot of manager, binding, and room state.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Manager registry, by track SID.
    pub registry: BTreeMap<TrackSid, CryptorSnapshot>,
    /// Every native frame cryptor ever created.
    pub native: Vec<NativeCryptorRecord>,
    /// Native call log.
    pub calls: Vec<NativeCall>,
    /// Tracks the room considers published or subscribed.
    pub tracks: BTreeMap<TrackSid, SimTrack>,
}

impl SystemSnapshot {
    /// Empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Capture the current state.
    ///
    /// Take this only after the manager has settled; events still in flight
    /// show up as a room/registry mismatch.
    pub fn capture(manager: &E2eeManager, binding: &SoftwareBinding, room: &SimRoom) -> Self {
        let registry = manager
            .frame_cryptor_tracks()
            .into_iter()
            .filter_map(|sid| manager.frame_cryptor(&sid).map(|snapshot| (sid, snapshot)))
            .collect();

        Self {
            registry,
            native: binding.frame_cryptor_records(),
            calls: binding.calls(),
            tracks: room.tracks(),
        }
    }

    /// Native cryptors not yet disposed.
    pub fn live_native(&self) -> impl Iterator<Item = &NativeCryptorRecord> {
        self.native.iter().filter(|record| !record.disposed)
    }
}
