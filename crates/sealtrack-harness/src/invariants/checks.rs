//! Standard cryptor checks.

use std::collections::{BTreeMap, HashSet};

use super::{Invariant, Subject, SystemSnapshot, Violation};
use crate::binding::NativeCall;

/// At most one live native cryptor per RTP sender/receiver.
///
/// Two live cryptors on one media handle means a duplicate publish or
/// subscribe built a second cryptor.
pub struct SingleCryptorPerTrack;

impl Invariant for SingleCryptorPerTrack {
    fn name(&self) -> &'static str {
        "single_cryptor_per_track"
    }

    fn check(&self, state: &SystemSnapshot) -> Vec<Violation> {
        let mut per_media: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        for record in state.live_native() {
            per_media.entry(record.media).or_default().push(record.id);
        }

        per_media
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(media, ids)| {
                self.violation(Subject::Media(media), format!("live cryptors {ids:?}"))
            })
            .collect()
    }
}

/// Every live native cryptor belongs to a registry entry's track.
///
/// A live cryptor nobody owns was removed from the registry but never
/// disposed.
pub struct NoLeakedCryptors;

impl Invariant for NoLeakedCryptors {
    fn name(&self) -> &'static str {
        "no_leaked_cryptors"
    }

    fn check(&self, state: &SystemSnapshot) -> Vec<Violation> {
        let owned: HashSet<u64> = state
            .registry
            .keys()
            .filter_map(|sid| state.tracks.get(sid))
            .map(|track| track.media)
            .collect();

        state
            .live_native()
            .filter(|record| !owned.contains(&record.media))
            .map(|record| {
                self.violation(
                    Subject::NativeCryptor(record.id),
                    format!("live on media {} with no registry entry", record.media),
                )
            })
            .collect()
    }
}

/// A cryptor is disabled before it is disposed.
pub struct DisableBeforeDispose;

impl Invariant for DisableBeforeDispose {
    fn name(&self) -> &'static str {
        "disable_before_dispose"
    }

    fn check(&self, state: &SystemSnapshot) -> Vec<Violation> {
        let mut disabled = HashSet::new();
        let mut violations = Vec::new();

        for call in &state.calls {
            match call {
                NativeCall::SetEnabled { cryptor, enabled: false } => {
                    disabled.insert(*cryptor);
                },
                NativeCall::DisposeFrameCryptor { cryptor } if !disabled.contains(cryptor) => {
                    violations.push(self.violation(
                        Subject::NativeCryptor(*cryptor),
                        "disposed while still enabled".to_string(),
                    ));
                },
                _ => {},
            }
        }
        violations
    }
}

/// Registry entries exist only for encrypted tracks the room still has, and
/// match the track's participant and direction.
pub struct EncryptedTracksOnly;

impl Invariant for EncryptedTracksOnly {
    fn name(&self) -> &'static str {
        "encrypted_tracks_only"
    }

    fn check(&self, state: &SystemSnapshot) -> Vec<Violation> {
        let mut violations = Vec::new();

        for (sid, entry) in &state.registry {
            let subject = || Subject::Track(sid.clone());
            let Some(track) = state.tracks.get(sid) else {
                violations.push(self.violation(subject(), "room no longer has it".to_string()));
                continue;
            };

            if !track.encrypted {
                violations.push(self.violation(subject(), "track is not encrypted".to_string()));
            }
            if track.direction != entry.direction || track.participant != entry.participant {
                violations.push(self.violation(
                    subject(),
                    format!(
                        "entry is {:?}/{}, track is {:?}/{}",
                        entry.direction, entry.participant, track.direction, track.participant
                    ),
                ));
            }
        }
        violations
    }
}

/// Every registry entry's native cryptor is enabled and tagged with the
/// entry's key index.
pub struct AttachedCryptorsEnabled;

impl Invariant for AttachedCryptorsEnabled {
    fn name(&self) -> &'static str {
        "attached_cryptors_enabled"
    }

    fn check(&self, state: &SystemSnapshot) -> Vec<Violation> {
        let mut violations = Vec::new();

        // Entries without a room track are reported by EncryptedTracksOnly
        for (sid, entry, track) in state
            .registry
            .iter()
            .filter_map(|(sid, entry)| state.tracks.get(sid).map(|track| (sid, entry, track)))
        {
            let subject = Subject::Track(sid.clone());
            let Some(native) = state.live_native().find(|record| record.media == track.media)
            else {
                violations.push(self.violation(subject, "no live native cryptor".to_string()));
                continue;
            };

            if !entry.enabled || !native.enabled || native.key_index != entry.key_index {
                violations.push(self.violation(
                    subject,
                    format!(
                        "entry enabled={} key_index={}, native enabled={} key_index={}",
                        entry.enabled, entry.key_index, native.enabled, native.key_index
                    ),
                ));
            }
        }
        violations
    }
}
