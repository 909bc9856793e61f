//! Frame cryptor registry.
//!
//! Maps each track SID to at most one active frame cryptor. Creation happens
//! inside the registry's critical section (check, create, insert) so a
//! duplicate publish can never build a second native cryptor. Removal takes
//! the entry out before any teardown awaits, so a concurrent create for the
//! same track never observes a half-disposed entry.
//!
//! The lock is a `std::sync::Mutex` and is only ever held for map access,
//! never across an `.await`.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    error::NativeError,
    native::{CryptorDirection, FrameCryptor},
    room::{ParticipantIdentity, TrackSid},
};

/// Observable state of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptorSnapshot {
    /// Sender or receiver.
    pub direction: CryptorDirection,
    /// Identity whose keys the cryptor uses.
    pub participant: ParticipantIdentity,
    /// Key index the cryptor was tagged with.
    pub key_index: u32,
    /// Whether the cryptor was successfully enabled.
    pub enabled: bool,
}

/// A registry entry.
pub(crate) struct CryptorEntry {
    pub(crate) cryptor: Arc<dyn FrameCryptor>,
    pub(crate) snapshot: CryptorSnapshot,
    generation: u64,
}

/// Result of [`FrameCryptorRegistry::insert_with`].
pub(crate) enum Inserted {
    /// A new cryptor was created and registered.
    New {
        /// The new cryptor.
        cryptor: Arc<dyn FrameCryptor>,
        /// Identifies this entry for later [`FrameCryptorRegistry::mark_enabled`].
        generation: u64,
    },
    /// An entry already existed; nothing was created.
    Existing,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<TrackSid, CryptorEntry>,
    next_generation: u64,
}

/// Track SID to frame cryptor mapping.
///
/// # Invariants
///
/// - At most one entry per track SID
/// - The factory passed to `insert_with` runs only when no entry exists
#[derive(Default)]
pub(crate) struct FrameCryptorRegistry {
    inner: Mutex<Inner>,
}

impl FrameCryptorRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a cryptor for `track_sid` unless one exists.
    ///
    /// `create` runs under the registry lock and must not block.
    pub(crate) fn insert_with<F>(
        &self,
        track_sid: &TrackSid,
        direction: CryptorDirection,
        participant: &ParticipantIdentity,
        key_index: u32,
        create: F,
    ) -> Result<Inserted, NativeError>
    where
        F: FnOnce() -> Result<Arc<dyn FrameCryptor>, NativeError>,
    {
        let mut inner = self.lock();
        if inner.entries.contains_key(track_sid) {
            return Ok(Inserted::Existing);
        }

        let cryptor = create()?;
        let generation = inner.next_generation;
        inner.next_generation += 1;

        inner.entries.insert(
            track_sid.clone(),
            CryptorEntry {
                cryptor: cryptor.clone(),
                snapshot: CryptorSnapshot {
                    direction,
                    participant: participant.clone(),
                    key_index,
                    enabled: false,
                },
                generation,
            },
        );

        Ok(Inserted::New { cryptor, generation })
    }

    /// Mark an entry enabled, if it is still the entry `generation` refers to.
    pub(crate) fn mark_enabled(&self, track_sid: &TrackSid, generation: u64) -> bool {
        match self.lock().entries.get_mut(track_sid) {
            Some(entry) if entry.generation == generation => {
                entry.snapshot.enabled = true;
                true
            },
            _ => false,
        }
    }

    /// Take the entry for `track_sid` out of the registry.
    pub(crate) fn remove(&self, track_sid: &TrackSid) -> Option<CryptorEntry> {
        self.lock().entries.remove(track_sid)
    }

    /// Take every entry out of the registry, ordered by track SID.
    pub(crate) fn drain(&self) -> Vec<(TrackSid, CryptorEntry)> {
        let mut drained: Vec<_> = self.lock().entries.drain().collect();
        drained.sort_by(|(a, _), (b, _)| a.cmp(b));
        drained
    }

    pub(crate) fn get(&self, track_sid: &TrackSid) -> Option<CryptorSnapshot> {
        self.lock().entries.get(track_sid).map(|entry| entry.snapshot.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub(crate) fn track_sids(&self) -> Vec<TrackSid> {
        let mut sids: Vec<_> = self.lock().entries.keys().cloned().collect();
        sids.sort();
        sids
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeSet,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use proptest::prelude::*;

    use super::*;

    struct NoopCryptor;

    #[async_trait]
    impl FrameCryptor for NoopCryptor {
        async fn set_enabled(&self, _enabled: bool) -> Result<(), NativeError> {
            Ok(())
        }

        async fn set_key_index(&self, _key_index: u32) -> Result<(), NativeError> {
            Ok(())
        }

        async fn dispose(&self) -> Result<(), NativeError> {
            Ok(())
        }
    }

    fn noop() -> Result<Arc<dyn FrameCryptor>, NativeError> {
        Ok(Arc::new(NoopCryptor))
    }

    #[test]
    fn duplicate_insert_does_not_create() {
        let registry = FrameCryptorRegistry::new();
        let sid = TrackSid::from("TR_CAM1");
        let alice = ParticipantIdentity::from("alice");
        let creates = AtomicUsize::new(0);

        for _ in 0..3 {
            registry
                .insert_with(&sid, CryptorDirection::Sender, &alice, 0, || {
                    creates.fetch_add(1, Ordering::SeqCst);
                    noop()
                })
                .unwrap();
        }

        assert_eq!(creates.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn failed_create_leaves_no_entry() {
        let registry = FrameCryptorRegistry::new();
        let sid = TrackSid::from("TR_A");

        let result = registry.insert_with(
            &sid,
            CryptorDirection::Receiver,
            &ParticipantIdentity::from("bob"),
            0,
            || Err(NativeError::new("create_for_receiver", "no receiver")),
        );

        assert!(result.is_err());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn mark_enabled_ignores_replaced_entries() {
        let registry = FrameCryptorRegistry::new();
        let sid = TrackSid::from("TR_A");
        let bob = ParticipantIdentity::from("bob");

        let Inserted::New { generation: stale, .. } =
            registry.insert_with(&sid, CryptorDirection::Receiver, &bob, 1, noop).unwrap()
        else {
            panic!("expected a new entry");
        };
        registry.remove(&sid);
        let Inserted::New { generation: fresh, .. } =
            registry.insert_with(&sid, CryptorDirection::Receiver, &bob, 1, noop).unwrap()
        else {
            panic!("expected a new entry");
        };

        assert!(!registry.mark_enabled(&sid, stale));
        assert!(!registry.get(&sid).unwrap().enabled);
        assert!(registry.mark_enabled(&sid, fresh));
        assert!(registry.get(&sid).unwrap().enabled);
    }

    #[test]
    fn remove_missing_is_none() {
        let registry = FrameCryptorRegistry::new();
        assert!(registry.remove(&TrackSid::from("TR_NONE")).is_none());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u8),
        Remove(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![(0u8..6).prop_map(Op::Insert), (0u8..6).prop_map(Op::Remove)]
    }

    proptest! {
        #[test]
        fn prop_one_entry_per_track(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let registry = FrameCryptorRegistry::new();
            let alice = ParticipantIdentity::from("alice");
            let creates = AtomicUsize::new(0);
            let mut expected = BTreeSet::new();
            let mut expected_creates = 0;

            for op in &ops {
                match op {
                    Op::Insert(n) => {
                        let sid = TrackSid::from(format!("TR_{n}"));
                        registry
                            .insert_with(&sid, CryptorDirection::Sender, &alice, 0, || {
                                creates.fetch_add(1, Ordering::SeqCst);
                                noop()
                            })
                            .unwrap();
                        if expected.insert(sid) {
                            expected_creates += 1;
                        }
                    },
                    Op::Remove(n) => {
                        let sid = TrackSid::from(format!("TR_{n}"));
                        prop_assert_eq!(registry.remove(&sid).is_some(), expected.remove(&sid));
                    },
                }
                prop_assert_eq!(registry.track_sids(), expected.iter().cloned().collect::<Vec<_>>());
            }

            prop_assert_eq!(creates.load(Ordering::SeqCst), expected_creates);
            let drained: Vec<_> = registry.drain().into_iter().map(|(sid, _)| sid).collect();
            prop_assert_eq!(drained, expected.into_iter().collect::<Vec<_>>());
            prop_assert_eq!(registry.len(), 0);
        }
    }

    #[test]
    fn drain_empties_in_sid_order() {
        let registry = FrameCryptorRegistry::new();
        let alice = ParticipantIdentity::from("alice");
        for sid in ["TR_C", "TR_A", "TR_B"] {
            registry
                .insert_with(&TrackSid::from(sid), CryptorDirection::Sender, &alice, 0, noop)
                .unwrap();
        }

        let drained: Vec<_> = registry.drain().into_iter().map(|(sid, _)| sid).collect();

        assert_eq!(drained, vec![TrackSid::from("TR_A"), "TR_B".into(), "TR_C".into()]);
        assert!(registry.track_sids().is_empty());
    }
}
