//! E2EE manager.
//!
//! The manager is the only component that listens to room events. It attaches
//! a frame cryptor to every encrypted track as it is published or subscribed,
//! tears it down when the track goes away, announces participant encryption
//! status, and encrypts data-channel payloads through a lazily constructed
//! data-packet cryptor.
//!
//! # Event processing
//!
//! [`E2eeManager::setup`] spawns an event pump that feeds room events into
//! [`E2eeManager::handle_room_event`] one at a time, in delivery order. Each
//! event's native calls complete before the next event is looked at, so a
//! track's create and destroy never interleave. Lifecycle failures have no
//! caller to return to and are broadcast as [`E2eeEvent::EncryptionError`].
//!
//! The pump holds a weak reference: dropping every manager handle stops it.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, Weak,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use tokio::{
    runtime::Handle,
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    data_cryptor::DataCryptorCell,
    error::{E2eeError, NativeError},
    event::E2eeEvent,
    key_provider::KeyProvider,
    native::{
        CryptorDirection, DataPacketCryptor, EncryptedPacket, FrameCryptor, FrameCryptorAlgorithm,
        NativeBinding, NativeKeyProvider,
    },
    options::E2eeOptions,
    registry::{CryptorEntry, CryptorSnapshot, FrameCryptorRegistry, Inserted},
    room::{
        LocalTrackPublication, ParticipantIdentity, RemoteTrackPublication, Room, RoomEvent,
        TrackSid,
    },
};

/// Capacity of the notification channel.
const EVENT_CAPACITY: usize = 256;

/// The room the manager is currently bound to.
struct RoomBinding {
    room: Arc<dyn Room>,
    /// Dropping this stops the pump after its in-flight event.
    stop: oneshot::Sender<()>,
    pump: JoinHandle<()>,
    /// Events of this room handled by the pump.
    handled: Arc<AtomicU64>,
}

struct Shared {
    key_provider: Arc<KeyProvider>,
    binding: Arc<dyn NativeBinding>,
    algorithm: FrameCryptorAlgorithm,
    registry: FrameCryptorRegistry,
    data_cryptor: DataCryptorCell,
    encryption_enabled: AtomicBool,
    data_channel_encryption: AtomicBool,
    room: Mutex<Option<RoomBinding>>,
    events: broadcast::Sender<E2eeEvent>,
}

/// Orchestrates frame cryptors, key state, and data-channel encryption for
/// one room binding at a time.
///
/// Cheap to clone; all clones share state.
///
/// # Invariants
///
/// - At most one frame cryptor per track SID
/// - A cryptor exists only for tracks that were encrypted when published or
///   subscribed
/// - A removed cryptor is disabled before it is disposed
/// - `is_enabled` changes only through the local participant
#[derive(Clone)]
pub struct E2eeManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for E2eeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("E2eeManager")
            .field("enabled", &self.is_enabled())
            .field("room_bound", &self.room_bound())
            .field("frame_cryptors", &self.frame_cryptor_count())
            .finish_non_exhaustive()
    }
}

impl E2eeManager {
    /// Create a manager over `key_provider`, using `binding` to build native
    /// cryptors.
    pub fn new(
        key_provider: Arc<KeyProvider>,
        binding: Arc<dyn NativeBinding>,
        data_channel_encryption: bool,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                key_provider,
                binding,
                algorithm: FrameCryptorAlgorithm::default(),
                registry: FrameCryptorRegistry::new(),
                data_cryptor: DataCryptorCell::new(),
                encryption_enabled: AtomicBool::new(false),
                data_channel_encryption: AtomicBool::new(data_channel_encryption),
                room: Mutex::new(None),
                events,
            }),
        }
    }

    /// Build the key provider and the manager from one set of options.
    ///
    /// A configured shared key is applied at index 0. Failing to apply it is
    /// logged and does not prevent construction.
    pub async fn from_options(
        options: E2eeOptions,
        binding: Arc<dyn NativeBinding>,
    ) -> Result<Self, E2eeError> {
        let key_provider = Arc::new(KeyProvider::new(options.key_provider, binding.as_ref())?);

        if let Some(shared_key) = &options.shared_key
            && let Err(e) = key_provider.set_shared_key(shared_key, None).await
        {
            tracing::warn!(error = %e, "Failed to apply shared key");
        }

        Ok(Self::new(key_provider, binding, options.data_channel_encryption))
    }

    /// The key provider this manager encrypts with.
    pub fn key_provider(&self) -> &Arc<KeyProvider> {
        &self.shared.key_provider
    }

    /// Subscribe to manager notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<E2eeEvent> {
        self.shared.events.subscribe()
    }

    /// Bind to `room` and start processing its events.
    ///
    /// Binding the room that is already bound is a no-op. Binding a different
    /// room stops the previous event pump; the new pump first tears down every
    /// cryptor of the previous binding, then processes the new room's events.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn setup(&self, room: Arc<dyn Room>) -> Result<(), E2eeError> {
        let runtime = Handle::try_current()
            .map_err(|_| E2eeError::Configuration("setup requires a Tokio runtime"))?;

        let mut current = self.room_slot();
        if current.as_ref().is_some_and(|bound| Arc::ptr_eq(&bound.room, &room)) {
            tracing::debug!("Room already bound");
            return Ok(());
        }

        let previous = current.take().map(|bound| {
            tracing::debug!("Rebinding to a new room");
            drop(bound.stop);
            bound.pump
        });

        let events = room.subscribe();
        let (stop, stopped) = oneshot::channel();
        let handled = Arc::new(AtomicU64::new(0));
        let pump = runtime.spawn(run_pump(
            Arc::downgrade(&self.shared),
            events,
            stopped,
            previous,
            handled.clone(),
        ));

        *current = Some(RoomBinding { room, stop, pump, handled });
        tracing::debug!("Room bound");
        Ok(())
    }

    /// Whether a room is bound.
    pub fn room_bound(&self) -> bool {
        self.room_slot().is_some()
    }

    /// Number of events from the bound room that the event pump has finished
    /// handling. Zero when no room is bound.
    pub fn events_handled(&self) -> u64 {
        self.room_slot().as_ref().map_or(0, |bound| bound.handled.load(Ordering::Acquire))
    }

    /// Unbind the room and detach every frame cryptor.
    ///
    /// Waits for the event pump to finish its in-flight event, then disables
    /// and disposes all cryptors and resets the local encryption flag.
    pub async fn cleanup(&self) {
        let bound = self.room_slot().take();
        if let Some(bound) = bound {
            drop(bound.stop);
            // A JoinError here means the pump panicked; nothing left to stop
            let _ = bound.pump.await;
        }

        self.detach_all().await;
        self.shared.encryption_enabled.store(false, Ordering::Release);
        tracing::debug!("E2EE manager cleaned up");
    }

    /// Whether the local participant has encryption enabled.
    pub fn is_enabled(&self) -> bool {
        self.shared.encryption_enabled.load(Ordering::Acquire)
    }

    /// Whether data-channel payloads should be encrypted: encryption is
    /// enabled and the data-channel toggle is on.
    pub fn is_data_channel_encryption_enabled(&self) -> bool {
        self.is_enabled() && self.shared.data_channel_encryption.load(Ordering::Acquire)
    }

    /// Set the data-channel encryption toggle. Applies to subsequent calls.
    pub fn set_data_channel_encryption_enabled(&self, enabled: bool) {
        self.shared.data_channel_encryption.store(enabled, Ordering::Release);
    }

    /// Whether the data-packet cryptor has been constructed.
    pub fn is_data_cryptor_ready(&self) -> bool {
        self.shared.data_cryptor.get().is_some()
    }

    /// Snapshot of the frame cryptor attached to `track_sid`.
    pub fn frame_cryptor(&self, track_sid: &TrackSid) -> Option<CryptorSnapshot> {
        self.shared.registry.get(track_sid)
    }

    /// Number of attached frame cryptors.
    pub fn frame_cryptor_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Track SIDs with an attached frame cryptor, sorted.
    pub fn frame_cryptor_tracks(&self) -> Vec<TrackSid> {
        self.shared.registry.track_sids()
    }

    /// Announce a participant's encryption status.
    ///
    /// For the local participant this updates [`E2eeManager::is_enabled`] and
    /// notifies only if the flag changed. For any other identity the
    /// participant is resolved against the room and a notification is emitted
    /// on every call; manager state is not touched.
    ///
    /// Identity matching is exact string equality.
    pub fn set_participant_cryptor_enabled(
        &self,
        enabled: bool,
        identity: &ParticipantIdentity,
    ) -> Result<(), E2eeError> {
        let room = self.room().ok_or(E2eeError::Configuration("no room bound"))?;
        let local = room.local_participant();

        if local.identity == *identity {
            let changed = self
                .shared
                .encryption_enabled
                .compare_exchange(!enabled, enabled, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();

            if changed {
                tracing::debug!(participant = %identity, enabled, "Local encryption status changed");
                self.emit(E2eeEvent::ParticipantEncryptionStatusChanged {
                    enabled,
                    participant: local,
                });
            }
            return Ok(());
        }

        let participant = room
            .participant_by_identity(identity)
            .ok_or_else(|| E2eeError::ParticipantNotFound { identity: identity.clone() })?;

        tracing::debug!(participant = %identity, enabled, "Remote encryption status announced");
        self.emit(E2eeEvent::ParticipantEncryptionStatusChanged { enabled, participant });
        Ok(())
    }

    /// Encrypt a data-channel payload as the local participant, using the
    /// latest key index set for the local identity.
    pub async fn encrypt_data(&self, data: &[u8]) -> Result<EncryptedPacket, E2eeError> {
        let room = self.room().ok_or(E2eeError::Configuration("encrypt_data requires a bound room"))?;
        let identity = room.local_participant().identity;
        let key_index = self.shared.key_provider.latest_key_index(&identity);

        let cryptor = self.data_cryptor().await?;
        let packet = cryptor.encrypt(&identity, key_index, data).await?;
        packet.ok_or(E2eeError::CryptoOperationFailed { operation: "encrypt", identity, key_index })
    }

    /// Decrypt a data-channel payload sent by `identity`.
    pub async fn handle_encrypted_data(
        &self,
        payload: &[u8],
        iv: &[u8],
        identity: &ParticipantIdentity,
        key_index: u32,
    ) -> Result<Vec<u8>, E2eeError> {
        let packet = EncryptedPacket { payload: payload.to_vec(), iv: iv.to_vec(), key_index };

        let cryptor = self.data_cryptor().await?;
        cryptor.decrypt(identity, &packet).await?.ok_or_else(|| {
            E2eeError::CryptoOperationFailed {
                operation: "decrypt",
                identity: identity.clone(),
                key_index,
            }
        })
    }

    /// Configure the SIF trailer on the key provider.
    pub async fn set_sif_trailer(&self, trailer: &[u8]) -> Result<(), E2eeError> {
        self.shared.key_provider.set_sif_trailer(trailer).await
    }

    /// Apply one room event.
    ///
    /// The event pump started by [`E2eeManager::setup`] calls this for every
    /// event of the bound room. A direct call applies an event on top of that
    /// stream; a `SignalConnected` without a bound room fails with
    /// [`E2eeError::Configuration`]. Failures are broadcast as
    /// [`E2eeEvent::EncryptionError`] and also returned.
    pub async fn handle_room_event(&self, event: RoomEvent) -> Result<(), E2eeError> {
        let track_sid = event.track_sid().cloned();

        let result = match event {
            RoomEvent::LocalTrackPublished { publication, participant } => {
                self.attach_sender(&publication, &participant).await
            },
            RoomEvent::TrackSubscribed { publication, participant } => {
                self.attach_receiver(&publication, &participant).await
            },
            RoomEvent::LocalTrackUnpublished { track_sid, .. }
            | RoomEvent::TrackUnsubscribed { track_sid, .. } => self.detach(&track_sid).await,
            RoomEvent::SignalConnected => self.reassert_local_status(),
        };

        if let Err(error) = &result {
            tracing::error!(track_sid = ?track_sid, error = %error, "Room event handling failed");
            self.emit(E2eeEvent::EncryptionError { track_sid, error: error.clone() });
        }
        result
    }

    async fn attach_sender(
        &self,
        publication: &LocalTrackPublication,
        participant: &ParticipantIdentity,
    ) -> Result<(), E2eeError> {
        if !publication.is_encrypted {
            tracing::debug!(track_sid = %publication.track_sid, "Local track not encrypted");
            return Ok(());
        }
        let sender = publication.sender.ok_or_else(|| E2eeError::MissingMediaHandle {
            track_sid: publication.track_sid.clone(),
        })?;

        let binding = &self.shared.binding;
        let algorithm = self.shared.algorithm;
        self.attach(&publication.track_sid, CryptorDirection::Sender, participant, |native| {
            binding.create_for_sender(participant, sender, algorithm, native)
        })
        .await
    }

    async fn attach_receiver(
        &self,
        publication: &RemoteTrackPublication,
        participant: &ParticipantIdentity,
    ) -> Result<(), E2eeError> {
        if !publication.is_encrypted {
            tracing::debug!(track_sid = %publication.track_sid, "Remote track not encrypted");
            return Ok(());
        }
        let receiver = publication.receiver.ok_or_else(|| E2eeError::MissingMediaHandle {
            track_sid: publication.track_sid.clone(),
        })?;

        let binding = &self.shared.binding;
        let algorithm = self.shared.algorithm;
        self.attach(&publication.track_sid, CryptorDirection::Receiver, participant, |native| {
            binding.create_for_receiver(participant, receiver, algorithm, native)
        })
        .await
    }

    /// Check, create, and insert under the registry lock; then enable and tag.
    async fn attach<F>(
        &self,
        track_sid: &TrackSid,
        direction: CryptorDirection,
        participant: &ParticipantIdentity,
        create: F,
    ) -> Result<(), E2eeError>
    where
        F: FnOnce(&Arc<dyn NativeKeyProvider>) -> Result<Arc<dyn FrameCryptor>, NativeError>,
    {
        let native = self.shared.key_provider.native()?;
        let key_index = self.shared.key_provider.latest_key_index(participant);

        let inserted =
            self.shared.registry.insert_with(track_sid, direction, participant, key_index, || {
                create(native)
            })?;

        let (cryptor, generation) = match inserted {
            Inserted::New { cryptor, generation } => (cryptor, generation),
            Inserted::Existing => {
                tracing::debug!(track_sid = %track_sid, "Cryptor already attached");
                return Ok(());
            },
        };

        cryptor.set_enabled(true).await?;
        cryptor.set_key_index(key_index).await?;

        if self.shared.registry.mark_enabled(track_sid, generation) {
            tracing::debug!(
                track_sid = %track_sid,
                participant = %participant,
                ?direction,
                key_index,
                "Frame cryptor attached"
            );
            self.emit(E2eeEvent::CryptorAttached {
                track_sid: track_sid.clone(),
                participant: participant.clone(),
                direction,
                key_index,
            });
        }
        Ok(())
    }

    /// Remove and tear down the cryptor for `track_sid`, if any.
    async fn detach(&self, track_sid: &TrackSid) -> Result<(), E2eeError> {
        let Some(entry) = self.shared.registry.remove(track_sid) else {
            tracing::debug!(track_sid = %track_sid, "No cryptor to detach");
            return Ok(());
        };
        self.teardown(track_sid, entry).await
    }

    /// Disable then dispose a cryptor that is no longer in the registry.
    ///
    /// Dispose runs even if disable failed. The first failure is returned as
    /// a soft [`E2eeError::Disposal`]; the entry is not restored.
    async fn teardown(&self, track_sid: &TrackSid, entry: CryptorEntry) -> Result<(), E2eeError> {
        let disabled = entry.cryptor.set_enabled(false).await;
        let disposed = entry.cryptor.dispose().await;

        tracing::debug!(track_sid = %track_sid, "Frame cryptor detached");
        self.emit(E2eeEvent::CryptorDetached { track_sid: track_sid.clone() });

        match disabled.and(disposed) {
            Ok(()) => Ok(()),
            Err(source) => {
                tracing::warn!(track_sid = %track_sid, error = %source, "Frame cryptor teardown failed");
                Err(E2eeError::Disposal { track_sid: track_sid.clone(), source })
            },
        }
    }

    /// Tear down every registered cryptor, reporting failures on the
    /// notification channel.
    async fn detach_all(&self) {
        for (track_sid, entry) in self.shared.registry.drain() {
            if let Err(error) = self.teardown(&track_sid, entry).await {
                self.emit(E2eeEvent::EncryptionError { track_sid: Some(track_sid), error });
            }
        }
    }

    fn reassert_local_status(&self) -> Result<(), E2eeError> {
        let room = self.room().ok_or(E2eeError::Configuration("no room bound"))?;
        let local = room.local_participant();
        self.set_participant_cryptor_enabled(room.is_local_e2ee_enabled(), &local.identity)
    }

    async fn data_cryptor(&self) -> Result<Arc<dyn DataPacketCryptor>, E2eeError> {
        let native = self.shared.key_provider.native()?.clone();
        let binding = &self.shared.binding;
        let algorithm = self.shared.algorithm;

        let cryptor = self
            .shared
            .data_cryptor
            .get_or_create(|| binding.create_data_packet_cryptor(algorithm, native))
            .await?;
        Ok(cryptor)
    }

    fn emit(&self, event: E2eeEvent) {
        // No receivers is fine
        let _ = self.shared.events.send(event);
    }

    fn room(&self) -> Option<Arc<dyn Room>> {
        self.room_slot().as_ref().map(|bound| bound.room.clone())
    }

    fn room_slot(&self) -> MutexGuard<'_, Option<RoomBinding>> {
        self.shared.room.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drive one room subscription.
///
/// When rebinding, waits for the previous pump to finish and tears down the
/// cryptors of the previous binding before looking at any new event.
async fn run_pump(
    shared: Weak<Shared>,
    mut events: mpsc::UnboundedReceiver<RoomEvent>,
    mut stopped: oneshot::Receiver<()>,
    previous: Option<JoinHandle<()>>,
    handled: Arc<AtomicU64>,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
        let Some(shared) = shared.upgrade() else { return };
        E2eeManager { shared }.detach_all().await;
    }

    loop {
        let event = tokio::select! {
            biased;
            _ = &mut stopped => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            tracing::debug!("Room event stream closed");
            break;
        };
        let Some(shared) = shared.upgrade() else { break };

        // Failures are already broadcast
        let _ = E2eeManager { shared }.handle_room_event(event).await;
        handled.fetch_add(1, Ordering::AcqRel);
    }
}
