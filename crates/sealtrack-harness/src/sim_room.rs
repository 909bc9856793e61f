//! Simulated room.
//!
//! Keeps a participant list and the tracks currently published or
//! subscribed, and delivers lifecycle events to every subscriber in order.
//! Media handles are allocated from one counter, so every sender and
//! receiver handle is unique within a room.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use sealtrack_core::{
    CryptorDirection, E2eeManager, LocalTrackPublication, Participant, ParticipantIdentity,
    RemoteTrackPublication, Room, RoomEvent, RtpReceiverHandle, RtpSenderHandle, TrackSid,
};
use tokio::sync::mpsc;

use crate::binding::lock;

/// A track as the room sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimTrack {
    /// Publishing participant.
    pub participant: ParticipantIdentity,
    /// Sender for local tracks, receiver for remote ones.
    pub direction: CryptorDirection,
    /// Encryption flag when the track was published or subscribed.
    pub encrypted: bool,
    /// RTP sender/receiver handle.
    pub media: u64,
}

#[derive(Debug, Default)]
struct RoomState {
    remotes: BTreeMap<ParticipantIdentity, Participant>,
    tracks: BTreeMap<TrackSid, SimTrack>,
    local_e2ee: bool,
    subscribers: Vec<mpsc::UnboundedSender<RoomEvent>>,
    next_media: u64,
    delivered: u64,
}

/// In-memory [`Room`].
#[derive(Debug)]
pub struct SimRoom {
    local: Participant,
    state: Mutex<RoomState>,
}

impl SimRoom {
    /// Room whose local participant is `identity`.
    pub fn new(identity: impl Into<ParticipantIdentity>) -> Arc<Self> {
        Arc::new(Self {
            local: Participant::local(identity),
            state: Mutex::new(RoomState { next_media: 1, ..RoomState::default() }),
        })
    }

    /// Local participant identity.
    pub fn local_identity(&self) -> &ParticipantIdentity {
        &self.local.identity
    }

    /// Add a remote participant.
    pub fn add_remote(&self, identity: impl Into<ParticipantIdentity>) {
        let participant = Participant::remote(identity);
        lock(&self.state).remotes.insert(participant.identity.clone(), participant);
    }

    /// Remove a remote participant. Their tracks stay until unsubscribed.
    pub fn remove_remote(&self, identity: &ParticipantIdentity) {
        lock(&self.state).remotes.remove(identity);
    }

    /// Set what [`Room::is_local_e2ee_enabled`] reports.
    pub fn set_local_e2ee_enabled(&self, enabled: bool) {
        lock(&self.state).local_e2ee = enabled;
    }

    /// Tracks currently published or subscribed.
    pub fn tracks(&self) -> BTreeMap<TrackSid, SimTrack> {
        lock(&self.state).tracks.clone()
    }

    /// Events delivered to at least one subscriber.
    pub fn events_delivered(&self) -> u64 {
        lock(&self.state).delivered
    }

    /// Publish a local track.
    ///
    /// Publishing a track that is already published re-delivers the original
    /// publication (same flag, same handle), like a duplicated event.
    pub fn publish_local(&self, track_sid: impl Into<TrackSid>, encrypted: bool) -> RtpSenderHandle {
        let track_sid = track_sid.into();
        let mut state = lock(&self.state);
        let track = existing_or_insert(&mut state, &track_sid, || SimTrack {
            participant: self.local.identity.clone(),
            direction: CryptorDirection::Sender,
            encrypted,
            media: 0,
        });
        let (media, encrypted) = (track.media, track.encrypted);

        let sender = RtpSenderHandle(media);
        deliver(&mut state, RoomEvent::LocalTrackPublished {
            publication: LocalTrackPublication {
                track_sid,
                is_encrypted: encrypted,
                sender: Some(sender),
            },
            participant: self.local.identity.clone(),
        });
        sender
    }

    /// Unpublish a local track. Emitted even if the track is unknown.
    pub fn unpublish_local(&self, track_sid: impl Into<TrackSid>) {
        let track_sid = track_sid.into();
        let mut state = lock(&self.state);
        state.tracks.remove(&track_sid);
        deliver(&mut state, RoomEvent::LocalTrackUnpublished {
            track_sid,
            participant: self.local.identity.clone(),
        });
    }

    /// Subscribe to a remote participant's track.
    ///
    /// Subscribing to a track that is already subscribed re-delivers the
    /// original publication.
    pub fn subscribe_remote(
        &self,
        participant: impl Into<ParticipantIdentity>,
        track_sid: impl Into<TrackSid>,
        encrypted: bool,
    ) -> RtpReceiverHandle {
        let participant = participant.into();
        let track_sid = track_sid.into();
        let mut state = lock(&self.state);
        let track = existing_or_insert(&mut state, &track_sid, || SimTrack {
            participant: participant.clone(),
            direction: CryptorDirection::Receiver,
            encrypted,
            media: 0,
        });
        let (media, encrypted, participant) = (track.media, track.encrypted, track.participant);

        let receiver = RtpReceiverHandle(media);
        deliver(&mut state, RoomEvent::TrackSubscribed {
            publication: RemoteTrackPublication {
                track_sid,
                is_encrypted: encrypted,
                receiver: Some(receiver),
            },
            participant,
        });
        receiver
    }

    /// Unsubscribe from a remote track. Emitted even if the track is unknown.
    pub fn unsubscribe_remote(
        &self,
        participant: impl Into<ParticipantIdentity>,
        track_sid: impl Into<TrackSid>,
    ) {
        let track_sid = track_sid.into();
        let mut state = lock(&self.state);
        state.tracks.remove(&track_sid);
        deliver(&mut state, RoomEvent::TrackUnsubscribed {
            track_sid,
            participant: participant.into(),
        });
    }

    /// Signal connection (re)established.
    pub fn signal_connected(&self) {
        deliver(&mut lock(&self.state), RoomEvent::SignalConnected);
    }

    /// Deliver an arbitrary event without touching room state.
    ///
    /// For duplicate deliveries and publications without media handles.
    pub fn emit(&self, event: RoomEvent) {
        deliver(&mut lock(&self.state), event);
    }
}

/// The track registered under `track_sid`, registering `new()` with a fresh
/// media handle if there is none.
fn existing_or_insert(
    state: &mut RoomState,
    track_sid: &TrackSid,
    new: impl FnOnce() -> SimTrack,
) -> SimTrack {
    if let Some(track) = state.tracks.get(track_sid) {
        return track.clone();
    }

    let mut track = new();
    track.media = state.next_media;
    state.next_media += 1;
    state.tracks.insert(track_sid.clone(), track.clone());
    track
}

fn deliver(state: &mut RoomState, event: RoomEvent) {
    state.subscribers.retain(|subscriber| !subscriber.is_closed());
    if state.subscribers.is_empty() {
        return;
    }

    state.subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
    state.delivered += 1;
}

impl Room for SimRoom {
    fn local_participant(&self) -> Participant {
        self.local.clone()
    }

    fn is_local_e2ee_enabled(&self) -> bool {
        lock(&self.state).local_e2ee
    }

    fn participant_by_identity(&self, identity: &ParticipantIdentity) -> Option<Participant> {
        if *identity == self.local.identity {
            return Some(self.local.clone());
        }
        lock(&self.state).remotes.get(identity).cloned()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<RoomEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        lock(&self.state).subscribers.push(sender);
        receiver
    }
}

/// How long [`settle`] waits before giving up.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait until `manager`'s event pump has handled every event `room`
/// delivered.
///
/// Assumes `manager` is the room's only subscriber and was bound before the
/// first event was delivered.
pub async fn settle(
    manager: &E2eeManager,
    room: &SimRoom,
) -> Result<(), tokio::time::error::Elapsed> {
    tokio::time::timeout(SETTLE_TIMEOUT, async {
        while manager.events_handled() < room.events_delivered() {
            tokio::task::yield_now().await;
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let room = SimRoom::new("me");
        let mut events = room.subscribe();

        room.publish_local("TR_A", true);
        room.unpublish_local("TR_A");

        assert!(matches!(events.recv().await, Some(RoomEvent::LocalTrackPublished { .. })));
        assert!(matches!(events.recv().await, Some(RoomEvent::LocalTrackUnpublished { .. })));
        assert_eq!(room.events_delivered(), 2);
    }

    #[test]
    fn events_without_subscribers_are_not_counted() {
        let room = SimRoom::new("me");
        room.signal_connected();
        assert_eq!(room.events_delivered(), 0);
    }

    #[test]
    fn media_handles_are_unique() {
        let room = SimRoom::new("me");
        let sender = room.publish_local("TR_A", true);
        let receiver = room.subscribe_remote("bob", "TR_B", true);
        assert_ne!(sender.0, receiver.0);
    }

    #[test]
    fn republish_keeps_original_publication() {
        let room = SimRoom::new("me");
        let first = room.publish_local("TR_A", true);
        let second = room.publish_local("TR_A", false);

        assert_eq!(first, second);
        assert!(room.tracks()[&TrackSid::from("TR_A")].encrypted);
    }

    #[test]
    fn resolves_local_and_remote() {
        let room = SimRoom::new("me");
        room.add_remote("bob");

        assert!(room.participant_by_identity(&"me".into()).unwrap().is_local());
        assert!(room.participant_by_identity(&"bob".into()).is_some());
        assert!(room.participant_by_identity(&"carol".into()).is_none());
    }
}
