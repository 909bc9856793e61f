//! Two-party loopback session.
//!
//! Alice publishes one encrypted track and Bob subscribes to it. Every
//! message is one media frame through the attached cryptors and one
//! data-channel packet through the managers. Alice periodically ratchets her
//! key; Bob has to recover within the ratchet window.

use std::sync::Arc;

use sealtrack_core::{
    E2eeError, E2eeManager, E2eeOptions, KeyProviderOptions, ParticipantIdentity,
};
use sealtrack_harness::{SimRoom, SoftwareBinding, settle};
use thiserror::Error;

const ALICE: &str = "alice";
const BOB: &str = "bob";
const TRACK: &str = "TR_ALICE_CAM";

/// Loopback failures that abort the session.
#[derive(Error, Debug)]
pub enum SimError {
    /// Manager or key provider call failed.
    #[error(transparent)]
    E2ee(#[from] E2eeError),

    /// An event pump did not catch up with its room.
    #[error("event pump did not settle: {0}")]
    Settle(#[from] tokio::time::error::Elapsed),

    /// Track published or subscribed but no native cryptor is attached.
    #[error("no {0} cryptor attached to {TRACK}")]
    MissingCryptor(&'static str),
}

/// Session parameters.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Key provider options for both participants.
    pub key_provider: KeyProviderOptions,
    /// Key material all keys are derived from.
    pub passphrase: Vec<u8>,
    /// Messages to send.
    pub messages: u32,
    /// Ratchet the sender key every this many messages; 0 never ratchets.
    pub ratchet_every: u32,
    /// IV seed; Bob uses `seed + 1`.
    pub seed: u64,
}

/// What made it across.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopbackReport {
    /// Frames decrypted to the original bytes.
    pub frames_delivered: u32,
    /// Frames dropped by either cryptor or corrupted.
    pub frames_dropped: u32,
    /// Data packets decrypted to the original bytes.
    pub packets_delivered: u32,
    /// Data packets that failed to encrypt or decrypt.
    pub packets_failed: u32,
    /// Sender key ratchets performed.
    pub ratchets: u32,
}

impl LoopbackReport {
    /// Whether every message arrived intact.
    pub fn is_clean(&self) -> bool {
        self.frames_dropped == 0 && self.packets_failed == 0
    }
}

struct Peer {
    binding: Arc<SoftwareBinding>,
    manager: E2eeManager,
    room: Arc<SimRoom>,
}

impl Peer {
    /// Join a room as `identity` with `remote` already present, and announce
    /// local encryption.
    async fn join(
        identity: &str,
        remote: &str,
        options: E2eeOptions,
        seed: u64,
    ) -> Result<Self, SimError> {
        let binding = Arc::new(SoftwareBinding::with_seed(seed));
        let manager = E2eeManager::from_options(options, binding.clone()).await?;

        let room = SimRoom::new(identity);
        room.add_remote(remote);
        room.set_local_e2ee_enabled(true);
        manager.setup(room.clone())?;
        room.signal_connected();

        let peer = Self { binding, manager, room };
        peer.settle().await?;
        tracing::debug!(participant = identity, enabled = peer.manager.is_enabled(), "Joined");
        Ok(peer)
    }

    async fn settle(&self) -> Result<(), SimError> {
        settle(&self.manager, &self.room).await?;
        Ok(())
    }

    async fn leave(self) -> Result<(), SimError> {
        self.manager.cleanup().await;
        self.manager.key_provider().dispose().await?;
        Ok(())
    }
}

fn participant_key(passphrase: &[u8], identity: &str) -> Vec<u8> {
    [passphrase, b":", identity.as_bytes()].concat()
}

/// Run the session to completion.
pub async fn run_loopback(config: LoopbackConfig) -> Result<LoopbackReport, SimError> {
    let shared = config.key_provider.shared_key;
    let options = E2eeOptions {
        key_provider: config.key_provider.clone(),
        shared_key: shared.then(|| config.passphrase.clone()),
        data_channel_encryption: true,
    };

    let alice = Peer::join(ALICE, BOB, options.clone(), config.seed).await?;
    let bob = Peer::join(BOB, ALICE, options, config.seed.wrapping_add(1)).await?;

    if !shared {
        for peer in [&alice, &bob] {
            for identity in [ALICE, BOB] {
                let key = participant_key(&config.passphrase, identity);
                peer.manager.key_provider().set_key(&identity.into(), &key, None).await?;
            }
        }
    }

    let sender = alice.room.publish_local(TRACK, true);
    alice.settle().await?;
    let receiver = bob.room.subscribe_remote(ALICE, TRACK, true);
    bob.settle().await?;

    let sender =
        alice.binding.live_frame_cryptor_for(sender.0).ok_or(SimError::MissingCryptor("sender"))?;
    let receiver = bob
        .binding
        .live_frame_cryptor_for(receiver.0)
        .ok_or(SimError::MissingCryptor("receiver"))?;

    let alice_identity = ParticipantIdentity::from(ALICE);
    let mut report = LoopbackReport::default();

    for i in 0..config.messages {
        if config.ratchet_every > 0 && i > 0 && i % config.ratchet_every == 0 {
            alice.manager.key_provider().ratchet_key(Some(&alice_identity), None).await?;
            report.ratchets += 1;
            tracing::debug!(message = i, "Sender ratcheted its key");
        }

        let frame = format!("frame {i}").into_bytes();
        match sender.encrypt_frame(&frame).and_then(|sealed| receiver.decrypt_frame(&sealed)) {
            Some(opened) if opened == frame => report.frames_delivered += 1,
            _ => {
                report.frames_dropped += 1;
                tracing::warn!(message = i, "Frame dropped");
            },
        }

        if !alice.manager.is_data_channel_encryption_enabled() {
            continue;
        }

        let payload = format!("packet {i}").into_bytes();
        let opened = match alice.manager.encrypt_data(&payload).await {
            Ok(packet) => {
                bob.manager
                    .handle_encrypted_data(
                        &packet.payload,
                        &packet.iv,
                        &alice_identity,
                        packet.key_index,
                    )
                    .await
            },
            Err(e) => Err(e),
        };
        match opened {
            Ok(opened) if opened == payload => report.packets_delivered += 1,
            Ok(_) => {
                report.packets_failed += 1;
                tracing::warn!(message = i, "Packet corrupted");
            },
            Err(e) => {
                report.packets_failed += 1;
                tracing::warn!(message = i, error = %e, "Packet lost");
            },
        }
    }

    alice.leave().await?;
    bob.leave().await?;
    Ok(report)
}
