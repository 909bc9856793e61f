//! Software frame cryptor.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sealtrack_core::{CryptorDirection, FrameCryptor, NativeError, ParticipantIdentity};
use sealtrack_crypto::{FrameKind, classify_frame, open_frame, seal_frame};

use super::{Failure, IvSource, NativeCall, Recorder, SoftwareKeyProvider, lock};

/// Observable state of a native frame cryptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCryptorRecord {
    /// Binding-assigned id.
    pub id: u64,
    /// Participant whose keys it uses.
    pub identity: ParticipantIdentity,
    /// Sender or receiver.
    pub direction: CryptorDirection,
    /// RTP sender/receiver handle.
    pub media: u64,
    /// Processing frames.
    pub enabled: bool,
    /// Key index frames are sealed with.
    pub key_index: u32,
    /// Released.
    pub disposed: bool,
}

#[derive(Debug, Default)]
struct Status {
    enabled: bool,
    key_index: u32,
    disposed: bool,
}

/// Frame cryptor bound to one RTP sender or receiver.
///
/// A disabled cryptor passes frames through. Without a usable key, a sender
/// drops frames when `discard_frame_when_cryptor_not_ready` is set and
/// passes them through otherwise.
#[derive(Debug)]
pub struct SoftwareFrameCryptor {
    id: u64,
    identity: ParticipantIdentity,
    direction: CryptorDirection,
    media: u64,
    status: Mutex<Status>,
    key_provider: Arc<SoftwareKeyProvider>,
    recorder: Arc<Recorder>,
    ivs: Arc<IvSource>,
}

impl SoftwareFrameCryptor {
    pub(crate) fn new(
        id: u64,
        identity: ParticipantIdentity,
        direction: CryptorDirection,
        media: u64,
        key_provider: Arc<SoftwareKeyProvider>,
        recorder: Arc<Recorder>,
        ivs: Arc<IvSource>,
    ) -> Self {
        Self {
            id,
            identity,
            direction,
            media,
            status: Mutex::new(Status::default()),
            key_provider,
            recorder,
            ivs,
        }
    }

    /// Binding-assigned id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// RTP handle the cryptor is bound to.
    pub fn media(&self) -> u64 {
        self.media
    }

    /// Whether `dispose` succeeded.
    pub fn is_disposed(&self) -> bool {
        lock(&self.status).disposed
    }

    /// Current state.
    pub fn record(&self) -> NativeCryptorRecord {
        let status = lock(&self.status);
        NativeCryptorRecord {
            id: self.id,
            identity: self.identity.clone(),
            direction: self.direction,
            media: self.media,
            enabled: status.enabled,
            key_index: status.key_index,
            disposed: status.disposed,
        }
    }

    /// Process an outgoing frame. `None` means the frame is dropped.
    pub fn encrypt_frame(&self, frame: &[u8]) -> Option<Vec<u8>> {
        let (enabled, key_index) = self.active_state()?;
        if !enabled {
            return Some(frame.to_vec());
        }

        let Ok(index_byte) = u8::try_from(key_index) else {
            tracing::debug!(cryptor = self.id, key_index, "Key index does not fit the frame trailer");
            return None;
        };

        match self.key_provider.encryption_key(&self.identity, key_index) {
            Ok(key) => Some(seal_frame(frame, &key, index_byte, self.ivs.next_iv())),
            Err(e) if self.key_provider.options().discard_frame_when_cryptor_not_ready => {
                tracing::debug!(cryptor = self.id, error = %e, "Dropping frame, no key");
                None
            },
            Err(_) => Some(frame.to_vec()),
        }
    }

    /// Process an incoming frame. `None` means the frame is dropped.
    ///
    /// Frames carrying the SIF trailer or the unencrypted magic bytes pass
    /// through untouched.
    pub fn decrypt_frame(&self, frame: &[u8]) -> Option<Vec<u8>> {
        let (enabled, _) = self.active_state()?;
        if !enabled {
            return Some(frame.to_vec());
        }

        let sif_trailer = self.key_provider.sif_trailer();
        let magic = &self.key_provider.options().uncrypted_magic_bytes;

        let parts = match classify_frame(frame, &sif_trailer, magic) {
            Ok(FrameKind::PassThrough) => return Some(frame.to_vec()),
            Ok(FrameKind::Sealed(parts)) => parts,
            Err(e) => {
                tracing::debug!(cryptor = self.id, error = %e, "Dropping malformed frame");
                return None;
            },
        };

        let opened = self
            .key_provider
            .open_with_recovery(&self.identity, u32::from(parts.key_index), |key| {
                open_frame(&parts, key)
            });
        match opened {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::debug!(cryptor = self.id, error = %e, "Dropping undecryptable frame");
                None
            },
        }
    }

    /// `(enabled, key_index)` unless disposed.
    fn active_state(&self) -> Option<(bool, u32)> {
        let status = lock(&self.status);
        if status.disposed {
            return None;
        }
        Some((status.enabled, status.key_index))
    }
}

#[async_trait]
impl FrameCryptor for SoftwareFrameCryptor {
    async fn set_enabled(&self, enabled: bool) -> Result<(), NativeError> {
        self.recorder.record(NativeCall::SetEnabled { cryptor: self.id, enabled });
        let failure = if enabled { Failure::Enable } else { Failure::Disable };
        self.recorder.check(failure, "set_enabled")?;

        let mut status = lock(&self.status);
        if status.disposed {
            return Err(NativeError::new("set_enabled", "frame cryptor disposed"));
        }
        status.enabled = enabled;
        Ok(())
    }

    async fn set_key_index(&self, key_index: u32) -> Result<(), NativeError> {
        self.recorder.record(NativeCall::SetKeyIndex { cryptor: self.id, key_index });
        self.recorder.check(Failure::SetKeyIndex, "set_key_index")?;

        let mut status = lock(&self.status);
        if status.disposed {
            return Err(NativeError::new("set_key_index", "frame cryptor disposed"));
        }
        status.key_index = key_index;
        Ok(())
    }

    async fn dispose(&self) -> Result<(), NativeError> {
        self.recorder.record(NativeCall::DisposeFrameCryptor { cryptor: self.id });
        self.recorder.check(Failure::DisposeFrameCryptor, "dispose")?;

        let mut status = lock(&self.status);
        if status.disposed {
            return Err(NativeError::new("dispose", "frame cryptor already disposed"));
        }
        status.disposed = true;
        status.enabled = false;
        Ok(())
    }
}
