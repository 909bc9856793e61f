//! Software data-packet cryptor.

use std::sync::Arc;

use async_trait::async_trait;
use sealtrack_core::{DataPacketCryptor, EncryptedPacket, NativeError, ParticipantIdentity};
use sealtrack_crypto::{open_packet, seal_packet};

use super::{Failure, IvSource, NativeCall, Recorder, SoftwareKeyProvider};

/// AES-256-GCM packet cryptor sharing a [`SoftwareKeyProvider`]'s keys.
///
/// Missing keys and authentication failures yield `Ok(None)`, the native
/// "no result". Internally synchronized, so concurrent calls are safe.
#[derive(Debug)]
pub struct SoftwareDataPacketCryptor {
    key_provider: Arc<SoftwareKeyProvider>,
    recorder: Arc<Recorder>,
    ivs: Arc<IvSource>,
}

impl SoftwareDataPacketCryptor {
    pub(crate) fn new(
        key_provider: Arc<SoftwareKeyProvider>,
        recorder: Arc<Recorder>,
        ivs: Arc<IvSource>,
    ) -> Self {
        Self { key_provider, recorder, ivs }
    }

    fn ensure_live(&self, operation: &'static str) -> Result<(), NativeError> {
        if self.key_provider.is_disposed() {
            return Err(NativeError::new(operation, "key provider disposed"));
        }
        Ok(())
    }
}

#[async_trait]
impl DataPacketCryptor for SoftwareDataPacketCryptor {
    async fn encrypt(
        &self,
        identity: &ParticipantIdentity,
        key_index: u32,
        data: &[u8],
    ) -> Result<Option<EncryptedPacket>, NativeError> {
        self.recorder.record(NativeCall::Encrypt { identity: identity.clone(), key_index });
        self.ensure_live("encrypt")?;
        if self.recorder.is_failing(Failure::EncryptNoResult) {
            return Ok(None);
        }

        let key = match self.key_provider.encryption_key(identity, key_index) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!(participant = %identity, key_index, error = %e, "No key for packet");
                return Ok(None);
            },
        };

        let sealed = seal_packet(data, &key, key_index, self.ivs.next_iv());
        Ok(Some(EncryptedPacket {
            payload: sealed.payload,
            iv: sealed.iv.to_vec(),
            key_index: sealed.key_index,
        }))
    }

    async fn decrypt(
        &self,
        identity: &ParticipantIdentity,
        packet: &EncryptedPacket,
    ) -> Result<Option<Vec<u8>>, NativeError> {
        self.recorder
            .record(NativeCall::Decrypt { identity: identity.clone(), key_index: packet.key_index });
        self.ensure_live("decrypt")?;

        let opened = self.key_provider.open_with_recovery(identity, packet.key_index, |key| {
            open_packet(&packet.payload, &packet.iv, packet.key_index, key)
        });

        match opened {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(e) => {
                tracing::debug!(participant = %identity, key_index = packet.key_index, error = %e, "Packet decryption failed");
                Ok(None)
            },
        }
    }
}
