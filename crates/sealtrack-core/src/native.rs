//! Native binding boundary.
//!
//! The cryptographic work (sealing frames, deriving and ratcheting keys,
//! sealing data packets) is done by a platform WebRTC binding. These traits
//! are the only surface the orchestration layer relies on. Every operation
//! that the binding performs asynchronously is `async`; constructors that
//! the binding performs synchronously are plain functions.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::NativeError,
    options::KeyProviderOptions,
    room::{ParticipantIdentity, RtpReceiverHandle, RtpSenderHandle},
};

/// Frame encryption algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrameCryptorAlgorithm {
    /// AES-GCM.
    #[default]
    AesGcm,
}

/// Direction a frame cryptor operates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CryptorDirection {
    /// Encrypts outgoing frames of a local track.
    Sender,
    /// Decrypts incoming frames of a remote track.
    Receiver,
}

/// An encrypted data-channel packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPacket {
    /// Ciphertext.
    pub payload: Vec<u8>,
    /// Initialization vector.
    pub iv: Vec<u8>,
    /// Key index the packet was encrypted with.
    pub key_index: u32,
}

/// Native key storage and ratcheting.
#[async_trait]
pub trait NativeKeyProvider: Send + Sync {
    /// Set (or rotate) the shared key at `key_index`.
    async fn set_shared_key(&self, key: &[u8], key_index: u32) -> Result<(), NativeError>;

    /// Ratchet the shared key at `key_index`, returning the new material.
    async fn ratchet_shared_key(&self, key_index: u32) -> Result<Vec<u8>, NativeError>;

    /// Set a participant's key at `key_index`.
    async fn set_key(
        &self,
        identity: &ParticipantIdentity,
        key: &[u8],
        key_index: u32,
    ) -> Result<(), NativeError>;

    /// Ratchet a participant's key at `key_index`, returning the new material.
    async fn ratchet_key(
        &self,
        identity: &ParticipantIdentity,
        key_index: u32,
    ) -> Result<Vec<u8>, NativeError>;

    /// Configure the SIF trailer.
    async fn set_sif_trailer(&self, trailer: &[u8]) -> Result<(), NativeError>;

    /// Release native resources.
    async fn dispose(&self) -> Result<(), NativeError>;
}

/// A cryptor bound to one RTP sender or receiver.
#[async_trait]
pub trait FrameCryptor: Send + Sync {
    /// Enable or disable frame processing.
    async fn set_enabled(&self, enabled: bool) -> Result<(), NativeError>;

    /// Select the key index used for frames.
    async fn set_key_index(&self, key_index: u32) -> Result<(), NativeError>;

    /// Release native resources. The cryptor must not be used afterwards.
    async fn dispose(&self) -> Result<(), NativeError>;
}

/// Encrypts and decrypts arbitrary data-channel payloads.
///
/// `Ok(None)` is the native "no result" outcome (wrong key, corrupted input,
/// key not yet at the right ratchet step).
#[async_trait]
pub trait DataPacketCryptor: Send + Sync {
    /// Encrypt `data` with `identity`'s key at `key_index`.
    async fn encrypt(
        &self,
        identity: &ParticipantIdentity,
        key_index: u32,
        data: &[u8],
    ) -> Result<Option<EncryptedPacket>, NativeError>;

    /// Decrypt a packet sent by `identity`.
    async fn decrypt(
        &self,
        identity: &ParticipantIdentity,
        packet: &EncryptedPacket,
    ) -> Result<Option<Vec<u8>>, NativeError>;
}

/// Creates native key providers.
pub trait KeyProviderFactory: Send + Sync {
    /// Create a key provider with `options`.
    fn create_key_provider(
        &self,
        options: &KeyProviderOptions,
    ) -> Result<Arc<dyn NativeKeyProvider>, NativeError>;
}

/// Creates frame cryptors.
pub trait FrameCryptorFactory: Send + Sync {
    /// Create a cryptor for a local track's sender.
    fn create_for_sender(
        &self,
        identity: &ParticipantIdentity,
        sender: RtpSenderHandle,
        algorithm: FrameCryptorAlgorithm,
        key_provider: &Arc<dyn NativeKeyProvider>,
    ) -> Result<Arc<dyn FrameCryptor>, NativeError>;

    /// Create a cryptor for a remote track's receiver.
    fn create_for_receiver(
        &self,
        identity: &ParticipantIdentity,
        receiver: RtpReceiverHandle,
        algorithm: FrameCryptorAlgorithm,
        key_provider: &Arc<dyn NativeKeyProvider>,
    ) -> Result<Arc<dyn FrameCryptor>, NativeError>;
}

/// Creates data-packet cryptors.
#[async_trait]
pub trait DataPacketCryptorFactory: Send + Sync {
    /// Create a data-packet cryptor sharing `key_provider`'s keys.
    async fn create_data_packet_cryptor(
        &self,
        algorithm: FrameCryptorAlgorithm,
        key_provider: Arc<dyn NativeKeyProvider>,
    ) -> Result<Arc<dyn DataPacketCryptor>, NativeError>;
}

/// A complete native binding.
pub trait NativeBinding: KeyProviderFactory + FrameCryptorFactory + DataPacketCryptorFactory {}

impl<T> NativeBinding for T where
    T: KeyProviderFactory + FrameCryptorFactory + DataPacketCryptorFactory
{
}
