//! End-to-end encryption orchestration for real-time media sessions.
//!
//! Media frames and data-channel payloads are sealed by a native WebRTC
//! binding. This crate decides *when* that happens: it owns key state,
//! attaches a frame cryptor to every encrypted track for exactly as long as
//! the track is published or subscribed, and serializes construction of the
//! shared data-packet cryptor.
//!
//! # Architecture
//!
//! - [`KeyProvider`]: key storage and ratcheting, latest key index per
//!   participant
//! - [`E2eeManager`]: room event handling, frame cryptor registry,
//!   participant encryption status, data-channel encryption
//! - [`Room`]: the external room the manager binds to
//! - [`native`]: traits a platform binding implements
//!
//! # Example
//!
//! ```ignore
//! let manager = E2eeManager::from_options(options, binding).await?;
//! manager.setup(room)?;
//!
//! let packet = manager.encrypt_data(b"hello").await?;
//! ```

#![forbid(unsafe_code)]

mod data_cryptor;
pub mod error;
pub mod event;
pub mod key_provider;
pub mod manager;
pub mod native;
pub mod options;
mod registry;
pub mod room;

pub use error::{E2eeError, NativeError};
pub use event::E2eeEvent;
pub use key_provider::KeyProvider;
pub use manager::E2eeManager;
pub use native::{
    CryptorDirection, DataPacketCryptor, DataPacketCryptorFactory, EncryptedPacket, FrameCryptor,
    FrameCryptorAlgorithm, FrameCryptorFactory, KeyProviderFactory, NativeBinding,
    NativeKeyProvider,
};
pub use options::{E2eeOptions, KeyProviderOptions};
pub use registry::CryptorSnapshot;
pub use room::{
    LocalTrackPublication, Participant, ParticipantIdentity, ParticipantKind,
    RemoteTrackPublication, Room, RoomEvent, RtpReceiverHandle, RtpSenderHandle, TrackSid,
};
