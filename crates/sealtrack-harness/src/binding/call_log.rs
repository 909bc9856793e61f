//! Native call recording and failure injection.

use sealtrack_core::{CryptorDirection, ParticipantIdentity};

/// One call into the software binding, in the order it was made.
///
/// Calls are recorded before injected failures are applied, so a failed call
/// still shows up in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeCall {
    /// Key provider constructed.
    CreateKeyProvider {
        /// Shared-key mode.
        shared_key: bool,
    },
    /// `set_shared_key`.
    SetSharedKey {
        /// Slot written.
        key_index: u32,
    },
    /// `ratchet_shared_key`.
    RatchetSharedKey {
        /// Slot ratcheted.
        key_index: u32,
    },
    /// `set_key`.
    SetKey {
        /// Participant.
        identity: ParticipantIdentity,
        /// Slot written.
        key_index: u32,
    },
    /// `ratchet_key`.
    RatchetKey {
        /// Participant.
        identity: ParticipantIdentity,
        /// Slot ratcheted.
        key_index: u32,
    },
    /// `set_sif_trailer`.
    SetSifTrailer {
        /// Trailer length in bytes.
        len: usize,
    },
    /// Key provider disposed.
    DisposeKeyProvider,
    /// Frame cryptor constructed.
    CreateFrameCryptor {
        /// Binding-assigned cryptor id.
        cryptor: u64,
        /// Participant whose keys it uses.
        identity: ParticipantIdentity,
        /// Sender or receiver.
        direction: CryptorDirection,
        /// RTP sender/receiver handle it is bound to.
        media: u64,
    },
    /// `FrameCryptor::set_enabled`.
    SetEnabled {
        /// Cryptor id.
        cryptor: u64,
        /// Requested state.
        enabled: bool,
    },
    /// `FrameCryptor::set_key_index`.
    SetKeyIndex {
        /// Cryptor id.
        cryptor: u64,
        /// Requested index.
        key_index: u32,
    },
    /// `FrameCryptor::dispose`.
    DisposeFrameCryptor {
        /// Cryptor id.
        cryptor: u64,
    },
    /// Data-packet cryptor constructed.
    CreateDataPacketCryptor,
    /// `DataPacketCryptor::encrypt`.
    Encrypt {
        /// Participant whose key was used.
        identity: ParticipantIdentity,
        /// Key index used.
        key_index: u32,
    },
    /// `DataPacketCryptor::decrypt`.
    Decrypt {
        /// Sender identity.
        identity: ParticipantIdentity,
        /// Key index claimed by the packet.
        key_index: u32,
    },
}

/// Native operations that can be made to fail.
///
/// Injected failures stay active until cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Failure {
    /// Key provider construction.
    CreateKeyProvider,
    /// `set_key` and `set_shared_key`.
    SetKey,
    /// `ratchet_key` and `ratchet_shared_key`.
    Ratchet,
    /// Frame cryptor construction.
    CreateFrameCryptor,
    /// `FrameCryptor::set_enabled(true)`.
    Enable,
    /// `FrameCryptor::set_enabled(false)`.
    Disable,
    /// `FrameCryptor::set_key_index`.
    SetKeyIndex,
    /// `FrameCryptor::dispose`.
    DisposeFrameCryptor,
    /// Data-packet cryptor construction.
    CreateDataPacketCryptor,
    /// `DataPacketCryptor::encrypt` returns no result.
    EncryptNoResult,
}
