//! Data-channel packet encryption using AES-256-GCM.
//!
//! All functions are pure - IV bytes must be provided by the caller.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{error::CryptoError, ratchet::EncryptionKey};

/// AES-GCM IV size (12 bytes)
pub const IV_SIZE: usize = 12;

/// GCM authentication tag size (16 bytes)
const GCM_TAG_SIZE: usize = 16;

/// An encrypted data packet with the metadata needed to open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPacket {
    /// Ciphertext including the 16-byte GCM tag
    pub payload: Vec<u8>,
    /// The IV used for this packet
    pub iv: [u8; IV_SIZE],
    /// Key ring slot the packet was sealed with
    pub key_index: u32,
}

impl SealedPacket {
    /// Plaintext length (payload length minus authentication tag).
    pub fn plaintext_len(&self) -> usize {
        self.payload.len().saturating_sub(GCM_TAG_SIZE)
    }
}

/// Seal a packet with AES-256-GCM.
///
/// The key index is bound as associated data.
///
/// # Security
///
/// - Caller MUST provide a fresh random IV per packet in production; IV reuse
///   under one key breaks GCM confidentiality and authenticity
pub fn seal_packet(
    plaintext: &[u8],
    key: &EncryptionKey,
    key_index: u32,
    iv: [u8; IV_SIZE],
) -> SealedPacket {
    let cipher = Aes256Gcm::new(key.key().into());
    let aad = key_index.to_be_bytes();

    let Ok(payload) = cipher.encrypt(Nonce::from_slice(&iv), Payload { msg: plaintext, aad: &aad })
    else {
        unreachable!("AES-256-GCM encryption cannot fail with valid inputs");
    };

    SealedPacket { payload, iv, key_index }
}

/// Open a packet sealed by [`seal_packet`].
///
/// # Errors
///
/// - `InvalidIv`: IV is not 12 bytes
/// - `DecryptionFailed`: wrong key, wrong key index, or tampered payload
pub fn open_packet(
    payload: &[u8],
    iv: &[u8],
    key_index: u32,
    key: &EncryptionKey,
) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != IV_SIZE {
        return Err(CryptoError::InvalidIv { expected: IV_SIZE, actual: iv.len() });
    }

    let cipher = Aes256Gcm::new(key.key().into());
    let aad = key_index.to_be_bytes();

    cipher.decrypt(Nonce::from_slice(iv), Payload { msg: payload, aad: &aad }).map_err(|_| {
        CryptoError::DecryptionFailed { reason: "authentication failed".to_string() }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{key_ring::KeyMaterial, ratchet::derive_encryption_key};

    const SALT: &[u8] = b"LKFrameEncryptionKey";

    fn test_key(byte: u8) -> EncryptionKey {
        derive_encryption_key(&KeyMaterial::new(vec![byte; 32]), SALT)
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = test_key(1);
        let sealed = seal_packet(b"hello data channel", &key, 0, [0xAB; IV_SIZE]);

        let opened = open_packet(&sealed.payload, &sealed.iv, sealed.key_index, &key).unwrap();
        assert_eq!(opened, b"hello data channel");
    }

    #[test]
    fn empty_packet_roundtrip() {
        let key = test_key(1);
        let sealed = seal_packet(b"", &key, 3, [0; IV_SIZE]);

        assert_eq!(sealed.payload.len(), GCM_TAG_SIZE);
        assert_eq!(sealed.plaintext_len(), 0);
        assert!(open_packet(&sealed.payload, &sealed.iv, 3, &key).unwrap().is_empty());
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal_packet(b"secret", &test_key(1), 0, [0; IV_SIZE]);

        let result = open_packet(&sealed.payload, &sealed.iv, 0, &test_key(2));
        assert!(matches!(
            result,
            Err(CryptoError::DecryptionFailed { reason }) if reason.contains("authentication")
        ));
    }

    #[test]
    fn wrong_key_index_fails() {
        let key = test_key(1);
        let sealed = seal_packet(b"secret", &key, 2, [0; IV_SIZE]);

        assert!(open_packet(&sealed.payload, &sealed.iv, 3, &key).is_err());
    }

    #[test]
    fn tampered_payload_fails() {
        let key = test_key(1);
        let mut sealed = seal_packet(b"original", &key, 0, [0; IV_SIZE]);
        sealed.payload[0] ^= 0xFF;

        assert!(open_packet(&sealed.payload, &sealed.iv, 0, &key).is_err());
    }

    #[test]
    fn short_iv_rejected() {
        let key = test_key(1);
        let sealed = seal_packet(b"data", &key, 0, [0; IV_SIZE]);

        let result = open_packet(&sealed.payload, &sealed.iv[..8], 0, &key);
        assert_eq!(result, Err(CryptoError::InvalidIv { expected: IV_SIZE, actual: 8 }));
    }

    #[test]
    fn different_ivs_produce_different_ciphertexts() {
        let key = test_key(1);

        let a = seal_packet(b"same", &key, 0, [0x00; IV_SIZE]);
        let b = seal_packet(b"same", &key, 0, [0xFF; IV_SIZE]);

        assert_ne!(a.payload, b.payload);
    }
}
