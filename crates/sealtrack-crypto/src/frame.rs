//! Media frame sealing.
//!
//! # Frame Layout
//!
//! ```text
//! ┌──────────────────────┬──────────┬────────┬───────────┐
//! │ ciphertext + GCM tag │ IV (12B) │ IV len │ key index │
//! └──────────────────────┴──────────┴────────┴───────────┘
//! ```
//!
//! Two kinds of frames are never sealed and pass through untouched:
//! - frames ending with the SIF trailer (server-injected frames)
//! - frames ending with the unencrypted magic bytes

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{error::CryptoError, packet::IV_SIZE, ratchet::EncryptionKey};

/// IV length byte + key index byte
const TRAILER_SIZE: usize = 2;

/// Smallest sealed frame: empty ciphertext with tag, IV and trailer
const MIN_SEALED_FRAME: usize = 16 + IV_SIZE + TRAILER_SIZE;

/// How an incoming frame should be treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind<'a> {
    /// Deliver the frame as-is.
    PassThrough,
    /// Sealed frame; open it with the key at `key_index`.
    Sealed(FrameParts<'a>),
}

/// Borrowed view into a sealed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameParts<'a> {
    /// Ciphertext including tag
    pub ciphertext: &'a [u8],
    /// IV used for this frame
    pub iv: &'a [u8],
    /// Key ring slot the frame was sealed with
    pub key_index: u8,
}

/// Seal a media frame.
pub fn seal_frame(
    frame: &[u8],
    key: &EncryptionKey,
    key_index: u8,
    iv: [u8; IV_SIZE],
) -> Vec<u8> {
    let cipher = Aes256Gcm::new(key.key().into());
    let aad = [key_index];

    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(&iv), Payload { msg: frame, aad: &aad })
    else {
        unreachable!("AES-256-GCM encryption cannot fail with valid inputs");
    };

    let mut sealed = Vec::with_capacity(ciphertext.len() + IV_SIZE + TRAILER_SIZE);
    sealed.extend_from_slice(&ciphertext);
    sealed.extend_from_slice(&iv);
    sealed.push(IV_SIZE as u8);
    sealed.push(key_index);
    sealed
}

/// Decide whether a frame passes through or must be opened.
///
/// Empty trailers never match.
pub fn classify_frame<'a>(
    frame: &'a [u8],
    sif_trailer: &[u8],
    magic_bytes: &[u8],
) -> Result<FrameKind<'a>, CryptoError> {
    if ends_with_marker(frame, sif_trailer) || ends_with_marker(frame, magic_bytes) {
        return Ok(FrameKind::PassThrough);
    }

    if frame.len() < MIN_SEALED_FRAME {
        return Err(CryptoError::MalformedFrame { reason: "shorter than sealed frame overhead" });
    }

    let key_index = frame[frame.len() - 1];
    let iv_len = frame[frame.len() - 2] as usize;
    if iv_len != IV_SIZE {
        return Err(CryptoError::MalformedFrame { reason: "unexpected IV length" });
    }

    let iv_start = frame.len() - TRAILER_SIZE - IV_SIZE;
    Ok(FrameKind::Sealed(FrameParts {
        ciphertext: &frame[..iv_start],
        iv: &frame[iv_start..frame.len() - TRAILER_SIZE],
        key_index,
    }))
}

/// Open a sealed frame.
pub fn open_frame(parts: &FrameParts<'_>, key: &EncryptionKey) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(key.key().into());
    let aad = [parts.key_index];

    cipher.decrypt(Nonce::from_slice(parts.iv), Payload { msg: parts.ciphertext, aad: &aad }).map_err(
        |_| CryptoError::DecryptionFailed { reason: "frame authentication failed".to_string() },
    )
}

fn ends_with_marker(frame: &[u8], marker: &[u8]) -> bool {
    !marker.is_empty() && frame.ends_with(marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{key_ring::KeyMaterial, ratchet::derive_encryption_key};

    const SIF: &[u8] = b"SIF";
    const MAGIC: &[u8] = b"LK-ROCKS";

    fn test_key(byte: u8) -> EncryptionKey {
        derive_encryption_key(&KeyMaterial::new(vec![byte; 32]), b"LKFrameEncryptionKey")
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = test_key(1);
        let sealed = seal_frame(b"opus frame", &key, 5, [0x11; IV_SIZE]);

        let FrameKind::Sealed(parts) = classify_frame(&sealed, SIF, MAGIC).unwrap() else {
            unreachable!("sealed frame must classify as sealed");
        };
        assert_eq!(parts.key_index, 5);
        assert_eq!(open_frame(&parts, &key).unwrap(), b"opus frame");
    }

    #[test]
    fn sealed_frame_layout() {
        let key = test_key(1);
        let sealed = seal_frame(b"abc", &key, 7, [0x22; IV_SIZE]);

        assert_eq!(sealed.len(), 3 + 16 + IV_SIZE + TRAILER_SIZE);
        assert_eq!(sealed[sealed.len() - 1], 7);
        assert_eq!(sealed[sealed.len() - 2], IV_SIZE as u8);
        assert_eq!(&sealed[sealed.len() - 14..sealed.len() - 2], &[0x22; IV_SIZE]);
    }

    #[test]
    fn sif_frames_pass_through() {
        let frame = [b"server-injected".as_slice(), SIF].concat();
        assert_eq!(classify_frame(&frame, SIF, MAGIC).unwrap(), FrameKind::PassThrough);
    }

    #[test]
    fn magic_frames_pass_through() {
        let frame = [b"plain".as_slice(), MAGIC].concat();
        assert_eq!(classify_frame(&frame, SIF, MAGIC).unwrap(), FrameKind::PassThrough);
    }

    #[test]
    fn empty_markers_never_match() {
        let key = test_key(1);
        let sealed = seal_frame(b"x", &key, 0, [0; IV_SIZE]);

        assert!(matches!(classify_frame(&sealed, b"", b""), Ok(FrameKind::Sealed(_))));
    }

    #[test]
    fn short_frame_is_malformed() {
        let result = classify_frame(b"tiny", SIF, MAGIC);
        assert!(matches!(result, Err(CryptoError::MalformedFrame { .. })));
    }

    #[test]
    fn bad_iv_length_is_malformed() {
        let key = test_key(1);
        let mut sealed = seal_frame(b"frame", &key, 0, [0; IV_SIZE]);
        let len = sealed.len();
        sealed[len - 2] = 8;

        let result = classify_frame(&sealed, SIF, MAGIC);
        assert_eq!(result, Err(CryptoError::MalformedFrame { reason: "unexpected IV length" }));
    }

    #[test]
    fn rewritten_key_index_fails_authentication() {
        let key = test_key(1);
        let mut sealed = seal_frame(b"frame", &key, 1, [0; IV_SIZE]);
        let len = sealed.len();
        sealed[len - 1] = 2;

        let FrameKind::Sealed(parts) = classify_frame(&sealed, SIF, MAGIC).unwrap() else {
            unreachable!("sealed frame must classify as sealed");
        };
        assert!(open_frame(&parts, &key).is_err());
    }
}
