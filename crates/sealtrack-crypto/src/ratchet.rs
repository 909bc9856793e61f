//! Key ratcheting and encryption key derivation.
//!
//! # Security Properties
//!
//! - One-way: ratcheted material reveals nothing about its predecessor
//! - Determinism: same material and salt always produce the same successor,
//!   so sender and receiver ratchet in lockstep without coordination
//! - Salt separation: providers configured with different salts derive
//!   unrelated keys from the same passphrase

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::key_ring::KeyMaterial;

type HmacSha256 = Hmac<Sha256>;

/// Size of derived encryption keys (AES-256).
pub const KEY_SIZE: usize = 32;

/// Label mixed into every ratchet step
const RATCHET_LABEL: &[u8] = b"sealtrackRatchetV1";

/// HKDF info for encryption key derivation
const ENCRYPTION_KEY_INFO: &[u8] = b"sealtrackFrameKeyV1";

/// A 32-byte AES-256-GCM key derived from key material.
///
/// Zeroized on drop.
pub struct EncryptionKey {
    key: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Raw key bytes.
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Derive the AES-256-GCM key for a piece of key material.
///
/// The ratchet salt doubles as the HKDF salt so that two providers only
/// interoperate when they agree on it.
pub fn derive_encryption_key(material: &KeyMaterial, salt: &[u8]) -> EncryptionKey {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), material.as_bytes());

    let mut key = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(ENCRYPTION_KEY_INFO, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    EncryptionKey { key }
}

/// Ratchet key material one step forward.
///
/// `next = HMAC-SHA256(key = material, RATCHET_LABEL || salt)`
pub fn ratchet_material(material: &KeyMaterial, salt: &[u8]) -> KeyMaterial {
    let Ok(mut mac) = HmacSha256::new_from_slice(material.as_bytes()) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(RATCHET_LABEL);
    mac.update(salt);

    KeyMaterial::new(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &[u8] = b"LKFrameEncryptionKey";

    #[test]
    fn ratchet_is_deterministic() {
        let material = KeyMaterial::new(b"passphrase".to_vec());

        let a = ratchet_material(&material, SALT);
        let b = ratchet_material(&material, SALT);

        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn ratchet_changes_material() {
        let material = KeyMaterial::new(b"passphrase".to_vec());
        let next = ratchet_material(&material, SALT);

        assert_ne!(next.as_bytes(), material.as_bytes());
        assert_eq!(next.as_bytes().len(), 32);
    }

    #[test]
    fn successive_ratchets_are_unique() {
        let material = KeyMaterial::new(b"passphrase".to_vec());
        let step1 = ratchet_material(&material, SALT);
        let step2 = ratchet_material(&step1, SALT);
        let step3 = ratchet_material(&step2, SALT);

        assert_ne!(step1.as_bytes(), step2.as_bytes());
        assert_ne!(step2.as_bytes(), step3.as_bytes());
        assert_ne!(step1.as_bytes(), step3.as_bytes());
    }

    #[test]
    fn salt_separates_ratchets() {
        let material = KeyMaterial::new(b"passphrase".to_vec());

        let a = ratchet_material(&material, b"salt-a");
        let b = ratchet_material(&material, b"salt-b");

        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn derived_key_depends_on_salt() {
        let material = KeyMaterial::new(b"passphrase".to_vec());

        let a = derive_encryption_key(&material, b"salt-a");
        let b = derive_encryption_key(&material, b"salt-b");

        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn derived_key_debug_is_redacted() {
        let key = derive_encryption_key(&KeyMaterial::new(vec![7; 16]), SALT);
        assert_eq!(format!("{key:?}"), "EncryptionKey(..)");
    }
}
