//! Versioned key storage.
//!
//! A [`KeyRing`] holds up to `size` pieces of key material, addressed by key
//! index. Rotation writes a new index; ratcheting replaces the material at an
//! existing index. The ring also tracks consecutive decryption failures so a
//! receiver can stop trying a key that keeps failing.

use zeroize::Zeroize;

use crate::{error::CryptoError, ratchet::ratchet_material};

/// Largest ring a sealed frame can address; the frame trailer carries the
/// key index in one byte.
pub const MAX_KEYRING_SIZE: u32 = 256;

/// Raw key material (passphrase bytes or ratchet output).
///
/// Zeroized on drop. `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    /// Wrap raw bytes as key material.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for KeyMaterial {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyMaterial({} bytes)", self.0.len())
    }
}

/// Ring of versioned keys for one participant (or the shared key).
///
/// # Invariants
///
/// - `slots.len() == size`, and `1 <= size <= MAX_KEYRING_SIZE`
/// - `current_index < size`
/// - An invalidated ring serves no keys until [`KeyRing::set_key`] is called
#[derive(Debug, Clone)]
pub struct KeyRing {
    slots: Vec<Option<KeyMaterial>>,
    current_index: u32,
    consecutive_failures: u32,
    invalidated: bool,
}

impl KeyRing {
    /// Create an empty ring with `size` slots, clamped to
    /// `1..=MAX_KEYRING_SIZE`.
    pub fn new(size: u32) -> Self {
        let size = size.clamp(1, MAX_KEYRING_SIZE);
        Self {
            slots: vec![None; size as usize],
            current_index: 0,
            consecutive_failures: 0,
            invalidated: false,
        }
    }

    /// Number of slots.
    pub fn size(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Index most recently written by [`KeyRing::set_key`].
    pub fn current_index(&self) -> u32 {
        self.current_index
    }

    /// Whether the ring stopped serving keys after repeated failures.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Consecutive failures recorded since the last success or key update.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Store material at `index` and make it current.
    ///
    /// Clears the failure counter and lifts invalidation.
    pub fn set_key(&mut self, index: u32, material: KeyMaterial) -> Result<(), CryptoError> {
        let slot = self.slot_index(index)?;
        self.slots[slot] = Some(material);
        self.current_index = index;
        self.consecutive_failures = 0;
        self.invalidated = false;
        Ok(())
    }

    /// Material stored at `index`.
    pub fn key(&self, index: u32) -> Result<&KeyMaterial, CryptoError> {
        if self.invalidated {
            return Err(CryptoError::RingInvalidated { failures: self.consecutive_failures });
        }
        let slot = self.slot_index(index)?;
        self.slots[slot].as_ref().ok_or(CryptoError::MissingKey { index })
    }

    /// Ratchet the material at `index` one step and return the new material.
    ///
    /// The previous material is dropped (and zeroized).
    pub fn ratchet(&mut self, index: u32, salt: &[u8]) -> Result<KeyMaterial, CryptoError> {
        let slot = self.slot_index(index)?;
        let current = self.slots[slot].as_ref().ok_or(CryptoError::MissingKey { index })?;

        let next = ratchet_material(current, salt);
        self.slots[slot] = Some(next.clone());
        Ok(next)
    }

    /// Replace the material at `index` without touching the current index.
    ///
    /// Used by receivers that recovered a key by ratcheting ahead.
    pub fn replace(&mut self, index: u32, material: KeyMaterial) -> Result<(), CryptoError> {
        let slot = self.slot_index(index)?;
        self.slots[slot] = Some(material);
        Ok(())
    }

    /// Record a successful decryption.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Record a failed decryption.
    ///
    /// `tolerance < 0` means unlimited. Returns `true` if this failure
    /// invalidated the ring.
    pub fn record_failure(&mut self, tolerance: i32) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if tolerance >= 0 && self.consecutive_failures > tolerance as u32 && !self.invalidated {
            self.invalidated = true;
            return true;
        }
        false
    }

    fn slot_index(&self, index: u32) -> Result<usize, CryptoError> {
        if index >= self.size() {
            return Err(CryptoError::InvalidKeyIndex { index, ring_size: self.size() });
        }
        Ok(index as usize)
    }
}
