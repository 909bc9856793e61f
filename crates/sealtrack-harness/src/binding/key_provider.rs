//! Software key provider: key rings, ratcheting, and decrypt-side recovery.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use sealtrack_core::{KeyProviderOptions, NativeError, NativeKeyProvider, ParticipantIdentity};
use sealtrack_crypto::{
    CryptoError, EncryptionKey, KeyMaterial, KeyRing, derive_encryption_key, ratchet_material,
};

use super::{Failure, NativeCall, Recorder, crypto_error, lock};

#[derive(Debug)]
struct KeyStore {
    shared: KeyRing,
    participants: HashMap<ParticipantIdentity, KeyRing>,
    sif_trailer: Vec<u8>,
}

/// Key rings for one E2EE session.
///
/// In shared-key mode every identity resolves to the shared ring. In
/// per-participant mode each identity has its own ring, created on first
/// `set_key`; the shared ring is kept apart and never consulted for
/// participant keys.
#[derive(Debug)]
pub struct SoftwareKeyProvider {
    options: KeyProviderOptions,
    keys: Mutex<KeyStore>,
    disposed: AtomicBool,
    recorder: Arc<Recorder>,
}

impl SoftwareKeyProvider {
    pub(crate) fn new(options: KeyProviderOptions, recorder: Arc<Recorder>) -> Self {
        let keys = KeyStore {
            shared: KeyRing::new(options.keyring_size),
            participants: HashMap::new(),
            sif_trailer: Vec::new(),
        };
        Self { options, keys: Mutex::new(keys), disposed: AtomicBool::new(false), recorder }
    }

    /// Options the provider was created with.
    pub fn options(&self) -> &KeyProviderOptions {
        &self.options
    }

    /// Whether `dispose` was called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Configured SIF trailer.
    pub fn sif_trailer(&self) -> Vec<u8> {
        lock(&self.keys).sif_trailer.clone()
    }

    /// Whether the ring serving `identity` stopped after repeated failures.
    pub fn is_invalidated(&self, identity: &ParticipantIdentity) -> bool {
        let mut keys = lock(&self.keys);
        self.ring_mut(&mut keys, identity).is_ok_and(|ring| ring.is_invalidated())
    }

    /// Encryption key for `identity` at `key_index`.
    pub(crate) fn encryption_key(
        &self,
        identity: &ParticipantIdentity,
        key_index: u32,
    ) -> Result<EncryptionKey, CryptoError> {
        let mut keys = lock(&self.keys);
        let ring = self.ring_mut(&mut keys, identity)?;
        Ok(derive_encryption_key(ring.key(key_index)?, &self.options.ratchet_salt))
    }

    /// Run `open` with `identity`'s key at `key_index`, ratcheting ahead up to
    /// `ratchet_window_size` steps if authentication fails.
    ///
    /// A key recovered by ratcheting replaces the stored one. A final failure
    /// counts against `failure_tolerance`.
    pub(crate) fn open_with_recovery<T>(
        &self,
        identity: &ParticipantIdentity,
        key_index: u32,
        open: impl Fn(&EncryptionKey) -> Result<T, CryptoError>,
    ) -> Result<T, CryptoError> {
        let salt = self.options.ratchet_salt.as_slice();
        let mut keys = lock(&self.keys);
        let ring = self.ring_mut(&mut keys, identity)?;

        let mut candidate = ring.key(key_index)?.clone();
        let mut last_error = match open(&derive_encryption_key(&candidate, salt)) {
            Ok(plaintext) => {
                ring.record_success();
                return Ok(plaintext);
            },
            Err(e) => e,
        };

        for step in 1..=self.options.ratchet_window_size {
            candidate = ratchet_material(&candidate, salt);
            match open(&derive_encryption_key(&candidate, salt)) {
                Ok(plaintext) => {
                    tracing::debug!(participant = %identity, key_index, step, "Recovered key by ratcheting");
                    ring.replace(key_index, candidate)?;
                    ring.record_success();
                    return Ok(plaintext);
                },
                Err(e) => last_error = e,
            }
        }

        if ring.record_failure(self.options.failure_tolerance) {
            tracing::warn!(participant = %identity, key_index, "Key ring invalidated after repeated failures");
        }
        Err(last_error)
    }

    fn ring_mut<'a>(
        &self,
        keys: &'a mut KeyStore,
        identity: &ParticipantIdentity,
    ) -> Result<&'a mut KeyRing, CryptoError> {
        if self.options.shared_key {
            return Ok(&mut keys.shared);
        }
        keys.participants.get_mut(identity).ok_or(CryptoError::MissingKey { index: 0 })
    }

    fn ensure_live(&self, operation: &'static str) -> Result<(), NativeError> {
        if self.is_disposed() {
            return Err(NativeError::new(operation, "key provider disposed"));
        }
        Ok(())
    }
}

#[async_trait]
impl NativeKeyProvider for SoftwareKeyProvider {
    async fn set_shared_key(&self, key: &[u8], key_index: u32) -> Result<(), NativeError> {
        self.recorder.record(NativeCall::SetSharedKey { key_index });
        self.ensure_live("set_shared_key")?;
        self.recorder.check(Failure::SetKey, "set_shared_key")?;

        lock(&self.keys)
            .shared
            .set_key(key_index, KeyMaterial::from(key))
            .map_err(crypto_error("set_shared_key"))
    }

    async fn ratchet_shared_key(&self, key_index: u32) -> Result<Vec<u8>, NativeError> {
        self.recorder.record(NativeCall::RatchetSharedKey { key_index });
        self.ensure_live("ratchet_shared_key")?;
        self.recorder.check(Failure::Ratchet, "ratchet_shared_key")?;

        let material = lock(&self.keys)
            .shared
            .ratchet(key_index, &self.options.ratchet_salt)
            .map_err(crypto_error("ratchet_shared_key"))?;
        Ok(material.as_bytes().to_vec())
    }

    async fn set_key(
        &self,
        identity: &ParticipantIdentity,
        key: &[u8],
        key_index: u32,
    ) -> Result<(), NativeError> {
        self.recorder.record(NativeCall::SetKey { identity: identity.clone(), key_index });
        self.ensure_live("set_key")?;
        self.recorder.check(Failure::SetKey, "set_key")?;

        let mut keys = lock(&self.keys);
        let ring = if self.options.shared_key {
            &mut keys.shared
        } else {
            let size = self.options.keyring_size;
            keys.participants.entry(identity.clone()).or_insert_with(|| KeyRing::new(size))
        };
        ring.set_key(key_index, KeyMaterial::from(key)).map_err(crypto_error("set_key"))
    }

    async fn ratchet_key(
        &self,
        identity: &ParticipantIdentity,
        key_index: u32,
    ) -> Result<Vec<u8>, NativeError> {
        self.recorder.record(NativeCall::RatchetKey { identity: identity.clone(), key_index });
        self.ensure_live("ratchet_key")?;
        self.recorder.check(Failure::Ratchet, "ratchet_key")?;

        let mut keys = lock(&self.keys);
        let ring = self.ring_mut(&mut keys, identity).map_err(crypto_error("ratchet_key"))?;
        let material =
            ring.ratchet(key_index, &self.options.ratchet_salt).map_err(crypto_error("ratchet_key"))?;
        Ok(material.as_bytes().to_vec())
    }

    async fn set_sif_trailer(&self, trailer: &[u8]) -> Result<(), NativeError> {
        self.recorder.record(NativeCall::SetSifTrailer { len: trailer.len() });
        self.ensure_live("set_sif_trailer")?;

        lock(&self.keys).sif_trailer = trailer.to_vec();
        Ok(())
    }

    async fn dispose(&self) -> Result<(), NativeError> {
        self.recorder.record(NativeCall::DisposeKeyProvider);
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Err(NativeError::new("dispose", "key provider already disposed"));
        }

        let mut keys = lock(&self.keys);
        keys.participants.clear();
        keys.shared = KeyRing::new(self.options.keyring_size);
        Ok(())
    }
}
