//! Key provider.
//!
//! Wraps the native key provider and remembers the latest key index set for
//! each participant, so that newly created frame cryptors start on the key
//! version already in effect. The native provider stays the authority for
//! key material; the cache only tags new cryptors.
//!
//! # Modes
//!
//! - Shared key: one key ring for everyone. Identity arguments are ignored
//!   and `set_key` is an alias of `set_shared_key`.
//! - Per participant: one key ring per identity.
//!
//! The mode is fixed for the lifetime of the provider.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    error::E2eeError,
    native::{KeyProviderFactory, NativeKeyProvider},
    options::{KeyProviderOptions, MAX_KEYRING_SIZE},
    room::ParticipantIdentity,
};

/// Latest key index explicitly set, per mode.
#[derive(Debug, Default)]
struct LatestKeyIndex {
    shared: u32,
    per_participant: HashMap<ParticipantIdentity, u32>,
}

/// Owns key material for one E2EE session.
///
/// # Invariants
///
/// - Shared-key and per-participant mode never mix within one provider
/// - After [`KeyProvider::dispose`], every operation that reaches the native
///   provider fails with [`E2eeError::KeyProviderDisposed`]
pub struct KeyProvider {
    options: KeyProviderOptions,
    native: Arc<dyn NativeKeyProvider>,
    latest: Mutex<LatestKeyIndex>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for KeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyProvider")
            .field("shared_key", &self.options.shared_key)
            .field("keyring_size", &self.options.keyring_size)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl KeyProvider {
    /// Create a provider backed by a native key provider from `factory`.
    ///
    /// Fails with [`E2eeError::Configuration`] if `keyring_size` is outside
    /// `1..=MAX_KEYRING_SIZE`.
    pub fn new<F>(options: KeyProviderOptions, factory: &F) -> Result<Self, E2eeError>
    where
        F: KeyProviderFactory + ?Sized,
    {
        if !(1..=MAX_KEYRING_SIZE).contains(&options.keyring_size) {
            return Err(E2eeError::Configuration("keyring_size must be between 1 and 256"));
        }

        let native = factory.create_key_provider(&options)?;
        tracing::debug!(
            shared_key = options.shared_key,
            keyring_size = options.keyring_size,
            "Key provider created"
        );

        Ok(Self {
            options,
            native,
            latest: Mutex::new(LatestKeyIndex::default()),
            disposed: AtomicBool::new(false),
        })
    }

    /// Options this provider was created with.
    pub fn options(&self) -> &KeyProviderOptions {
        &self.options
    }

    /// Whether one key is shared by all participants.
    pub fn is_shared_key(&self) -> bool {
        self.options.shared_key
    }

    /// Whether [`KeyProvider::dispose`] has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Latest key index set for `identity`, or 0 if none was set.
    ///
    /// In shared-key mode this is the latest shared index for every identity.
    pub fn latest_key_index(&self, identity: &ParticipantIdentity) -> u32 {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        if self.options.shared_key {
            latest.shared
        } else {
            latest.per_participant.get(identity).copied().unwrap_or(0)
        }
    }

    /// Set (or rotate) the shared key. `key_index` defaults to 0.
    ///
    /// In per-participant mode the shared key is stored by the native provider
    /// alongside the participant keys and never overwrites them.
    pub async fn set_shared_key(&self, key: &[u8], key_index: Option<u32>) -> Result<(), E2eeError> {
        let native = self.native()?;
        let key_index = self.check_index(key_index.unwrap_or(0))?;

        native.set_shared_key(key, key_index).await?;

        if self.options.shared_key {
            self.latest.lock().unwrap_or_else(PoisonError::into_inner).shared = key_index;
        } else {
            tracing::debug!(key_index, "Shared key set on a per-participant provider");
        }
        Ok(())
    }

    /// Set the key for `identity`. `key_index` defaults to 0.
    ///
    /// In shared-key mode this sets the shared key and `identity` is ignored.
    pub async fn set_key(
        &self,
        identity: &ParticipantIdentity,
        key: &[u8],
        key_index: Option<u32>,
    ) -> Result<(), E2eeError> {
        if self.options.shared_key {
            return self.set_shared_key(key, key_index).await;
        }

        let native = self.native()?;
        let key_index = self.check_index(key_index.unwrap_or(0))?;

        tracing::debug!(participant = %identity, key_index, "Setting participant key");
        native.set_key(identity, key, key_index).await?;

        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .per_participant
            .insert(identity.clone(), key_index);
        Ok(())
    }

    /// Ratchet a key one step.
    ///
    /// Ratchets `identity`'s key in per-participant mode, otherwise (shared
    /// mode, or no identity given) the shared key. `key_index` defaults to the
    /// latest index set.
    pub async fn ratchet_key(
        &self,
        identity: Option<&ParticipantIdentity>,
        key_index: Option<u32>,
    ) -> Result<(), E2eeError> {
        match identity {
            Some(identity) if !self.options.shared_key => {
                let native = self.native()?;
                let key_index =
                    self.check_index(key_index.unwrap_or_else(|| self.latest_key_index(identity)))?;

                tracing::debug!(participant = %identity, key_index, "Ratcheting participant key");
                native.ratchet_key(identity, key_index).await?;
                Ok(())
            },
            _ => self.ratchet_shared_key(key_index).await,
        }
    }

    /// Ratchet the shared key one step. `key_index` defaults to the latest
    /// shared index.
    pub async fn ratchet_shared_key(&self, key_index: Option<u32>) -> Result<(), E2eeError> {
        let native = self.native()?;
        let key_index = self.check_index(key_index.unwrap_or_else(|| {
            self.latest.lock().unwrap_or_else(PoisonError::into_inner).shared
        }))?;

        tracing::debug!(key_index, "Ratcheting shared key");
        native.ratchet_shared_key(key_index).await?;
        Ok(())
    }

    /// Configure the SIF trailer, forwarded verbatim.
    pub async fn set_sif_trailer(&self, trailer: &[u8]) -> Result<(), E2eeError> {
        self.native()?.set_sif_trailer(trailer).await?;
        Ok(())
    }

    /// Release native resources.
    ///
    /// Must be called exactly once; a second call fails.
    pub async fn dispose(&self) -> Result<(), E2eeError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Err(E2eeError::KeyProviderDisposed);
        }

        tracing::debug!("Disposing key provider");
        self.native.dispose().await?;
        Ok(())
    }

    /// Native provider, unless disposed.
    pub(crate) fn native(&self) -> Result<&Arc<dyn NativeKeyProvider>, E2eeError> {
        if self.is_disposed() {
            return Err(E2eeError::KeyProviderDisposed);
        }
        Ok(&self.native)
    }

    fn check_index(&self, key_index: u32) -> Result<u32, E2eeError> {
        if key_index >= self.options.keyring_size {
            return Err(E2eeError::InvalidKeyIndex {
                index: key_index,
                keyring_size: self.options.keyring_size,
            });
        }
        Ok(key_index)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::NativeError;

    /// Records native calls as strings.
    #[derive(Default)]
    struct RecordingNative {
        calls: Mutex<Vec<String>>,
        reject_set_key: AtomicBool,
    }

    impl RecordingNative {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl NativeKeyProvider for RecordingNative {
        async fn set_shared_key(&self, _key: &[u8], key_index: u32) -> Result<(), NativeError> {
            self.record(format!("set_shared_key({key_index})"));
            Ok(())
        }

        async fn ratchet_shared_key(&self, key_index: u32) -> Result<Vec<u8>, NativeError> {
            self.record(format!("ratchet_shared_key({key_index})"));
            Ok(vec![0; 32])
        }

        async fn set_key(
            &self,
            identity: &ParticipantIdentity,
            _key: &[u8],
            key_index: u32,
        ) -> Result<(), NativeError> {
            self.record(format!("set_key({identity},{key_index})"));
            if self.reject_set_key.load(Ordering::SeqCst) {
                return Err(NativeError::new("set_key", "rejected"));
            }
            Ok(())
        }

        async fn ratchet_key(
            &self,
            identity: &ParticipantIdentity,
            key_index: u32,
        ) -> Result<Vec<u8>, NativeError> {
            self.record(format!("ratchet_key({identity},{key_index})"));
            Ok(vec![0; 32])
        }

        async fn set_sif_trailer(&self, trailer: &[u8]) -> Result<(), NativeError> {
            self.record(format!("set_sif_trailer({})", trailer.len()));
            Ok(())
        }

        async fn dispose(&self) -> Result<(), NativeError> {
            self.record("dispose".to_string());
            Ok(())
        }
    }

    struct Factory(Arc<RecordingNative>);

    impl KeyProviderFactory for Factory {
        fn create_key_provider(
            &self,
            _options: &KeyProviderOptions,
        ) -> Result<Arc<dyn NativeKeyProvider>, NativeError> {
            Ok(self.0.clone())
        }
    }

    fn provider(options: KeyProviderOptions) -> (KeyProvider, Arc<RecordingNative>) {
        let native = Arc::new(RecordingNative::default());
        let provider = KeyProvider::new(options, &Factory(native.clone())).unwrap();
        (provider, native)
    }

    fn calls(native: &RecordingNative) -> Vec<String> {
        native.calls.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn shared_mode_set_key_routes_to_shared_key() {
        let (provider, native) = provider(KeyProviderOptions::default());

        provider.set_key(&"alice".into(), b"key", Some(2)).await.unwrap();

        assert_eq!(calls(&native), vec!["set_shared_key(2)"]);
        assert_eq!(provider.latest_key_index(&"alice".into()), 2);
        assert_eq!(provider.latest_key_index(&"bob".into()), 2);
    }

    #[tokio::test]
    async fn per_participant_indices_are_tracked_separately() {
        let (provider, native) = provider(KeyProviderOptions::per_participant());

        provider.set_key(&"alice".into(), b"key", Some(2)).await.unwrap();

        assert_eq!(calls(&native), vec!["set_key(alice,2)"]);
        assert_eq!(provider.latest_key_index(&"alice".into()), 2);
        assert_eq!(provider.latest_key_index(&"bob".into()), 0);
    }

    #[tokio::test]
    async fn failed_set_key_keeps_previous_index() {
        let (provider, native) = provider(KeyProviderOptions::per_participant());
        let alice = ParticipantIdentity::from("alice");

        provider.set_key(&alice, b"key", Some(1)).await.unwrap();
        native.reject_set_key.store(true, Ordering::SeqCst);
        let result = provider.set_key(&alice, b"next", Some(3)).await;

        assert!(matches!(result, Err(E2eeError::Native(_))));
        assert_eq!(provider.latest_key_index(&alice), 1);
        assert_eq!(calls(&native), vec!["set_key(alice,1)", "set_key(alice,3)"]);
    }

    #[test]
    fn keyring_larger_than_frame_index_rejected() {
        let native = Arc::new(RecordingNative::default());
        let options = KeyProviderOptions { keyring_size: 257, ..KeyProviderOptions::default() };

        let result = KeyProvider::new(options, &Factory(native));

        assert!(matches!(result, Err(E2eeError::Configuration(_))));
        let max = KeyProviderOptions { keyring_size: MAX_KEYRING_SIZE, ..Default::default() };
        assert!(KeyProvider::new(max, &Factory(Arc::new(RecordingNative::default()))).is_ok());
    }

    #[tokio::test]
    async fn shared_key_does_not_touch_participant_indices() {
        let (provider, _native) = provider(KeyProviderOptions::per_participant());

        provider.set_key(&"alice".into(), b"key", Some(1)).await.unwrap();
        provider.set_shared_key(b"shared", Some(5)).await.unwrap();

        assert_eq!(provider.latest_key_index(&"alice".into()), 1);
    }

    #[tokio::test]
    async fn ratchet_routing_follows_mode() {
        let (shared, shared_native) = provider(KeyProviderOptions::default());
        shared.ratchet_key(Some(&"alice".into()), Some(1)).await.unwrap();
        assert_eq!(calls(&shared_native), vec!["ratchet_shared_key(1)"]);

        let (per, per_native) = provider(KeyProviderOptions::per_participant());
        per.set_key(&"alice".into(), b"k", Some(3)).await.unwrap();
        per.ratchet_key(Some(&"alice".into()), None).await.unwrap();
        per.ratchet_key(None, None).await.unwrap();
        assert_eq!(
            calls(&per_native),
            vec!["set_key(alice,3)", "ratchet_key(alice,3)", "ratchet_shared_key(0)"]
        );
    }

    #[tokio::test]
    async fn out_of_range_index_rejected_before_native() {
        let (provider, native) = provider(KeyProviderOptions::default().with_keyring_size(4));

        let result = provider.set_shared_key(b"key", Some(4)).await;

        assert_eq!(result, Err(E2eeError::InvalidKeyIndex { index: 4, keyring_size: 4 }));
        assert!(calls(&native).is_empty());
    }

    #[tokio::test]
    async fn use_after_dispose_fails_loudly() {
        let (provider, native) = provider(KeyProviderOptions::default());

        provider.dispose().await.unwrap();

        assert!(provider.is_disposed());
        assert_eq!(provider.set_shared_key(b"k", None).await, Err(E2eeError::KeyProviderDisposed));
        assert_eq!(provider.set_sif_trailer(b"t").await, Err(E2eeError::KeyProviderDisposed));
        assert_eq!(provider.dispose().await, Err(E2eeError::KeyProviderDisposed));
        assert_eq!(calls(&native), vec!["dispose"]);
    }

    #[tokio::test]
    async fn sif_trailer_forwarded_verbatim() {
        let (provider, native) = provider(KeyProviderOptions::default());

        provider.set_sif_trailer(&[1, 2, 3]).await.unwrap();

        assert_eq!(calls(&native), vec!["set_sif_trailer(3)"]);
    }
}
