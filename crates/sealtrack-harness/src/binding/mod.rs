//! In-process implementation of the native binding.
//!
//! [`SoftwareBinding`] does real cryptography with `sealtrack-crypto`
//! (AES-256-GCM, HKDF key derivation, HMAC ratchet) so key rotation and
//! ratchet recovery can be exercised end to end without a WebRTC stack.
//!
//! Every call is recorded in order ([`NativeCall`]), any operation can be
//! made to fail ([`Failure`]), and data-packet cryptor construction can be
//! slowed down to widen the first-use race.
//!
//! IVs come from a seeded ChaCha20 RNG, so a fixed seed gives reproducible
//! ciphertexts.

mod call_log;
mod data_cryptor;
mod frame_cryptor;
mod key_provider;

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
pub use call_log::{Failure, NativeCall};
pub use data_cryptor::SoftwareDataPacketCryptor;
pub use frame_cryptor::{NativeCryptorRecord, SoftwareFrameCryptor};
pub use key_provider::SoftwareKeyProvider;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sealtrack_core::{
    CryptorDirection, DataPacketCryptor, DataPacketCryptorFactory, FrameCryptor,
    FrameCryptorAlgorithm, FrameCryptorFactory, KeyProviderFactory, KeyProviderOptions,
    NativeError, NativeKeyProvider, ParticipantIdentity, RtpReceiverHandle, RtpSenderHandle,
};
use sealtrack_crypto::{CryptoError, IV_SIZE};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn crypto_error(operation: &'static str) -> impl FnOnce(CryptoError) -> NativeError {
    move |e| NativeError::new(operation, e.to_string())
}

/// Call log and active failures, shared by every object of one binding.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    calls: Mutex<Vec<NativeCall>>,
    failures: Mutex<HashSet<Failure>>,
}

impl Recorder {
    pub(crate) fn record(&self, call: NativeCall) {
        lock(&self.calls).push(call);
    }

    pub(crate) fn is_failing(&self, failure: Failure) -> bool {
        lock(&self.failures).contains(&failure)
    }

    /// Fail `operation` if `failure` is injected.
    pub(crate) fn check(&self, failure: Failure, operation: &'static str) -> Result<(), NativeError> {
        if self.is_failing(failure) {
            return Err(NativeError::new(operation, "injected failure"));
        }
        Ok(())
    }
}

/// Seeded IV source.
#[derive(Debug)]
pub(crate) struct IvSource(Mutex<ChaCha20Rng>);

impl IvSource {
    fn new(seed: u64) -> Self {
        Self(Mutex::new(ChaCha20Rng::seed_from_u64(seed)))
    }

    pub(crate) fn next_iv(&self) -> [u8; IV_SIZE] {
        let mut iv = [0u8; IV_SIZE];
        lock(&self.0).fill_bytes(&mut iv);
        iv
    }
}

/// Software native binding.
///
/// # Invariants
///
/// - Cryptor ids are unique for the lifetime of the binding
/// - Frame and data cryptors only accept key providers this binding created
#[derive(Debug)]
pub struct SoftwareBinding {
    recorder: Arc<Recorder>,
    ivs: Arc<IvSource>,
    next_cryptor: AtomicU64,
    key_providers: Mutex<Vec<Arc<SoftwareKeyProvider>>>,
    frame_cryptors: Mutex<Vec<Arc<SoftwareFrameCryptor>>>,
    data_cryptors_created: AtomicUsize,
    construction_yields: AtomicU32,
}

impl Default for SoftwareBinding {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBinding {
    /// Binding with seed 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Binding whose IVs are drawn from a ChaCha20 RNG seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            recorder: Arc::new(Recorder::default()),
            ivs: Arc::new(IvSource::new(seed)),
            next_cryptor: AtomicU64::new(1),
            key_providers: Mutex::new(Vec::new()),
            frame_cryptors: Mutex::new(Vec::new()),
            data_cryptors_created: AtomicUsize::new(0),
            construction_yields: AtomicU32::new(0),
        }
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<NativeCall> {
        lock(&self.recorder.calls).clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        lock(&self.recorder.calls).clear();
    }

    /// Make `failure` happen until cleared.
    pub fn fail(&self, failure: Failure) {
        lock(&self.recorder.failures).insert(failure);
    }

    /// Stop injecting `failure`.
    pub fn clear_failure(&self, failure: Failure) {
        lock(&self.recorder.failures).remove(&failure);
    }

    /// Stop injecting all failures.
    pub fn clear_failures(&self) {
        lock(&self.recorder.failures).clear();
    }

    /// Yield to the scheduler `yields` times inside data-packet cryptor
    /// construction, so concurrent first users overlap.
    pub fn set_data_cryptor_construction_yields(&self, yields: u32) {
        self.construction_yields.store(yields, Ordering::Relaxed);
    }

    /// Number of data-packet cryptors successfully constructed.
    pub fn data_packet_cryptors_created(&self) -> usize {
        self.data_cryptors_created.load(Ordering::Acquire)
    }

    /// Key providers created by this binding.
    pub fn key_providers(&self) -> Vec<Arc<SoftwareKeyProvider>> {
        lock(&self.key_providers).clone()
    }

    /// Every frame cryptor ever created, in creation order.
    pub fn frame_cryptors(&self) -> Vec<Arc<SoftwareFrameCryptor>> {
        lock(&self.frame_cryptors).clone()
    }

    /// State of every frame cryptor ever created, in creation order.
    pub fn frame_cryptor_records(&self) -> Vec<NativeCryptorRecord> {
        lock(&self.frame_cryptors).iter().map(|cryptor| cryptor.record()).collect()
    }

    /// Frame cryptors not yet disposed.
    pub fn live_frame_cryptors(&self) -> Vec<Arc<SoftwareFrameCryptor>> {
        lock(&self.frame_cryptors).iter().filter(|cryptor| !cryptor.is_disposed()).cloned().collect()
    }

    /// Live frame cryptor bound to RTP handle `media`.
    pub fn live_frame_cryptor_for(&self, media: u64) -> Option<Arc<SoftwareFrameCryptor>> {
        lock(&self.frame_cryptors)
            .iter()
            .find(|cryptor| cryptor.media() == media && !cryptor.is_disposed())
            .cloned()
    }

    fn software_provider(
        &self,
        provider: &Arc<dyn NativeKeyProvider>,
    ) -> Result<Arc<SoftwareKeyProvider>, NativeError> {
        let wanted = Arc::as_ptr(provider).cast::<()>();
        lock(&self.key_providers)
            .iter()
            .find(|candidate| Arc::as_ptr(candidate).cast::<()>() == wanted)
            .cloned()
            .ok_or_else(|| {
                NativeError::new("lookup_key_provider", "key provider was not created by this binding")
            })
    }

    fn create_frame_cryptor(
        &self,
        identity: &ParticipantIdentity,
        direction: CryptorDirection,
        media: u64,
        key_provider: &Arc<dyn NativeKeyProvider>,
    ) -> Result<Arc<dyn FrameCryptor>, NativeError> {
        let id = self.next_cryptor.fetch_add(1, Ordering::Relaxed);
        self.recorder.record(NativeCall::CreateFrameCryptor {
            cryptor: id,
            identity: identity.clone(),
            direction,
            media,
        });
        self.recorder.check(Failure::CreateFrameCryptor, "create_frame_cryptor")?;

        let provider = self.software_provider(key_provider)?;
        let cryptor = Arc::new(SoftwareFrameCryptor::new(
            id,
            identity.clone(),
            direction,
            media,
            provider,
            self.recorder.clone(),
            self.ivs.clone(),
        ));
        lock(&self.frame_cryptors).push(cryptor.clone());

        tracing::trace!(cryptor = id, participant = %identity, ?direction, "Software frame cryptor created");
        Ok(cryptor)
    }
}

impl KeyProviderFactory for SoftwareBinding {
    fn create_key_provider(
        &self,
        options: &KeyProviderOptions,
    ) -> Result<Arc<dyn NativeKeyProvider>, NativeError> {
        self.recorder.record(NativeCall::CreateKeyProvider { shared_key: options.shared_key });
        self.recorder.check(Failure::CreateKeyProvider, "create_key_provider")?;

        let provider = Arc::new(SoftwareKeyProvider::new(options.clone(), self.recorder.clone()));
        lock(&self.key_providers).push(provider.clone());
        Ok(provider)
    }
}

impl FrameCryptorFactory for SoftwareBinding {
    fn create_for_sender(
        &self,
        identity: &ParticipantIdentity,
        sender: RtpSenderHandle,
        _algorithm: FrameCryptorAlgorithm,
        key_provider: &Arc<dyn NativeKeyProvider>,
    ) -> Result<Arc<dyn FrameCryptor>, NativeError> {
        self.create_frame_cryptor(identity, CryptorDirection::Sender, sender.0, key_provider)
    }

    fn create_for_receiver(
        &self,
        identity: &ParticipantIdentity,
        receiver: RtpReceiverHandle,
        _algorithm: FrameCryptorAlgorithm,
        key_provider: &Arc<dyn NativeKeyProvider>,
    ) -> Result<Arc<dyn FrameCryptor>, NativeError> {
        self.create_frame_cryptor(identity, CryptorDirection::Receiver, receiver.0, key_provider)
    }
}

#[async_trait]
impl DataPacketCryptorFactory for SoftwareBinding {
    async fn create_data_packet_cryptor(
        &self,
        _algorithm: FrameCryptorAlgorithm,
        key_provider: Arc<dyn NativeKeyProvider>,
    ) -> Result<Arc<dyn DataPacketCryptor>, NativeError> {
        self.recorder.record(NativeCall::CreateDataPacketCryptor);

        for _ in 0..self.construction_yields.load(Ordering::Relaxed) {
            tokio::task::yield_now().await;
        }
        self.recorder.check(Failure::CreateDataPacketCryptor, "create_data_packet_cryptor")?;

        let provider = self.software_provider(&key_provider)?;
        self.data_cryptors_created.fetch_add(1, Ordering::AcqRel);

        Ok(Arc::new(SoftwareDataPacketCryptor::new(
            provider,
            self.recorder.clone(),
            self.ivs.clone(),
        )))
    }
}
