//! Lazily constructed data-packet cryptor.
//!
//! The first `encrypt_data`/`handle_encrypted_data` call builds the native
//! data-packet cryptor. Concurrent first calls must not build two of them:
//! the fast path reads an initialized cell without locking, the slow path
//! takes an async mutex and checks again before constructing.
//!
//! A failed construction stores nothing; the next call retries.

use std::{future::Future, sync::Arc, sync::OnceLock};

use tokio::sync::Mutex;

use crate::{error::NativeError, native::DataPacketCryptor};

/// Double-checked lazy cell for the shared data-packet cryptor.
#[derive(Default)]
pub(crate) struct DataCryptorCell {
    cryptor: OnceLock<Arc<dyn DataPacketCryptor>>,
    init: Mutex<()>,
}

impl DataCryptorCell {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The cryptor, if already constructed.
    pub(crate) fn get(&self) -> Option<Arc<dyn DataPacketCryptor>> {
        self.cryptor.get().cloned()
    }

    /// Return the cryptor, constructing it with `create` on first use.
    pub(crate) async fn get_or_create<F, Fut>(
        &self,
        create: F,
    ) -> Result<Arc<dyn DataPacketCryptor>, NativeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn DataPacketCryptor>, NativeError>>,
    {
        if let Some(cryptor) = self.cryptor.get() {
            return Ok(cryptor.clone());
        }

        let _guard = self.init.lock().await;
        if let Some(cryptor) = self.cryptor.get() {
            return Ok(cryptor.clone());
        }

        tracing::debug!("Constructing data packet cryptor");
        let cryptor = create().await?;

        // Only writer is the holder of `init`, so the cell is still empty
        let _ = self.cryptor.set(cryptor.clone());
        Ok(cryptor)
    }
}
