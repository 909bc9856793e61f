//! Key provider and manager configuration.

/// Default ratchet salt.
pub const DEFAULT_RATCHET_SALT: &str = "LKFrameEncryptionKey";

/// Default marker for frames that are intentionally left unencrypted.
pub const DEFAULT_MAGIC_BYTES: &str = "LK-ROCKS";

/// Default number of ratchet attempts when decryption fails.
pub const DEFAULT_RATCHET_WINDOW_SIZE: u32 = 16;

/// Default failure tolerance; negative means unlimited.
pub const DEFAULT_FAILURE_TOLERANCE: i32 = -1;

/// Default number of key slots per participant.
pub const DEFAULT_KEYRING_SIZE: u32 = 16;

/// Largest supported key ring. Frames carry the key index in one byte.
pub const MAX_KEYRING_SIZE: u32 = 256;

/// Key provider configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyProviderOptions {
    /// One key for every participant (`true`) or per-participant keys.
    pub shared_key: bool,
    /// Salt for key derivation and ratcheting.
    pub ratchet_salt: Vec<u8>,
    /// Ratchet attempts before a decryption failure is final.
    pub ratchet_window_size: u32,
    /// Consecutive failures tolerated before keys are invalidated; `-1`
    /// means unlimited.
    pub failure_tolerance: i32,
    /// Number of key slots per participant, `1..=MAX_KEYRING_SIZE`.
    pub keyring_size: u32,
    /// Trailer marking frames that were never encrypted.
    pub uncrypted_magic_bytes: Vec<u8>,
    /// Drop frames instead of passing them through while no key is set.
    pub discard_frame_when_cryptor_not_ready: bool,
}

impl Default for KeyProviderOptions {
    fn default() -> Self {
        Self {
            shared_key: true,
            ratchet_salt: DEFAULT_RATCHET_SALT.as_bytes().to_vec(),
            ratchet_window_size: DEFAULT_RATCHET_WINDOW_SIZE,
            failure_tolerance: DEFAULT_FAILURE_TOLERANCE,
            keyring_size: DEFAULT_KEYRING_SIZE,
            uncrypted_magic_bytes: DEFAULT_MAGIC_BYTES.as_bytes().to_vec(),
            discard_frame_when_cryptor_not_ready: false,
        }
    }
}

impl KeyProviderOptions {
    /// Per-participant keys with all other defaults.
    pub fn per_participant() -> Self {
        Self { shared_key: false, ..Self::default() }
    }

    /// Set shared-key mode.
    #[must_use]
    pub fn with_shared_key(mut self, shared_key: bool) -> Self {
        self.shared_key = shared_key;
        self
    }

    /// Set the ratchet salt.
    #[must_use]
    pub fn with_ratchet_salt(mut self, salt: impl AsRef<[u8]>) -> Self {
        self.ratchet_salt = salt.as_ref().to_vec();
        self
    }

    /// Set the ratchet window size.
    #[must_use]
    pub fn with_ratchet_window_size(mut self, size: u32) -> Self {
        self.ratchet_window_size = size;
        self
    }

    /// Set the failure tolerance (`-1` for unlimited).
    #[must_use]
    pub fn with_failure_tolerance(mut self, tolerance: i32) -> Self {
        self.failure_tolerance = tolerance;
        self
    }

    /// Set the key ring size, clamped to `1..=MAX_KEYRING_SIZE`.
    #[must_use]
    pub fn with_keyring_size(mut self, size: u32) -> Self {
        self.keyring_size = size.clamp(1, MAX_KEYRING_SIZE);
        self
    }

    /// Set the unencrypted-frame magic bytes.
    #[must_use]
    pub fn with_uncrypted_magic_bytes(mut self, magic: impl AsRef<[u8]>) -> Self {
        self.uncrypted_magic_bytes = magic.as_ref().to_vec();
        self
    }

    /// Set whether frames are dropped until a key is available.
    #[must_use]
    pub fn with_discard_frame_when_cryptor_not_ready(mut self, discard: bool) -> Self {
        self.discard_frame_when_cryptor_not_ready = discard;
        self
    }
}

/// Everything needed to stand up an [`E2eeManager`](crate::E2eeManager).
#[derive(Debug, Clone, Default)]
pub struct E2eeOptions {
    /// Key provider configuration.
    pub key_provider: KeyProviderOptions,
    /// Shared key applied at index 0 once the provider exists.
    pub shared_key: Option<Vec<u8>>,
    /// Initial value of the data-channel encryption toggle.
    pub data_channel_encryption: bool,
}
