//! Fuzz target for incoming frame classification
//!
//! Arbitrary bytes are classified as a receiver would, then opened with a
//! fixed key. Neither step may panic; malformed or forged frames must come
//! back as errors.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sealtrack_crypto::{FrameKind, KeyMaterial, classify_frame, derive_encryption_key, open_frame};

const SIF_TRAILER: &[u8] = b"SIF!";
const MAGIC: &[u8] = b"LK-ROCKS";

fuzz_target!(|data: &[u8]| {
    let key = derive_encryption_key(&KeyMaterial::from(&b"fuzz key"[..]), b"LKFrameEncryptionKey");

    match classify_frame(data, SIF_TRAILER, MAGIC) {
        Ok(FrameKind::PassThrough) => {
            assert!(data.ends_with(SIF_TRAILER) || data.ends_with(MAGIC));
        },
        Ok(FrameKind::Sealed(parts)) => {
            assert_eq!(parts.iv.len(), sealtrack_crypto::IV_SIZE);
            // Random bytes never authenticate
            let _ = open_frame(&parts, &key);
        },
        Err(_) => {},
    }
});
