//! Fuzz target for sealed frame trailers
//!
//! Seals a frame, then damages its trailer or body.
//!
//! # Strategy
//!
//! - Trailer: intact, wrong IV length byte, rewritten key index, truncated
//! - Body (ciphertext, tag, IV): intact or one flipped bit
//!
//! # Invariants
//!
//! - An intact frame MUST open to the original bytes
//! - A damaged frame MUST NOT open
//! - Classification MUST NOT panic on any length

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sealtrack_crypto::{
    FrameKind, IV_SIZE, KeyMaterial, classify_frame, derive_encryption_key, open_frame, seal_frame,
};

#[derive(Debug, Clone, Arbitrary)]
enum TrailerDamage {
    None,
    IvLength(u8),
    KeyIndex(u8),
    Truncate(u8),
}

#[derive(Debug, Clone, Arbitrary)]
struct Input {
    frame: Vec<u8>,
    key: Vec<u8>,
    key_index: u8,
    iv: [u8; IV_SIZE],
    trailer: TrailerDamage,
    flip_bit: Option<u16>,
}

fuzz_target!(|input: Input| {
    let key = derive_encryption_key(&KeyMaterial::from(input.key.as_slice()), b"fuzz salt");
    let mut sealed = seal_frame(&input.frame, &key, input.key_index, input.iv);
    let len = sealed.len();

    let mut damaged = match input.trailer {
        TrailerDamage::None => false,
        TrailerDamage::IvLength(byte) => {
            sealed[len - 2] = byte;
            byte as usize != IV_SIZE
        },
        TrailerDamage::KeyIndex(index) => {
            sealed[len - 1] = index;
            index != input.key_index
        },
        TrailerDamage::Truncate(n) => {
            let n = (n as usize).min(len);
            sealed.truncate(len - n);
            n > 0
        },
    };

    // Body flips only on an intact trailer, so two damages cannot cancel out
    if let (Some(bit), false) = (input.flip_bit, damaged) {
        let body = len - 2;
        let bit = bit as usize % (body * 8);
        sealed[bit / 8] ^= 1 << (bit % 8);
        damaged = true;
    }

    let opened = match classify_frame(&sealed, &[], &[]) {
        Ok(FrameKind::Sealed(parts)) => open_frame(&parts, &key).ok(),
        Ok(FrameKind::PassThrough) => None,
        Err(_) => None,
    };

    if damaged {
        assert!(opened.is_none(), "damaged frame opened");
    } else {
        assert_eq!(opened.as_deref(), Some(input.frame.as_slice()));
    }
});
