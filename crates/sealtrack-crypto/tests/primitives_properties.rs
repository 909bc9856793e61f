//! Property-based tests for the software primitives
//!
//! 1. **Round-trip**: open(seal(m)) == m for packets and frames
//! 2. **Ratchet lockstep**: two rings ratcheted the same number of times
//!    derive the same key
//! 3. **Slot binding**: a ciphertext only opens under the key index it names

use proptest::prelude::*;
use sealtrack_crypto::{
    FrameKind, IV_SIZE, KeyMaterial, KeyRing, classify_frame, derive_encryption_key, open_frame,
    open_packet, seal_frame, seal_packet,
};

const SALT: &[u8] = b"LKFrameEncryptionKey";

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_packet_roundtrip(
        plaintext in prop::collection::vec(any::<u8>(), 0..2048),
        material in prop::collection::vec(any::<u8>(), 1..64),
        key_index in 0u32..16,
        iv in any::<[u8; IV_SIZE]>(),
    ) {
        let key = derive_encryption_key(&KeyMaterial::new(material), SALT);
        let sealed = seal_packet(&plaintext, &key, key_index, iv);

        let opened = open_packet(&sealed.payload, &sealed.iv, key_index, &key).unwrap();
        prop_assert_eq!(opened, plaintext);
    }

    #[test]
    fn prop_frame_roundtrip(
        frame in prop::collection::vec(any::<u8>(), 0..2048),
        key_index in 0u8..16,
        iv in any::<[u8; IV_SIZE]>(),
    ) {
        let key = derive_encryption_key(&KeyMaterial::new(b"frame key".to_vec()), SALT);
        let sealed = seal_frame(&frame, &key, key_index, iv);

        // Empty markers so random ciphertext can never be mistaken for pass-through
        let kind = classify_frame(&sealed, b"", b"").unwrap();
        let FrameKind::Sealed(parts) = kind else {
            return Err(TestCaseError::fail("sealed frame classified as pass-through"));
        };
        prop_assert_eq!(parts.key_index, key_index);
        prop_assert_eq!(open_frame(&parts, &key).unwrap(), frame);
    }

    #[test]
    fn prop_ratchet_lockstep(steps in 0usize..20, index in 0u32..16) {
        let mut sender = KeyRing::new(16);
        let mut receiver = KeyRing::new(16);
        sender.set_key(index, KeyMaterial::new(b"shared".to_vec())).unwrap();
        receiver.set_key(index, KeyMaterial::new(b"shared".to_vec())).unwrap();

        for _ in 0..steps {
            sender.ratchet(index, SALT).unwrap();
            receiver.ratchet(index, SALT).unwrap();
        }

        prop_assert_eq!(sender.key(index).unwrap(), receiver.key(index).unwrap());
    }

    #[test]
    fn prop_packet_bound_to_key_index(
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        sealed_index in 0u32..16,
        opened_index in 0u32..16,
    ) {
        prop_assume!(sealed_index != opened_index);

        let key = derive_encryption_key(&KeyMaterial::new(b"k".to_vec()), SALT);
        let sealed = seal_packet(&plaintext, &key, sealed_index, [0; IV_SIZE]);

        prop_assert!(open_packet(&sealed.payload, &sealed.iv, opened_index, &key).is_err());
    }
}
