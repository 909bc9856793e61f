//! Data-channel encryption and lazy data-packet cryptor construction.

use std::sync::Arc;

use proptest::prelude::*;
use sealtrack_core::{
    E2eeError, E2eeManager, E2eeOptions, KeyProviderOptions, ParticipantIdentity,
};
use sealtrack_harness::{Failure, NativeCall, SimRoom, SoftwareBinding};

const SHARED_KEY: &[u8] = b"data channel shared key";

async fn manager(binding: &Arc<SoftwareBinding>, options: E2eeOptions) -> E2eeManager {
    E2eeManager::from_options(options, binding.clone()).await.unwrap()
}

fn shared_key_options(key: &[u8]) -> E2eeOptions {
    E2eeOptions {
        shared_key: Some(key.to_vec()),
        data_channel_encryption: true,
        ..E2eeOptions::default()
    }
}

/// Sender bound to a room as `identity`, and a receiver with no room.
async fn pair(options: E2eeOptions, identity: &str) -> (E2eeManager, E2eeManager) {
    let sender = manager(&Arc::new(SoftwareBinding::with_seed(1)), options.clone()).await;
    sender.setup(SimRoom::new(identity)).unwrap();
    let receiver = manager(&Arc::new(SoftwareBinding::with_seed(2)), options).await;
    (sender, receiver)
}

#[tokio::test]
async fn shared_key_round_trip() {
    let (alice, bob) = pair(shared_key_options(SHARED_KEY), "alice").await;

    let packet = alice.encrypt_data(b"hello bob").await.unwrap();
    assert_eq!(packet.key_index, 0);
    assert_ne!(packet.payload, b"hello bob");

    let plaintext = bob
        .handle_encrypted_data(
            &packet.payload,
            &packet.iv,
            &ParticipantIdentity::from("alice"),
            packet.key_index,
        )
        .await
        .unwrap();
    assert_eq!(plaintext, b"hello bob");
}

#[tokio::test]
async fn per_participant_round_trip_uses_sender_key() {
    let options = E2eeOptions {
        key_provider: KeyProviderOptions::per_participant(),
        ..E2eeOptions::default()
    };
    let (alice, bob) = pair(options, "alice").await;
    let identity = ParticipantIdentity::from("alice");

    alice.key_provider().set_key(&identity, b"alice key", Some(3)).await.unwrap();
    bob.key_provider().set_key(&identity, b"alice key", Some(3)).await.unwrap();

    let packet = alice.encrypt_data(b"per participant").await.unwrap();
    assert_eq!(packet.key_index, 3);

    let plaintext = bob
        .handle_encrypted_data(&packet.payload, &packet.iv, &identity, packet.key_index)
        .await
        .unwrap();
    assert_eq!(plaintext, b"per participant");
}

#[tokio::test]
async fn wrong_key_fails_decryption() {
    let alice = manager(&Arc::new(SoftwareBinding::new()), shared_key_options(b"one key")).await;
    alice.setup(SimRoom::new("alice")).unwrap();
    let bob = manager(&Arc::new(SoftwareBinding::new()), shared_key_options(b"another key")).await;

    let packet = alice.encrypt_data(b"secret").await.unwrap();
    let result = bob
        .handle_encrypted_data(&packet.payload, &packet.iv, &"alice".into(), packet.key_index)
        .await;

    assert_eq!(result, Err(E2eeError::CryptoOperationFailed {
        operation: "decrypt",
        identity: ParticipantIdentity::from("alice"),
        key_index: 0,
    }));
}

#[tokio::test]
async fn encrypt_without_room_is_a_configuration_error() {
    let binding = Arc::new(SoftwareBinding::new());
    let alice = manager(&binding, shared_key_options(SHARED_KEY)).await;

    let result = alice.encrypt_data(b"too early").await;

    assert!(matches!(result, Err(E2eeError::Configuration(_))));
    assert_eq!(binding.data_packet_cryptors_created(), 0);
}

#[tokio::test]
async fn encrypt_without_result_is_a_crypto_failure() {
    let binding = Arc::new(SoftwareBinding::new());
    let alice = manager(&binding, shared_key_options(SHARED_KEY)).await;
    alice.setup(SimRoom::new("alice")).unwrap();

    binding.fail(Failure::EncryptNoResult);
    let result = alice.encrypt_data(b"payload").await;

    assert!(matches!(result, Err(E2eeError::CryptoOperationFailed { operation: "encrypt", .. })));
}

#[tokio::test]
async fn encrypt_with_no_key_is_a_crypto_failure() {
    let binding = Arc::new(SoftwareBinding::new());
    let alice = manager(&binding, E2eeOptions::default()).await;
    alice.setup(SimRoom::new("alice")).unwrap();

    let result = alice.encrypt_data(b"payload").await;

    assert!(matches!(result, Err(E2eeError::CryptoOperationFailed { operation: "encrypt", .. })));
}

#[tokio::test]
async fn data_cryptor_is_built_on_first_use() {
    let binding = Arc::new(SoftwareBinding::new());
    let alice = manager(&binding, shared_key_options(SHARED_KEY)).await;
    alice.setup(SimRoom::new("alice")).unwrap();
    assert!(!alice.is_data_cryptor_ready());

    alice.encrypt_data(b"one").await.unwrap();
    alice.encrypt_data(b"two").await.unwrap();

    assert!(alice.is_data_cryptor_ready());
    assert_eq!(binding.data_packet_cryptors_created(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_use_builds_one_cryptor() {
    let binding = Arc::new(SoftwareBinding::new());
    binding.set_data_cryptor_construction_yields(64);
    let alice = manager(&binding, shared_key_options(SHARED_KEY)).await;
    alice.setup(SimRoom::new("alice")).unwrap();

    let tasks: Vec<_> = (0..16u8)
        .map(|i| {
            let alice = alice.clone();
            tokio::spawn(async move { alice.encrypt_data(&[i; 32]).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(binding.data_packet_cryptors_created(), 1);
    let constructions = binding
        .calls()
        .iter()
        .filter(|call| matches!(call, NativeCall::CreateDataPacketCryptor))
        .count();
    assert_eq!(constructions, 1);
}

#[tokio::test]
async fn failed_construction_is_retried() {
    let binding = Arc::new(SoftwareBinding::new());
    let alice = manager(&binding, shared_key_options(SHARED_KEY)).await;
    alice.setup(SimRoom::new("alice")).unwrap();

    binding.fail(Failure::CreateDataPacketCryptor);
    assert!(matches!(alice.encrypt_data(b"first").await, Err(E2eeError::Native(_))));
    assert!(!alice.is_data_cryptor_ready());

    binding.clear_failures();
    alice.encrypt_data(b"second").await.unwrap();
    assert!(alice.is_data_cryptor_ready());
    assert_eq!(binding.data_packet_cryptors_created(), 1);
}

#[tokio::test]
async fn data_path_fails_after_provider_dispose() {
    let binding = Arc::new(SoftwareBinding::new());
    let alice = manager(&binding, shared_key_options(SHARED_KEY)).await;
    alice.setup(SimRoom::new("alice")).unwrap();
    alice.encrypt_data(b"before").await.unwrap();

    alice.key_provider().dispose().await.unwrap();

    assert_eq!(alice.encrypt_data(b"after").await, Err(E2eeError::KeyProviderDisposed));
    let decrypt = alice.handle_encrypted_data(b"x", &[0; 12], &"bob".into(), 0).await;
    assert_eq!(decrypt, Err(E2eeError::KeyProviderDisposed));
}

#[tokio::test]
async fn data_channel_toggle_requires_local_encryption() {
    let alice = manager(&Arc::new(SoftwareBinding::new()), shared_key_options(SHARED_KEY)).await;
    alice.setup(SimRoom::new("alice")).unwrap();
    assert!(!alice.is_data_channel_encryption_enabled());

    alice.set_participant_cryptor_enabled(true, &"alice".into()).unwrap();
    assert!(alice.is_data_channel_encryption_enabled());

    alice.set_data_channel_encryption_enabled(false);
    assert!(!alice.is_data_channel_encryption_enabled());
}

#[tokio::test]
async fn sif_trailer_reaches_native_provider() {
    let binding = Arc::new(SoftwareBinding::new());
    let alice = manager(&binding, E2eeOptions::default()).await;

    alice.set_sif_trailer(b"\x01\x02\x03").await.unwrap();

    assert_eq!(binding.key_providers()[0].sif_trailer(), b"\x01\x02\x03");
    assert!(binding.calls().contains(&NativeCall::SetSifTrailer { len: 3 }));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any payload encrypted under a key index decrypts on the other side
    /// with the same key at the same index.
    #[test]
    fn prop_payload_round_trips(
        payload in prop::collection::vec(any::<u8>(), 0..512),
        key in prop::collection::vec(any::<u8>(), 1..64),
        key_index in 0..16u32,
        seed in any::<u64>(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let plaintext = runtime.block_on(async {
            let options = E2eeOptions::default();
            let alice = manager(&Arc::new(SoftwareBinding::with_seed(seed)), options.clone()).await;
            alice.setup(SimRoom::new("alice")).unwrap();
            let bob = manager(&Arc::new(SoftwareBinding::new()), options).await;

            alice.key_provider().set_shared_key(&key, Some(key_index)).await.unwrap();
            bob.key_provider().set_shared_key(&key, Some(key_index)).await.unwrap();

            let packet = alice.encrypt_data(&payload).await.unwrap();
            assert_eq!(packet.key_index, key_index);
            bob.handle_encrypted_data(&packet.payload, &packet.iv, &"alice".into(), packet.key_index)
                .await
                .unwrap()
        });

        prop_assert_eq!(plaintext, payload);
    }
}
