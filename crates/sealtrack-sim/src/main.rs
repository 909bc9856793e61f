//! Sealtrack loopback simulator.
//!
//! Runs two participants, each with its own manager and software binding,
//! and passes media frames and data packets between them.
//!
//! # Usage
//!
//! ```bash
//! # Shared key, 32 messages
//! sealtrack-sim --shared-key "correct horse" --messages 32
//!
//! # Per-participant keys with a narrow ratchet window
//! sealtrack-sim --per-participant --ratchet-window-size 2 --log-level debug
//! ```

mod session;

use clap::Parser;
use sealtrack_core::{
    KeyProviderOptions,
    options::{
        DEFAULT_FAILURE_TOLERANCE, DEFAULT_KEYRING_SIZE, DEFAULT_RATCHET_SALT,
        DEFAULT_RATCHET_WINDOW_SIZE, MAX_KEYRING_SIZE,
    },
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::session::{LoopbackConfig, run_loopback};

/// Sealtrack loopback simulator
#[derive(Parser, Debug)]
#[command(name = "sealtrack-sim")]
#[command(about = "Two-party end-to-end encryption loopback session")]
#[command(version)]
struct Args {
    /// Passphrase both participants derive keys from
    #[arg(short, long, default_value = "sealtrack")]
    shared_key: String,

    /// Give every participant its own key instead of one shared key
    #[arg(long)]
    per_participant: bool,

    /// Salt for key derivation and ratcheting
    #[arg(long, default_value = DEFAULT_RATCHET_SALT)]
    ratchet_salt: String,

    /// Ratchet attempts before a decryption failure is final
    #[arg(long, default_value_t = DEFAULT_RATCHET_WINDOW_SIZE)]
    ratchet_window_size: u32,

    /// Consecutive failures tolerated before keys are invalidated (-1 for unlimited)
    #[arg(long, default_value_t = DEFAULT_FAILURE_TOLERANCE, allow_negative_numbers = true)]
    failure_tolerance: i32,

    /// Key slots per participant (1-256)
    #[arg(
        long,
        default_value_t = DEFAULT_KEYRING_SIZE,
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_KEYRING_SIZE))
    )]
    keyring_size: u32,

    /// Frames and data packets to send
    #[arg(short, long, default_value = "16")]
    messages: u32,

    /// Sender ratchets its key every N messages (0 never ratchets)
    #[arg(long, default_value = "4")]
    ratchet_every: u32,

    /// RNG seed for IVs
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let key_provider = KeyProviderOptions::default()
        .with_shared_key(!args.per_participant)
        .with_ratchet_salt(&args.ratchet_salt)
        .with_ratchet_window_size(args.ratchet_window_size)
        .with_failure_tolerance(args.failure_tolerance)
        .with_keyring_size(args.keyring_size);

    let config = LoopbackConfig {
        key_provider,
        passphrase: args.shared_key.into_bytes(),
        messages: args.messages,
        ratchet_every: args.ratchet_every,
        seed: args.seed,
    };

    tracing::info!(
        per_participant = args.per_participant,
        messages = args.messages,
        seed = args.seed,
        "Sealtrack loopback starting"
    );

    let report = run_loopback(config).await?;

    tracing::info!(
        frames_delivered = report.frames_delivered,
        frames_dropped = report.frames_dropped,
        packets_delivered = report.packets_delivered,
        packets_failed = report.packets_failed,
        ratchets = report.ratchets,
        "Sealtrack loopback finished"
    );

    if !report.is_clean() {
        tracing::warn!("Some messages did not survive the round trip");
    }

    Ok(())
}
