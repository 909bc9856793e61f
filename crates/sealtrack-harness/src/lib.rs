//! Test harness for Sealtrack end-to-end encryption.
//!
//! - [`SoftwareBinding`]: an in-process native binding with real
//!   cryptography, a call log, and failure injection
//! - [`SimRoom`]: a room that delivers track lifecycle events in order
//! - [`invariants`]: properties checked against manager, binding, and room
//!   state after every step
//! - [`model`]: a reference model for model-based property tests
//!
//! # Example
//!
//! ```ignore
//! let binding = Arc::new(SoftwareBinding::new());
//! let manager = E2eeManager::from_options(E2eeOptions::default(), binding.clone()).await?;
//! let room = SimRoom::new("alice");
//! manager.setup(room.clone())?;
//!
//! room.publish_local("TR_CAM1", true);
//! settle(&manager, &room).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod binding;
pub mod invariants;
pub mod model;
pub mod sim_room;

pub use binding::{
    Failure, NativeCall, NativeCryptorRecord, SoftwareBinding, SoftwareDataPacketCryptor,
    SoftwareFrameCryptor, SoftwareKeyProvider,
};
pub use invariants::{Invariant, InvariantRegistry, Subject, SystemSnapshot, Violation};
pub use model::{ModelWorld, ObservableState, Operation, OperationError, OperationResult};
pub use sim_room::{SETTLE_TIMEOUT, SimRoom, SimTrack, settle};
