//! Reference model for model-based testing.
//!
//! Operations are applied to both [`ModelWorld`] and a real manager driven
//! through a simulated room; their observable states must match after every
//! step.

mod operation;
mod world;

pub use operation::{
    ModelParticipant, ModelTrack, Operation, OperationError, OperationResult, identity,
    local_track_sid, remote_track_sid,
};
pub use world::{ModelCryptor, ModelWorld, ObservableState};
