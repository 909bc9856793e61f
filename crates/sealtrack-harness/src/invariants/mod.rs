//! Frame cryptor invariants.
//!
//! After the event pump settles, the manager registry, the live native
//! cryptors, and the room's tracks must agree: one cryptor per encrypted
//! track, none for anything else, and every removed cryptor disabled before
//! it was disposed. Each check sees one [`SystemSnapshot`] and reports every
//! offending track, native cryptor, or media handle it finds.
//!
//! Snapshots taken after injected native failures may legitimately show
//! leaked cryptors; check those against a hand-picked [`InvariantRegistry`].
//!
//! # Usage
//!
//! ```ignore
//! settle(&manager, &room).await?;
//! let snapshot = SystemSnapshot::capture(&manager, &binding, &room);
//! InvariantRegistry::standard().assert_all(&snapshot, "after unpublish");
//! ```

mod checks;
mod snapshot;

use std::fmt;

use sealtrack_core::TrackSid;

pub use checks::{
    AttachedCryptorsEnabled, DisableBeforeDispose, EncryptedTracksOnly, NoLeakedCryptors,
    SingleCryptorPerTrack,
};
pub use snapshot::SystemSnapshot;

/// What a violation is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// A track SID, as the registry and room know it.
    Track(TrackSid),
    /// A native frame cryptor, by binding-assigned id.
    NativeCryptor(u64),
    /// An RTP sender or receiver handle.
    Media(u64),
    /// The registry as a whole.
    Registry,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Track(sid) => write!(f, "track {sid}"),
            Self::NativeCryptor(id) => write!(f, "native cryptor {id}"),
            Self::Media(media) => write!(f, "media {media}"),
            Self::Registry => f.write_str("registry"),
        }
    }
}

/// One broken property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Name of the check that failed.
    pub invariant: &'static str,
    /// Offending track, cryptor, or handle.
    pub subject: Subject,
    /// What the check saw.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.invariant, self.subject, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property of settled cryptor state.
pub trait Invariant: Send + Sync {
    /// Stable name, used in [`Violation::invariant`].
    fn name(&self) -> &'static str;

    /// Every violation in `state`; empty if the property holds.
    fn check(&self, state: &SystemSnapshot) -> Vec<Violation>;

    /// Build a violation of this invariant.
    fn violation(&self, subject: Subject, message: String) -> Violation {
        Violation { invariant: self.name(), subject, message }
    }
}

/// The checks run against each snapshot.
#[derive(Default)]
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantRegistry {
    /// No checks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every check that holds when no native failure was injected:
    /// [`SingleCryptorPerTrack`], [`NoLeakedCryptors`],
    /// [`DisableBeforeDispose`], [`EncryptedTracksOnly`] and
    /// [`AttachedCryptorsEnabled`].
    pub fn standard() -> Self {
        Self::new()
            .with(SingleCryptorPerTrack)
            .with(NoLeakedCryptors)
            .with(DisableBeforeDispose)
            .with(EncryptedTracksOnly)
            .with(AttachedCryptorsEnabled)
    }

    /// Add a check.
    #[must_use]
    pub fn with<I: Invariant + 'static>(mut self, invariant: I) -> Self {
        self.invariants.push(Box::new(invariant));
        self
    }

    /// Run every check, collecting violations in registration order.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().flat_map(|invariant| invariant.check(state)).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Run every check and panic listing all violations.
    ///
    /// For tests.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let lines: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("{} cryptor invariant(s) broken {context}:\n  {}", lines.len(), lines.join("\n  "));
        }
    }

    /// Names of the registered checks.
    pub fn names(&self) -> Vec<&'static str> {
        self.invariants.iter().map(|invariant| invariant.name()).collect()
    }
}
